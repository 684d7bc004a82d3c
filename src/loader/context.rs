//! Shared data and I/O helpers for the action worker.
//!
//! An [`ActionContext`] travels through the stage state machine, carrying
//! the settings snapshot, the port, the encoded image, and the cancellation
//! plumbing. The helpers here implement the send, receive, and status-poll
//! protocols every stage builds on; each one checks the cancellation flag
//! before touching the port and converts failures into coded
//! [`ActionError`]s at the call site.

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use log::trace;

use super::{Action, ActionError, ErrorCode, Profiler, Status};
use crate::port::LoaderPort;
use crate::protocol::payloads::STATUS_PROMPT;
use crate::settings::{ResetLine, Settings};
use crate::timing::{
    responsiveness_timeout, transit_duration, CANCELLATION_CHECK_INTERVAL, STATUS_PROMPT_INTERVAL,
};

/// Everything an action needs while it runs.
///
/// Built by the runner under its mutex, moved into the worker thread, and
/// handed from stage to stage by the state machine.
pub(crate) struct ActionContext {
    /// The action being performed.
    pub action: Action,
    /// Settings locked in when the action started. The live settings may
    /// change at any time without affecting this action.
    pub settings: Settings,
    /// The serial device, held exclusively for the duration of the action.
    pub port: Box<dyn LoaderPort>,
    /// The 3BP encoded image, empty for actions without one.
    pub encoded_image: Vec<u8>,
    /// The number of longs in the encoded image, including the padded tail.
    pub image_size_in_longs: usize,
    /// A multipurpose buffer reused across the loading process.
    pub scratch: Vec<u8>,
    /// Per-stage timing.
    pub profiler: Profiler,
    /// Set by `ActionRunner::cancel`; observed at checkpoints.
    pub cancelled: Arc<AtomicBool>,
    /// The label of the last checkpoint passed, shared with the runner for
    /// busy diagnostics.
    pub last_checkpoint: Arc<Mutex<&'static str>>,
}

impl ActionContext {
    /// Fails with [`ErrorCode::Cancelled`] if the action has been cancelled.
    /// The detail string captures the current activity.
    pub fn bail_if_cancelled(&self) -> Result<(), ActionError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ActionError::new(
                ErrorCode::Cancelled,
                self.current_activity(),
            ));
        }
        Ok(())
    }

    /// A cancellation check plus a checkpoint registration.
    pub fn checkpoint(&self, label: &'static str) -> Result<(), ActionError> {
        self.bail_if_cancelled()?;
        *self.last_checkpoint.lock().unwrap() = label;
        Ok(())
    }

    /// Describes what the worker is doing right now, for error details and
    /// busy diagnostics.
    pub fn current_activity(&self) -> String {
        format!(
            "Action: {}. Last checkpoint: {}.",
            self.action,
            *self.last_checkpoint.lock().unwrap()
        )
    }

    /// Notifies the observer of a status change.
    pub fn notify_update(&self, status: Status) {
        if let Some(observer) = &self.settings.observer {
            observer.update(
                status,
                self.profiler.summary().total_time,
                self.profiler.estimated_total_time(),
            );
        }
    }

    /// Sends all of `bytes`, returning the estimated drain time: the instant
    /// the last byte should have left the wire, assuming transmission began
    /// immediately and ran uninterrupted.
    ///
    /// Each write call blocks at most the device timeout; between calls the
    /// cancellation flag is checked and progress is compared against a
    /// responsiveness deadline. A port that cannot keep pace with the
    /// baudrate fails the stage.
    pub fn send_bytes(&mut self, bytes: &[u8], code: ErrorCode) -> Result<Instant, ActionError> {
        if bytes.is_empty() {
            return Err(ActionError::new(
                code,
                "BUG: attempted to send an empty buffer",
            ));
        }

        let transit = transit_duration(bytes.len(), self.settings.baudrate);
        let started = Instant::now();
        let drain_time = started + transit;
        let responsiveness_deadline = started + responsiveness_timeout(transit);

        let mut num_sent = 0;
        loop {
            self.bail_if_cancelled()?;

            match self.port.write(&bytes[num_sent..]) {
                Ok(n) => num_sent += n,
                Err(e) => {
                    return Err(ActionError::new(
                        code,
                        format!("writing to the port failed: {e}"),
                    ))
                }
            }
            trace!("{} of {} bytes sent", num_sent, bytes.len());

            if num_sent >= bytes.len() {
                break;
            }
            if Instant::now() > responsiveness_deadline {
                return Err(ActionError::new(code, "the port was unresponsive"));
            }
        }

        Ok(drain_time)
    }

    /// Sends the encoded image. Split out from [`send_bytes`](Self::send_bytes)
    /// because the image buffer lives in the context itself.
    pub fn send_encoded_image(&mut self, code: ErrorCode) -> Result<Instant, ActionError> {
        let encoded_image = mem::take(&mut self.encoded_image);
        let result = self.send_bytes(&encoded_image, code);
        self.encoded_image = encoded_image;
        result
    }

    /// Sends the scratch buffer. See [`send_encoded_image`](Self::send_encoded_image).
    pub fn send_scratch(&mut self, code: ErrorCode) -> Result<Instant, ActionError> {
        let scratch = mem::take(&mut self.scratch);
        let result = self.send_bytes(&scratch, code);
        self.scratch = scratch;
        result
    }

    /// Receives exactly `total_to_receive` bytes into the scratch buffer, or
    /// fails once `deadline` passes.
    ///
    /// The deadline check runs after each read call, which itself blocks up
    /// to the device timeout; the overshoot past `deadline` is therefore
    /// bounded by the cancellation check interval.
    pub fn receive_bytes(
        &mut self,
        total_to_receive: usize,
        deadline: Instant,
        code: ErrorCode,
    ) -> Result<(), ActionError> {
        if total_to_receive == 0 {
            return Err(ActionError::new(
                code,
                "BUG: attempted to receive zero bytes",
            ));
        }

        self.scratch.clear();
        self.scratch.resize(total_to_receive, 0);

        let mut num_received = 0;
        loop {
            self.bail_if_cancelled()?;

            match self.port.read(&mut self.scratch[num_received..]) {
                Ok(n) => num_received += n,
                Err(e) => {
                    return Err(ActionError::new(
                        code,
                        format!("reading from the port failed: {e}"),
                    ))
                }
            }
            trace!("{} of {} bytes received", num_received, total_to_receive);

            if num_received >= total_to_receive {
                return Ok(());
            }
            if Instant::now() > deadline {
                return Err(ActionError::new(code, "timeout occurred"));
            }
        }
    }

    /// Receives a status code from the Propeller by prompting it every
    /// [`STATUS_PROMPT_INTERVAL`].
    ///
    /// The Propeller reports a status after verifying the checksum,
    /// programming the EEPROM, and verifying the programmed image, and it
    /// only transmits when prompted. It reports `0` for success and `1` for
    /// failure, so the return value is the inversion of a success flag.
    pub fn receive_status(
        &mut self,
        deadline: Instant,
        code: ErrorCode,
    ) -> Result<bool, ActionError> {
        loop {
            self.bail_if_cancelled()?;

            if let Err(e) = self.port.write(&[STATUS_PROMPT]) {
                return Err(ActionError::new(
                    ErrorCode::FailedToSendStatusPrompt,
                    format!("writing to the port failed: {e}"),
                ));
            }

            thread::sleep(STATUS_PROMPT_INTERVAL);

            let num_available = self.port.bytes_to_read().map_err(|e| {
                ActionError::new(code, format!("getting available bytes failed: {e}"))
            })?;

            if num_available > 0 {
                let mut status = [0u8; 1];
                let num_received = self.port.read(&mut status).map_err(|e| {
                    ActionError::new(code, format!("reading from the port failed: {e}"))
                })?;
                if num_received != 1 {
                    // Not expected, and the read call has presumably sat out
                    // its full timeout, after which the Propeller may have
                    // rebooted already. Don't loop.
                    return Err(ActionError::new(
                        code,
                        "port reported bytes available but returned none",
                    ));
                }
                return match status[0] {
                    // Status code 1: failure.
                    0xFF => Ok(true),
                    // Status code 0: success.
                    0xFE => Ok(false),
                    other => Err(ActionError::new(
                        code,
                        format!("received unexpected byte: {other:#04X}"),
                    )),
                };
            }

            if Instant::now() > deadline {
                return Err(ActionError::new(code, "timeout occurred"));
            }
        }
    }

    /// Waits until `deadline`, checking for cancellation every
    /// [`CANCELLATION_CHECK_INTERVAL`].
    pub fn wait_until(&self, deadline: Instant) -> Result<(), ActionError> {
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(());
            };
            if remaining.is_zero() {
                return Ok(());
            }

            self.bail_if_cancelled()?;

            if remaining < CANCELLATION_CHECK_INTERVAL {
                thread::sleep(remaining);
                self.bail_if_cancelled()?;
                return Ok(());
            }
            thread::sleep(CANCELLATION_CHECK_INTERVAL);
        }
    }

    /// Performs the Propeller reset over the configured line.
    pub fn do_reset(&mut self) -> Result<(), ActionError> {
        let map = |e: serialport::Error| ActionError::new(ErrorCode::FailedToReset, e.to_string());
        match self.settings.reset_line {
            ResetLine::Dtr => {
                self.port.set_dtr(true).map_err(map)?;
                thread::sleep(self.settings.reset_duration);
                self.port.set_dtr(false).map_err(map)?;
            }
            ResetLine::Rts => {
                self.port.set_rts(true).map_err(map)?;
                thread::sleep(self.settings.reset_duration);
                self.port.set_rts(false).map_err(map)?;
            }
            ResetLine::Callback => {
                let Some(callback) = self.settings.reset_callback.clone() else {
                    return Err(ActionError::new(
                        ErrorCode::FailedToReset,
                        "reset callback option selected, but no callback provided",
                    ));
                };
                let reset_duration = self.settings.reset_duration;
                match panic::catch_unwind(AssertUnwindSafe(|| callback(reset_duration))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        return Err(ActionError::new(ErrorCode::FailedToReset, e.to_string()))
                    }
                    Err(_) => {
                        return Err(ActionError::new(
                            ErrorCode::FailedToReset,
                            "the reset callback panicked",
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies the locked-in settings to the serial port: the action's
    /// baudrate, 8N1 framing, no flow control, and read/write timeouts of
    /// one cancellation check interval.
    pub fn apply_port_settings(&mut self) -> Result<(), ActionError> {
        use serialport::{DataBits, FlowControl, Parity, StopBits};

        fn map<T>(
            result: serialport::Result<T>,
            code: ErrorCode,
        ) -> Result<T, ActionError> {
            result.map_err(|e| ActionError::new(code, e.to_string()))
        }

        map(
            self.port.set_baudrate(self.settings.baudrate),
            ErrorCode::FailedToSetBaudrate,
        )?;
        map(
            self.port.set_timeout(CANCELLATION_CHECK_INTERVAL),
            ErrorCode::FailedToSetTimeout,
        )?;
        map(
            self.port.set_data_bits(DataBits::Eight),
            ErrorCode::FailedToSetBytesize,
        )?;
        map(
            self.port.set_parity(Parity::None),
            ErrorCode::FailedToSetParity,
        )?;
        map(
            self.port.set_stop_bits(StopBits::One),
            ErrorCode::FailedToSetStopbits,
        )?;
        map(
            self.port.set_flow_control(FlowControl::None),
            ErrorCode::FailedToSetFlowcontrol,
        )?;
        Ok(())
    }
}
