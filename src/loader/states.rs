//! States of the loader state machine.
//!
//! This module is private and restricted to the [`loader`](crate::loader)
//! scope. Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.
//!
//! Every state follows the same shape: register a checkpoint (which doubles
//! as a cancellation check), do the stage's work through the context
//! helpers, lap the profiler, and return the event for the next transition.
//! Any failure becomes a [`DoneEvent`] carrying the coded error.

use std::time::Instant;

use hexplay::HexViewBuilder;
use log::{debug, log_enabled, Level::Debug};

use super::context::ActionContext;
use super::events::*;
use super::{Action, ActionError, ErrorCode, Status};
use crate::protocol::payloads::{INIT_BYTES, PROP_AUTH_BYTES};
use crate::protocol::{decode_byte, Bit3Encoder};
use crate::timing::{
    transit_duration, CHECKSUM_STATUS_TIMEOUT, EARLY_STAGE4_RETURN,
    EEPROM_PROGRAMMING_STATUS_TIMEOUT, EEPROM_VERIFICATION_STATUS_TIMEOUT, INIT_BYTES_TIMEOUT,
};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be run after a transition into
/// it.
///
/// During the call the state does the work of its protocol stage and, when
/// finished, requests a transition by returning the appropriate event. The
/// state is consumed; the event and the new state are created through the
/// corresponding [`From`] implementation (provided one exists -- any other
/// transition is a compile-time error).
pub(crate) trait Runnable: Sized {
    fn run(self) -> Event;
}

// Preparation State ===========================================================

/// Stage 1: acquire the port, open it, flush stale output, and configure
/// the line for the booter program (8N1, no flow control, the action's
/// baudrate, device timeouts of one cancellation check interval).
pub(crate) struct PreparationState {
    pub ctx: ActionContext,
}

impl PreparationState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("obtaining serial port access")?;
        ctx.port
            .make_active()
            .map_err(|e| ActionError::new(ErrorCode::FailedToObtainPortAccess, e.to_string()))?;

        ctx.checkpoint("opening port")?;
        ctx.port
            .ensure_open()
            .map_err(|e| ActionError::new(ErrorCode::FailedToOpenPort, e.to_string()))?;

        ctx.checkpoint("flushing output buffer")?;
        ctx.port
            .flush_output()
            .map_err(|e| ActionError::new(ErrorCode::FailedToFlushOutput, e.to_string()))?;

        ctx.checkpoint("updating port settings")?;
        ctx.apply_port_settings()?;

        ctx.profiler.end_stage1();
        Ok(())
    }
}

impl Runnable for PreparationState {
    fn run(mut self) -> Event {
        debug!("=> Preparation");
        match Self::work(&mut self.ctx) {
            Ok(()) => Event::Reset(ResetEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// Reset State =================================================================

/// Stage 2a: hold the reset line low for the reset duration, then release
/// it. A [`Action::Restart`] finishes here; everything else goes on to wait
/// for the Propeller to boot.
pub(crate) struct ResetState {
    pub ctx: ActionContext,
}

impl ResetState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("resetting the Propeller")?;
        ctx.do_reset()?;
        ctx.profiler.end_stage2a();
        Ok(())
    }
}

impl Runnable for ResetState {
    fn run(mut self) -> Event {
        debug!("=> Reset");
        self.ctx.notify_update(Status::Resetting);
        match Self::work(&mut self.ctx) {
            Ok(()) if self.ctx.action == Action::Restart => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Ok(()),
            }),
            Ok(()) => Event::BootWait(BootWaitEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// BootWait State ==============================================================

/// Stage 2b: give the Propeller time to restart and enter its booter
/// program, then discard whatever arrived on the line in the meantime.
pub(crate) struct BootWaitState {
    pub ctx: ActionContext,
}

impl BootWaitState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("waiting for the Propeller to boot")?;
        // The maximum boot wait is 150 ms, not worth slicing into smaller
        // sleeps for cancellation checks.
        std::thread::sleep(ctx.settings.boot_wait_duration);

        ctx.checkpoint("flushing input buffer")?;
        ctx.port
            .flush_input()
            .map_err(|e| ActionError::new(ErrorCode::FailedToFlushInput, e.to_string()))?;

        ctx.profiler.end_stage2b();
        Ok(())
    }
}

impl Runnable for BootWaitState {
    fn run(mut self) -> Event {
        debug!("=> BootWait");
        match Self::work(&mut self.ctx) {
            Ok(()) => Event::Handshake(HandshakeEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// Handshake State =============================================================

/// Stage 3: send the calibration pulses, the host authentication bits, and
/// the transmission prompts; then authenticate the Propeller's reply and
/// check its chip version.
pub(crate) struct HandshakeState {
    pub ctx: ActionContext,
}

impl HandshakeState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("sending initial bytes")?;
        let drain_time = ctx.send_bytes(&INIT_BYTES, ErrorCode::FailedToSendInitialBytes)?;

        // The Propeller answers simultaneously with the prompts, so the
        // reply should be complete shortly after the initial bytes drain.
        let deadline = drain_time + INIT_BYTES_TIMEOUT;

        ctx.checkpoint("authenticating Propeller chip")?;
        ctx.receive_bytes(
            PROP_AUTH_BYTES.len(),
            deadline,
            ErrorCode::FailedToReceivePropAuthentication,
        )?;
        if ctx.scratch != PROP_AUTH_BYTES {
            if log_enabled!(Debug) {
                let view = HexViewBuilder::new(&ctx.scratch)
                    .address_offset(0)
                    .row_width(16)
                    .finish();
                debug!("unexpected authentication bytes:\n{}", view);
            }
            return Err(ActionError::new(
                ErrorCode::FailedToAuthenticateProp,
                "unexpected bytes received from the Propeller",
            ));
        }

        ctx.checkpoint("verifying Propeller chip version")?;
        ctx.receive_bytes(4, deadline, ErrorCode::FailedToReceiveChipVersion)?;
        let version = decode_byte(&ctx.scratch)
            .map_err(|e| ActionError::new(ErrorCode::FailedToDecodeChipVersion, e.to_string()))?;
        if version != 1 {
            return Err(ActionError::new(
                ErrorCode::UnsupportedChipVersion,
                format!("unrecognized chip version: {version}"),
            ));
        }

        ctx.profiler.end_stage3();
        Ok(())
    }
}

impl Runnable for HandshakeState {
    fn run(mut self) -> Event {
        debug!("=> Handshake");
        self.ctx.notify_update(Status::EstablishingCommunications);
        match Self::work(&mut self.ctx) {
            Ok(()) => Event::Command(CommandEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// Command State ===============================================================

/// Stage 4a: transmit the pre-encoded command word for the action. A
/// [`Action::Shutdown`] finishes here. The estimated drain time of the
/// command starts the stage-4 drain accounting that the image send extends.
pub(crate) struct CommandState {
    pub ctx: ActionContext,
}

impl CommandState {
    fn work(ctx: &mut ActionContext) -> Result<Instant, ActionError> {
        ctx.checkpoint("sending command")?;
        let Some(encoded_command) = ctx.action.encoded_command() else {
            // Program logic keeps such actions from reaching this stage.
            return Err(ActionError::new(
                ErrorCode::FailedToSendCommand,
                format!("the action '{}' is invalid at this stage", ctx.action),
            ));
        };
        let drain_time = ctx.send_bytes(encoded_command, ErrorCode::FailedToSendCommand)?;
        ctx.profiler.end_stage4a();
        Ok(drain_time)
    }
}

impl Runnable for CommandState {
    fn run(mut self) -> Event {
        debug!("=> Command");
        self.ctx.notify_update(Status::SendingCommandAndImage);
        match Self::work(&mut self.ctx) {
            Ok(_) if self.ctx.action == Action::Shutdown => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Ok(()),
            }),
            Ok(stage4_drain) => Event::SendImage(SendImageEvent {
                ctx: self.ctx,
                stage4_drain,
            }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// SendImage State =============================================================

/// Stage 4b: transmit the encoded image size and the encoded image, then
/// wait out most of the drain time.
///
/// The wait ends one early-return interval before the estimated drain so
/// the status poll starts promptly; without it an excessive number of
/// checksum status prompts would be buffered behind the image.
pub(crate) struct SendImageState {
    pub ctx: ActionContext,
    /// Estimated drain time of the command bytes, carried over from
    /// [`CommandState`] and extended here with the image transit time.
    pub stage4_drain: Instant,
}

impl SendImageState {
    fn work(ctx: &mut ActionContext, stage4_drain: Instant) -> Result<(), ActionError> {
        ctx.checkpoint("sending image size")?;
        let image_size_in_longs = u32::try_from(ctx.image_size_in_longs).map_err(|_| {
            ActionError::new(
                ErrorCode::FailedToEncodeImageSize,
                format!(
                    "image size in longs ({}) does not fit a long",
                    ctx.image_size_in_longs
                ),
            )
        })?;
        Bit3Encoder::new(&mut ctx.scratch).encode_long(image_size_in_longs);
        ctx.send_scratch(ErrorCode::FailedToSendImageSize)?;

        ctx.checkpoint("sending image")?;
        ctx.send_encoded_image(ErrorCode::FailedToSendImage)?;

        // The drain estimate was made when the command went out; the size
        // and image bytes extend it.
        let drain_time = stage4_drain
            + transit_duration(
                ctx.scratch.len() + ctx.encoded_image.len(),
                ctx.settings.baudrate,
            );
        ctx.wait_until(drain_time - EARLY_STAGE4_RETURN)?;

        ctx.profiler.end_stage4b();
        Ok(())
    }
}

impl Runnable for SendImageState {
    fn run(mut self) -> Event {
        debug!("=> SendImage");
        match Self::work(&mut self.ctx, self.stage4_drain) {
            Ok(()) => Event::AwaitChecksum(AwaitChecksumEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// AwaitChecksum State =========================================================

/// Stage 5: poll for the checksum status. A [`Action::LoadRam`] finishes
/// here -- the Propeller is already running the image.
pub(crate) struct AwaitChecksumState {
    pub ctx: ActionContext,
}

impl AwaitChecksumState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("waiting for checksum status")?;
        let deadline = Instant::now() + CHECKSUM_STATUS_TIMEOUT;
        let failed = ctx.receive_status(deadline, ErrorCode::FailedToReceiveChecksumStatus)?;

        ctx.checkpoint("checking checksum status")?;
        if failed {
            return Err(ActionError::new(
                ErrorCode::PropReportsChecksumError,
                "data may have been corrupted in transmission",
            ));
        }

        ctx.profiler.end_stage5();
        Ok(())
    }
}

impl Runnable for AwaitChecksumState {
    fn run(mut self) -> Event {
        debug!("=> AwaitChecksum");
        self.ctx.notify_update(Status::WaitingForChecksumStatus);
        match Self::work(&mut self.ctx) {
            Ok(()) if self.ctx.action == Action::LoadRam => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Ok(()),
            }),
            Ok(()) => Event::AwaitProgramming(AwaitProgrammingEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// AwaitProgramming State ======================================================

/// Stage 6: poll for the EEPROM programming status.
pub(crate) struct AwaitProgrammingState {
    pub ctx: ActionContext,
}

impl AwaitProgrammingState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("waiting for EEPROM programming status")?;
        let deadline = Instant::now() + EEPROM_PROGRAMMING_STATUS_TIMEOUT;
        let failed =
            ctx.receive_status(deadline, ErrorCode::FailedToReceiveEepromProgrammingStatus)?;

        ctx.checkpoint("checking EEPROM programming status")?;
        if failed {
            return Err(ActionError::new(
                ErrorCode::PropReportsEepromProgrammingError,
                "EEPROM may be absent or incorrectly connected",
            ));
        }

        ctx.profiler.end_stage6();
        Ok(())
    }
}

impl Runnable for AwaitProgrammingState {
    fn run(mut self) -> Event {
        debug!("=> AwaitProgramming");
        self.ctx
            .notify_update(Status::WaitingForEepromProgrammingStatus);
        match Self::work(&mut self.ctx) {
            Ok(()) => Event::AwaitVerification(AwaitVerificationEvent { ctx: self.ctx }),
            Err(e) => Event::Done(DoneEvent {
                ctx: self.ctx,
                outcome: Err(e),
            }),
        }
    }
}

// AwaitVerification State =====================================================

/// Stage 7: poll for the EEPROM verification status. The last stage of the
/// programming actions.
pub(crate) struct AwaitVerificationState {
    pub ctx: ActionContext,
}

impl AwaitVerificationState {
    fn work(ctx: &mut ActionContext) -> Result<(), ActionError> {
        ctx.checkpoint("waiting for EEPROM verification status")?;
        let deadline = Instant::now() + EEPROM_VERIFICATION_STATUS_TIMEOUT;
        let failed =
            ctx.receive_status(deadline, ErrorCode::FailedToReceiveEepromVerificationStatus)?;

        ctx.checkpoint("checking EEPROM verification status")?;
        if failed {
            return Err(ActionError::new(
                ErrorCode::PropReportsEepromVerificationError,
                "EEPROM may be read-only or malfunctioning",
            ));
        }

        ctx.checkpoint("finishing up")?;
        ctx.profiler.end_stage7();
        Ok(())
    }
}

impl Runnable for AwaitVerificationState {
    fn run(mut self) -> Event {
        debug!("=> AwaitVerification");
        self.ctx
            .notify_update(Status::WaitingForEepromVerificationStatus);
        let outcome = Self::work(&mut self.ctx);
        Event::Done(DoneEvent {
            ctx: self.ctx,
            outcome,
        })
    }
}

// Done State ==================================================================

/// Reached when the action completes, successfully or not. The state
/// machine's run loop stops here and hands the outcome back to the runner,
/// which reports it through the observer.
pub(crate) struct DoneState {
    pub ctx: ActionContext,
    pub outcome: Result<(), ActionError>,
}
