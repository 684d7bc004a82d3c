//! Starting, watching, cancelling, and waiting on loader actions.
//!
//! The [`ActionRunner`] owns the serial port and the live settings, and it
//! performs every action on a dedicated worker thread so the calling thread
//! stays free. Shared state is guarded by two locks: the runner mutex
//! coordinates the action lifecycle (the current action, the cancellation
//! flag, the action counter, and the finished condition), and a callback
//! order mutex sequences the observer callbacks of consecutive actions --
//! the next action's `will_begin` cannot run until the previous action's
//! `finished` has returned, even though the two run on different worker
//! threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::loader::{
    run_action, Action, ActionContext, ActionSummary, ErrorCode, InputError, Profiler,
    StatusObserver, TimeoutError,
};
use crate::port::{LoaderPort, SystemPort};
use crate::protocol::verify_and_encode;
use crate::settings::{
    validate_baudrate, validate_boot_wait_duration, validate_reset_duration, ResetCallback,
    ResetLine, Settings,
};

// =============================================================================
// Public Interface
// =============================================================================

/// Programs and controls a Propeller over a serial port.
///
/// Actions are performed asynchronously: the initiating call returns once
/// the worker thread is launched, and progress is reported through the
/// configured [`StatusObserver`]. At most one action runs at a time; a
/// second initiation while busy fails with [`InputError::Busy`].
///
/// Dropping the runner cancels any action in flight and waits for it to
/// terminate.
pub struct ActionRunner {
    inner: Arc<RunnerInner>,
}

impl ActionRunner {
    /// Creates a runner driving the given port.
    pub fn new(port: Box<dyn LoaderPort>) -> Self {
        ActionRunner {
            inner: Arc::new(RunnerInner {
                settings: Mutex::new(Settings::default()),
                counter: Mutex::new(0),
                finished: Condvar::new(),
                action: AtomicU8::new(Action::None as u8),
                is_cancelled: Arc::new(AtomicBool::new(false)),
                last_checkpoint: Arc::new(Mutex::new("no action performed yet")),
                callback_order: Mutex::new(()),
                port: Mutex::new(Some(port)),
            }),
        }
    }

    /// Creates a runner for the serial device at `path` (e.g.
    /// `/dev/ttyUSB0` or `COM3`). The device is not opened until the first
    /// action runs.
    pub fn open(path: impl Into<String>) -> Self {
        ActionRunner::new(Box::new(SystemPort::new(path)))
    }

    // Loader Actions ----------------------------------------------------------

    /// Restarts the Propeller.
    ///
    /// This action just toggles the reset line and finishes; the Propeller
    /// still needs time to go through its boot process before it runs the
    /// code in its EEPROM.
    pub fn restart(&self) -> Result<(), InputError> {
        self.start(Action::Restart, None)
    }

    /// Resets the Propeller and commands it into its shutdown mode.
    pub fn shutdown(&self) -> Result<(), InputError> {
        self.start(Action::Shutdown, None)
    }

    /// Loads the given image into hub RAM and runs it.
    pub fn load_ram(&self, image: &[u8]) -> Result<(), InputError> {
        self.start(Action::LoadRam, Some(image))
    }

    /// Programs the EEPROM with the given image, then either runs it or
    /// shuts the Propeller down.
    pub fn program_eeprom(&self, image: &[u8], run_afterwards: bool) -> Result<(), InputError> {
        let action = if run_afterwards {
            Action::ProgramEepromThenRun
        } else {
            Action::ProgramEepromThenShutdown
        };
        self.start(action, Some(image))
    }

    /// Starts an action.
    ///
    /// The image is required for actions that deliver one (see
    /// [`Action::requires_image`]) and ignored otherwise. The image data is
    /// verified and encoded before this call returns; the transfer itself
    /// happens on the worker.
    pub fn start(&self, action: Action, image: Option<&[u8]>) -> Result<(), InputError> {
        if !action.is_performable() {
            return Err(InputError::InvalidArgument(format!(
                "invalid action specified ({action})"
            )));
        }

        let inner = &self.inner;
        let mut counter = inner.counter.lock().unwrap();

        if inner.is_busy() {
            return Err(InputError::Busy(inner.current_activity()));
        }

        // Lock in the settings; later changes affect only the next action.
        let settings = inner.settings.lock().unwrap().clone();

        *counter += 1;

        let mut profiler = Profiler::start(
            action,
            settings.baudrate,
            settings.reset_duration,
            settings.boot_wait_duration,
        );

        let (encoded_image, image_size_in_longs) = if action.requires_image() {
            let Some(image) = image else {
                return Err(InputError::InvalidArgument(format!(
                    "the '{action}' action requires an image"
                )));
            };
            profiler.will_start_encoding_image(image.len());
            let (encoded_image, num_longs) = verify_and_encode(image)?;
            profiler.finished_encoding_image(encoded_image.len());
            (encoded_image, num_longs)
        } else {
            (Vec::new(), 0)
        };

        let Some(port) = inner.port.lock().unwrap().take() else {
            return Err(InputError::InvalidArgument(
                "the serial port is no longer available".into(),
            ));
        };

        // The action will proceed; nothing can fail from this point on.
        inner.is_cancelled.store(false, Ordering::SeqCst);
        *inner.last_checkpoint.lock().unwrap() = "launching worker";
        inner.action.store(action as u8, Ordering::SeqCst);

        let ctx = ActionContext {
            action,
            settings,
            port,
            encoded_image,
            image_size_in_longs,
            scratch: Vec::new(),
            profiler,
            cancelled: Arc::clone(&inner.is_cancelled),
            last_checkpoint: Arc::clone(&inner.last_checkpoint),
        };

        drop(counter);

        info!("starting action '{action}'");
        let worker_inner = Arc::clone(inner);
        thread::spawn(move || worker_inner.action_thread(ctx));
        Ok(())
    }

    // Action Control ----------------------------------------------------------

    /// Whether an action is in progress.
    pub fn is_busy(&self) -> bool {
        self.inner.is_busy()
    }

    /// Describes what the runner is doing: the current action and its last
    /// checkpoint, or that it is idle.
    pub fn current_activity(&self) -> String {
        self.inner.current_activity()
    }

    /// Cancels the action in flight and returns without waiting for the
    /// cancellation to take effect. Does nothing if the runner is idle.
    ///
    /// The worker observes the flag at its next checkpoint and terminates
    /// with [`ErrorCode::Cancelled`].
    pub fn cancel(&self) {
        let _guard = self.inner.counter.lock().unwrap();
        // Setting the flag when not busy is meaningless but not harmful;
        // it is cleared before every start.
        self.inner.is_cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancels the action in flight and waits for the cancellation to take
    /// effect, or until `timeout` elapses. Returns immediately if the
    /// runner is idle. A zero timeout disables the bound.
    ///
    /// Must not be called from an observer callback.
    pub fn cancel_and_wait(&self, timeout: Duration) -> Result<(), TimeoutError> {
        // Cancelling and starting to wait happen with the runner mutex held
        // continuously, so the action being waited on is the action that
        // was just cancelled.
        let guard = self.inner.counter.lock().unwrap();
        if !self.inner.is_busy() {
            return Ok(());
        }
        self.inner.is_cancelled.store(true, Ordering::SeqCst);
        self.inner.wait_until_finished_locked(guard, timeout)
    }

    /// Blocks until the action in flight finishes, or until `timeout`
    /// elapses. Returns immediately if the runner is idle. A zero timeout
    /// disables the bound.
    ///
    /// Must not be called from an observer callback.
    pub fn wait_until_finished(&self, timeout: Duration) -> Result<(), TimeoutError> {
        let guard = self.inner.counter.lock().unwrap();
        if !self.inner.is_busy() {
            return Ok(());
        }
        self.inner.wait_until_finished_locked(guard, timeout)
    }

    // Settings ----------------------------------------------------------------

    /// A snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.inner.settings.lock().unwrap().clone()
    }

    /// Replaces the settings wholesale. A [`Settings`] value is already
    /// validated, so this cannot fail.
    pub fn set_settings(&self, settings: Settings) {
        *self.inner.settings.lock().unwrap() = settings;
    }

    /// The configured baudrate.
    pub fn baudrate(&self) -> u32 {
        self.inner.settings.lock().unwrap().baudrate
    }

    /// Sets the baudrate. May not exceed 115200 bps, the fastest rate the
    /// booter program supports reliably.
    pub fn set_baudrate(&self, baudrate: u32) -> Result<(), InputError> {
        validate_baudrate(baudrate)?;
        self.inner.settings.lock().unwrap().baudrate = baudrate;
        Ok(())
    }

    /// The control line used to reset the Propeller.
    pub fn reset_line(&self) -> ResetLine {
        self.inner.settings.lock().unwrap().reset_line
    }

    /// Sets the control line used to reset the Propeller. When
    /// [`ResetLine::Callback`] is selected a callback must be provided
    /// before the next action, or the action fails with
    /// [`ErrorCode::FailedToReset`].
    pub fn set_reset_line(&self, reset_line: ResetLine) {
        self.inner.settings.lock().unwrap().reset_line = reset_line;
    }

    /// The user supplied reset function, if any.
    pub fn reset_callback(&self) -> Option<ResetCallback> {
        self.inner.settings.lock().unwrap().reset_callback.clone()
    }

    /// Sets the function performing the reset under
    /// [`ResetLine::Callback`].
    pub fn set_reset_callback(&self, reset_callback: Option<ResetCallback>) {
        self.inner.settings.lock().unwrap().reset_callback = reset_callback;
    }

    /// How long the reset line is held low.
    pub fn reset_duration(&self) -> Duration {
        self.inner.settings.lock().unwrap().reset_duration
    }

    /// Sets the reset hold time. Must be between 1 and 100 milliseconds.
    pub fn set_reset_duration(&self, reset_duration: Duration) -> Result<(), InputError> {
        validate_reset_duration(reset_duration)?;
        self.inner.settings.lock().unwrap().reset_duration = reset_duration;
        Ok(())
    }

    /// How long the loader waits for the Propeller to boot after a reset.
    pub fn boot_wait_duration(&self) -> Duration {
        self.inner.settings.lock().unwrap().boot_wait_duration
    }

    /// Sets the boot wait. Must be between 50 and 150 milliseconds.
    pub fn set_boot_wait_duration(&self, boot_wait_duration: Duration) -> Result<(), InputError> {
        validate_boot_wait_duration(boot_wait_duration)?;
        self.inner.settings.lock().unwrap().boot_wait_duration = boot_wait_duration;
        Ok(())
    }

    /// Sets the observer notified of action progress, or removes it.
    pub fn set_status_observer(&self, observer: Option<Arc<dyn StatusObserver>>) {
        self.inner.settings.lock().unwrap().observer = observer;
    }

    // Port Handover -----------------------------------------------------------

    /// Releases the serial port so another controller can use it. Refuses
    /// with [`InputError::Busy`] while an action is in progress.
    ///
    /// The next action transparently reclaims and reopens the port.
    pub fn will_make_inactive(&self) -> Result<(), InputError> {
        let _guard = self.inner.counter.lock().unwrap();
        if self.inner.is_busy() {
            return Err(InputError::Busy(self.inner.current_activity()));
        }
        if let Some(port) = self.inner.port.lock().unwrap().as_mut() {
            if let Err(e) = port.release() {
                warn!("failed to release the port: {e}");
            }
        }
        Ok(())
    }
}

impl Drop for ActionRunner {
    fn drop(&mut self) {
        // Wait indefinitely: a runner never outlives its worker.
        let _ = self.cancel_and_wait(Duration::ZERO);
    }
}

// =============================================================================
// Private stuff
// =============================================================================

struct RunnerInner {
    /// The live settings. Snapshotted into the action context at start.
    settings: Mutex<Settings>,
    /// The runner mutex. Guards action lifecycle transitions and carries
    /// the action counter; pairs with `finished`.
    counter: Mutex<u32>,
    /// Notified when an action finishes.
    finished: Condvar,
    /// The discriminant of the action being performed. Written only with
    /// the runner mutex held; read lock-free for busy checks, cancellation
    /// polling, and diagnostics.
    action: AtomicU8,
    /// Set by `cancel`; observed by the worker at checkpoints. Meaningful
    /// only while an action runs, and cleared before every start. Written
    /// only with the runner mutex held.
    is_cancelled: Arc<AtomicBool>,
    /// The last checkpoint the worker passed. Reads may be slightly stale,
    /// which is acceptable for diagnostics.
    last_checkpoint: Arc<Mutex<&'static str>>,
    /// Serializes observer callbacks across actions: held around
    /// `will_begin` of action N+1 and around `finished` of action N.
    callback_order: Mutex<()>,
    /// The serial device. Taken by the worker for the duration of an
    /// action and restored when it finishes.
    port: Mutex<Option<Box<dyn LoaderPort>>>,
}

impl RunnerInner {
    fn current_action(&self) -> Action {
        Action::from_repr(self.action.load(Ordering::SeqCst))
    }

    fn is_busy(&self) -> bool {
        self.current_action() != Action::None
    }

    fn current_activity(&self) -> String {
        let action = self.current_action();
        if action == Action::None {
            "Loader is idle.".to_string()
        } else {
            format!(
                "Action: {}. Last checkpoint: {}.",
                action,
                *self.last_checkpoint.lock().unwrap()
            )
        }
    }

    /// The body of the worker thread: run the action through the state
    /// machine and report the outcome. Nothing escapes this function; a
    /// panic anywhere in the action is a bug and is reported as
    /// [`ErrorCode::UnhandledException`].
    fn action_thread(&self, ctx: ActionContext) {
        let action = ctx.action;
        let observer = ctx.settings.observer.clone();

        let perform = || {
            // Blocks this worker until the previous action's finished
            // callback has returned.
            {
                let _order = self.callback_order.lock().unwrap();
                if let Some(observer) = &observer {
                    observer.will_begin(
                        action,
                        ctx.profiler.summary().total_time,
                        ctx.profiler.estimated_total_time(),
                    );
                }
            }
            run_action(ctx)
        };

        match panic::catch_unwind(AssertUnwindSafe(perform)) {
            Ok((ctx, outcome)) => {
                let ActionContext {
                    port, mut profiler, ..
                } = ctx;
                let (error_code, details) = match outcome {
                    Ok(()) => {
                        profiler.end_ok();
                        (ErrorCode::None, String::new())
                    }
                    Err(e) => {
                        profiler.end_with_error(e.code);
                        (e.code, e.details)
                    }
                };
                let summary = profiler.summary().clone();
                self.finish_and_notify(Some(port), observer, error_code, details, summary);
            }
            Err(_) => {
                // The context, and with it the port, unwound with the
                // panic.
                let details = format!(
                    "{} A panic occurred on the action worker.",
                    self.current_activity()
                );
                let summary = ActionSummary {
                    action,
                    error_code: ErrorCode::UnhandledException,
                    ..ActionSummary::default()
                };
                self.finish_and_notify(
                    None,
                    observer,
                    ErrorCode::UnhandledException,
                    details,
                    summary,
                );
            }
        }
    }

    fn finish_and_notify(
        &self,
        port: Option<Box<dyn LoaderPort>>,
        observer: Option<Arc<dyn StatusObserver>>,
        error_code: ErrorCode,
        details: String,
        summary: ActionSummary,
    ) {
        // Restore the port before the action officially finishes, so the
        // next start finds it in place.
        if let Some(port) = port {
            *self.port.lock().unwrap() = Some(port);
        }

        // Holding the order mutex across finish_action and the callback
        // keeps the next action's will_begin sequenced after our finished.
        let _order = self.callback_order.lock().unwrap();

        self.finish_action();

        if error_code == ErrorCode::None {
            info!("action '{}' finished", summary.action);
        } else {
            info!(
                "action '{}' failed: {}: {}",
                summary.action, error_code, details
            );
        }
        if let Some(observer) = observer {
            observer.finished(error_code, &details, &summary);
        }
    }

    /// Officially finishes the action: the runner reads as idle and any
    /// waiting threads are released.
    fn finish_action(&self) {
        let guard = self.counter.lock().unwrap();
        *self.last_checkpoint.lock().unwrap() = "finished";
        self.action.store(Action::None as u8, Ordering::SeqCst);
        drop(guard);
        self.finished.notify_all();
    }

    /// Waits on the finished condition. Expects the runner mutex guard,
    /// already locked.
    ///
    /// The counter identifies the action being waited on: if the runner is
    /// busy but the counter moved, another action snuck in after ours
    /// finished, which still means ours finished. (There is no guarantee a
    /// waiting thread reacquires the mutex before a new starter does.)
    fn wait_until_finished_locked(
        &self,
        guard: MutexGuard<'_, u32>,
        timeout: Duration,
    ) -> Result<(), TimeoutError> {
        let original_counter = *guard;
        if timeout.is_zero() {
            let _guard = self
                .finished
                .wait_while(guard, |counter| {
                    self.is_busy() && *counter == original_counter
                })
                .unwrap();
            Ok(())
        } else {
            let (guard, result) = self
                .finished
                .wait_timeout_while(guard, timeout, |counter| {
                    self.is_busy() && *counter == original_counter
                })
                .unwrap();
            if result.timed_out() && self.is_busy() && *guard == original_counter {
                Err(TimeoutError)
            } else {
                Ok(())
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Status;
    use crate::protocol::payloads::{ENCODED_LOAD_RAM, INIT_BYTES, PROP_AUTH_BYTES};
    use crate::testutil::{version_response, ObserverEvent, RecordingObserver, SimPort};
    use std::time::Instant;

    const STATUS_OK: u8 = 0xFE;
    const STATUS_FAIL: u8 = 0xFF;

    /// A runner wired to the given simulator with fast but valid timings.
    fn runner_with(port: SimPort, observer: Arc<RecordingObserver>) -> ActionRunner {
        let runner = ActionRunner::new(Box::new(port));
        runner
            .set_reset_duration(Duration::from_millis(1))
            .unwrap();
        runner
            .set_boot_wait_duration(Duration::from_millis(50))
            .unwrap();
        runner.set_status_observer(Some(observer));
        runner
    }

    fn finished_code(observer: &RecordingObserver) -> ErrorCode {
        observer
            .wait_for_finished(1, Duration::from_secs(10))
            .expect("action did not finish in time")
            .0
    }

    #[test]
    fn restart_happy_path() {
        let port = SimPort::new();
        let handle = port.handle();
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.restart().unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::None);

        let events = observer.events();
        assert!(matches!(events[0], ObserverEvent::WillBegin(Action::Restart)));
        assert!(matches!(events[1], ObserverEvent::Update(Status::Resetting)));
        assert!(matches!(events[2], ObserverEvent::Finished(ErrorCode::None, _)));
        assert_eq!(events.len(), 3);

        // A restart only toggles the reset line; nothing goes on the wire.
        assert_eq!(handle.reset_count(), 1);
        assert!(handle.written().is_empty());
    }

    #[test]
    fn load_ram_happy_path() {
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&version_response(1));
        port.queue_response(&[STATUS_OK]);
        let handle = port.handle();
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        let (code, summary) = observer
            .wait_for_finished(1, Duration::from_secs(10))
            .unwrap();
        assert_eq!(code, ErrorCode::None);

        let statuses: Vec<Status> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Update(status) => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                Status::Resetting,
                Status::EstablishingCommunications,
                Status::SendingCommandAndImage,
                Status::WaitingForChecksumStatus,
            ]
        );

        assert!(summary.was_successful);
        assert_eq!(summary.action, Action::LoadRam);
        assert_eq!(summary.image_size, 4);
        assert_eq!(summary.encoded_image_size, 8);
        assert_eq!(handle.input_flushes(), 1);

        // Wire order: init sequence, command word, encoded image size (one
        // long, value 1), encoded image, then status prompts.
        let written = handle.written();
        assert_eq!(&written[..199], &INIT_BYTES[..]);
        assert_eq!(&written[199..210], &ENCODED_LOAD_RAM[..]);
        let mut encoded_size = Vec::new();
        crate::protocol::Bit3Encoder::new(&mut encoded_size).encode_long(1);
        assert_eq!(&written[210..210 + encoded_size.len()], &encoded_size[..]);
        assert!(written[210 + encoded_size.len() + 8..]
            .iter()
            .all(|&b| b == 0x29));
    }

    #[test]
    fn program_eeprom_happy_path() {
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&version_response(1));
        port.queue_response(&[STATUS_OK, STATUS_OK, STATUS_OK]);
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.program_eeprom(&[0x01, 0x02, 0x03, 0x04], true).unwrap();
        let (code, summary) = observer
            .wait_for_finished(1, Duration::from_secs(10))
            .unwrap();
        assert_eq!(code, ErrorCode::None);
        assert_eq!(summary.action, Action::ProgramEepromThenRun);

        let statuses: Vec<Status> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Update(status) => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                Status::Resetting,
                Status::EstablishingCommunications,
                Status::SendingCommandAndImage,
                Status::WaitingForChecksumStatus,
                Status::WaitingForEepromProgrammingStatus,
                Status::WaitingForEepromVerificationStatus,
            ]
        );
    }

    #[test]
    fn authentication_failure() {
        let port = SimPort::new();
        port.queue_response(&[0u8; 125]);
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::FailedToAuthenticateProp);
    }

    #[test]
    fn unsupported_chip_version() {
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&version_response(2));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::UnsupportedChipVersion);
    }

    #[test]
    fn undecodable_chip_version() {
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&[0x12, 0x34, 0x56, 0x78]);
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::FailedToDecodeChipVersion);
    }

    #[test]
    fn checksum_failure() {
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&version_response(1));
        port.queue_response(&[STATUS_FAIL]);
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::PropReportsChecksumError);
    }

    #[test]
    fn checksum_status_timeout() {
        // Authenticated fine, but the Propeller never answers the prompts.
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&version_response(1));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(
            finished_code(&observer),
            ErrorCode::FailedToReceiveChecksumStatus
        );
    }

    #[test]
    fn cancellation_during_image_send() {
        let port = SimPort::new();
        port.queue_response(&PROP_AUTH_BYTES);
        port.queue_response(&version_response(1));
        // Throttle writes so the image send takes a while.
        port.set_write_limit(64);
        port.set_write_delay(Duration::from_millis(5));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        // 8 KiB of zeroes encodes to roughly 21 KiB on the wire.
        runner.load_ram(&vec![0u8; 8192]).unwrap();

        // Give the worker time to get into the image send, then cancel.
        thread::sleep(Duration::from_millis(400));
        let cancelled_at = Instant::now();
        runner.cancel_and_wait(Duration::from_secs(5)).unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));

        let (code, _) = observer
            .wait_for_finished(1, Duration::from_secs(5))
            .unwrap();
        assert_eq!(code, ErrorCode::Cancelled);
        assert!(!runner.is_busy());
    }

    #[test]
    fn double_start_fails_busy() {
        let port = SimPort::new();
        port.set_write_limit(16);
        port.set_write_delay(Duration::from_millis(10));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&vec![0u8; 1024]).unwrap();
        let second = runner.load_ram(&[1, 2, 3, 4]);
        assert!(matches!(second, Err(InputError::Busy(_))));

        // The first action is unaffected by the refused second start.
        runner.cancel_and_wait(Duration::from_secs(5)).unwrap();
        let (code, _) = observer
            .wait_for_finished(1, Duration::from_secs(5))
            .unwrap();
        assert_eq!(code, ErrorCode::Cancelled);
    }

    #[test]
    fn callbacks_are_totally_ordered_across_actions() {
        let port = SimPort::new();
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.restart().unwrap();
        observer.wait_for_finished(1, Duration::from_secs(5)).unwrap();
        runner.restart().unwrap();
        observer.wait_for_finished(2, Duration::from_secs(5)).unwrap();

        // Each will_begin is paired with exactly one finished, and the
        // second will_begin comes after the first finished.
        let kinds: Vec<&'static str> = observer
            .events()
            .iter()
            .map(|e| match e {
                ObserverEvent::WillBegin(_) => "begin",
                ObserverEvent::Update(_) => "update",
                ObserverEvent::Finished(_, _) => "finished",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["begin", "update", "finished", "begin", "update", "finished"]
        );
    }

    #[test]
    fn setters_validate_bounds() {
        let runner = ActionRunner::new(Box::new(SimPort::new()));
        assert!(runner.set_baudrate(115_201).is_err());
        assert!(runner.set_baudrate(115_200).is_ok());
        assert!(runner.set_reset_duration(Duration::ZERO).is_err());
        assert!(runner
            .set_reset_duration(Duration::from_millis(101))
            .is_err());
        assert!(runner
            .set_boot_wait_duration(Duration::from_millis(49))
            .is_err());
        assert!(runner
            .set_boot_wait_duration(Duration::from_millis(151))
            .is_err());
        // A rejected value leaves the previous setting in place.
        assert_eq!(runner.baudrate(), 115_200);
    }

    #[test]
    fn start_rejects_the_idle_action() {
        let runner = ActionRunner::new(Box::new(SimPort::new()));
        assert!(matches!(
            runner.start(Action::None, None),
            Err(InputError::InvalidArgument(_))
        ));
    }

    #[test]
    fn start_requires_an_image_when_the_action_does() {
        let runner = ActionRunner::new(Box::new(SimPort::new()));
        assert!(matches!(
            runner.start(Action::LoadRam, None),
            Err(InputError::InvalidArgument(_))
        ));
    }

    #[test]
    fn invalid_image_does_not_mark_busy() {
        let port = SimPort::new();
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        assert!(matches!(
            runner.load_ram(&[]),
            Err(InputError::InvalidImage(_))
        ));
        assert!(matches!(
            runner.load_ram(&vec![0u8; 32_769]),
            Err(InputError::InvalidImage(_))
        ));
        assert!(!runner.is_busy());

        // The runner is still fully usable.
        runner.restart().unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::None);
    }

    #[test]
    fn port_access_refusal_fails_the_action() {
        let port = SimPort::new();
        port.set_refuse_active(true);
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.restart().unwrap();
        assert_eq!(
            finished_code(&observer),
            ErrorCode::FailedToObtainPortAccess
        );
    }

    #[test]
    fn reset_callback_failure() {
        let port = SimPort::new();
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());
        runner.set_reset_line(ResetLine::Callback);
        // Callback selected but never provided.
        runner.restart().unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::FailedToReset);
    }

    #[test]
    fn reset_callback_is_invoked() {
        let port = SimPort::new();
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        runner.set_reset_line(ResetLine::Callback);
        runner.set_reset_callback(Some(Arc::new(move |_duration| {
            called_clone.store(true, Ordering::SeqCst);
            Ok(())
        })));

        runner.restart().unwrap();
        assert_eq!(finished_code(&observer), ErrorCode::None);
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_until_finished_is_immediate_when_idle() {
        let runner = ActionRunner::new(Box::new(SimPort::new()));
        runner.wait_until_finished(Duration::from_millis(1)).unwrap();
        runner.cancel_and_wait(Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn wait_until_finished_times_out() {
        let port = SimPort::new();
        port.set_write_limit(16);
        port.set_write_delay(Duration::from_millis(10));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&vec![0u8; 2048]).unwrap();
        assert_eq!(
            runner.wait_until_finished(Duration::from_millis(20)),
            Err(TimeoutError)
        );
        runner.cancel_and_wait(Duration::from_secs(5)).unwrap();
        observer.wait_for_finished(1, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn will_make_inactive_refuses_while_busy() {
        let port = SimPort::new();
        port.set_write_limit(16);
        port.set_write_delay(Duration::from_millis(10));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        runner.load_ram(&vec![0u8; 2048]).unwrap();
        assert!(matches!(
            runner.will_make_inactive(),
            Err(InputError::Busy(_))
        ));
        runner.cancel_and_wait(Duration::from_secs(5)).unwrap();
        observer.wait_for_finished(1, Duration::from_secs(5)).unwrap();

        runner.will_make_inactive().unwrap();
        // The port is reclaimed transparently by the next action.
        runner.restart().unwrap();
        let (code, _) = observer
            .wait_for_finished(2, Duration::from_secs(5))
            .unwrap();
        assert_eq!(code, ErrorCode::None);
    }

    #[test]
    fn busy_message_names_the_action_and_checkpoint() {
        let port = SimPort::new();
        port.set_write_limit(16);
        port.set_write_delay(Duration::from_millis(10));
        let observer = Arc::new(RecordingObserver::default());
        let runner = runner_with(port, observer.clone());

        assert_eq!(runner.current_activity(), "Loader is idle.");
        runner.load_ram(&vec![0u8; 2048]).unwrap();
        let activity = runner.current_activity();
        assert!(activity.starts_with("Action: load RAM."), "{activity}");
        runner.cancel_and_wait(Duration::from_secs(5)).unwrap();
        observer.wait_for_finished(1, Duration::from_secs(5)).unwrap();
    }
}
