//! Settings for the serial link and the reset behavior of the loader.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values. Settings may also be changed on a
//! live [`ActionRunner`](crate::ActionRunner) at any time; the runner
//! snapshots them when an action starts, so changes never affect an action
//! already in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::loader::{InputError, StatusObserver};
use crate::protocol::Bit3Encoder;

// =============================================================================
// Public Interface
// =============================================================================

/// The control lines the loader may use to trigger a Propeller reset.
///
/// The `Callback` option defers the responsibility of toggling the reset line
/// to user code, for setups where the Propeller's reset pin is wired to
/// something other than the serial port's DTR or RTS lines (e.g. a GPIO pin
/// on a Raspberry Pi).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetLine {
    /// Data Terminal Ready. The default.
    #[default]
    Dtr,
    /// Request To Send.
    Rts,
    /// A user supplied [`ResetCallback`] performs the reset.
    Callback,
}

impl fmt::Display for ResetLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetLine::Dtr => write!(f, "DTR"),
            ResetLine::Rts => write!(f, "RTS"),
            ResetLine::Callback => write!(f, "callback"),
        }
    }
}

/// A user implemented Propeller reset.
///
/// The callback is expected to drop the reset line low, hold it low for the
/// given duration, then raise the line and return. It is called on the worker
/// thread created for the action. Returning an error (or panicking) aborts
/// the action with [`ErrorCode::FailedToReset`](crate::ErrorCode::FailedToReset).
pub type ResetCallback =
    Arc<dyn Fn(Duration) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Groups all settings used when performing a loader action.
///
/// A `Settings` value is always within bounds: construction goes through
/// [`SettingsBuilder::finalize`] or the individual validated setters on
/// [`ActionRunner`](crate::ActionRunner).
#[derive(Clone)]
pub struct Settings {
    pub(crate) baudrate: u32,
    pub(crate) reset_line: ResetLine,
    pub(crate) reset_callback: Option<ResetCallback>,
    pub(crate) reset_duration: Duration,
    pub(crate) boot_wait_duration: Duration,
    pub(crate) observer: Option<Arc<dyn StatusObserver>>,
}

impl Settings {
    /// The baudrate in symbols-per-second.
    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    /// The control line used to reset the Propeller.
    pub fn reset_line(&self) -> ResetLine {
        self.reset_line
    }

    /// The user supplied reset function, if any.
    pub fn reset_callback(&self) -> Option<ResetCallback> {
        self.reset_callback.clone()
    }

    /// How long the reset line is held low to initiate a reset.
    pub fn reset_duration(&self) -> Duration {
        self.reset_duration
    }

    /// How long the loader waits between releasing the reset line and
    /// initiating communications. In this interval the Propeller is
    /// restarting and entering its booter program.
    pub fn boot_wait_duration(&self) -> Duration {
        self.boot_wait_duration
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            baudrate: Bit3Encoder::MAX_BAUDRATE,
            reset_line: ResetLine::Dtr,
            reset_callback: None,
            reset_duration: Duration::from_millis(10),
            boot_wait_duration: Duration::from_millis(100),
            observer: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("baudrate", &self.baudrate)
            .field("reset_line", &self.reset_line)
            .field(
                "reset_callback",
                &self.reset_callback.as_ref().map(|_| "<fn>"),
            )
            .field("reset_duration", &self.reset_duration)
            .field("boot_wait_duration", &self.boot_wait_duration)
            .field("observer", &self.observer.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

/// The builder for [`Settings`] values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set. Bounds are checked once, in [`finalize`](Self::finalize).
///
/// **Example**
///
/// ```
/// use propcom::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().baudrate(57_600).finalize().unwrap();
/// assert_eq!(settings.baudrate(), 57_600);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Start building settings from the default values.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings::default(),
        }
    }

    /// Set the baudrate in symbols-per-second.
    ///
    /// The default is 115200 bps, which is also the fastest rate the
    /// Propeller's booter program supports reliably.
    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.settings.baudrate = baudrate;
        self
    }

    /// Set the control line used to reset the Propeller.
    pub fn reset_line(mut self, reset_line: ResetLine) -> Self {
        self.settings.reset_line = reset_line;
        self
    }

    /// Set the function performing the reset when [`ResetLine::Callback`] is
    /// selected.
    pub fn reset_callback(mut self, reset_callback: ResetCallback) -> Self {
        self.settings.reset_callback = Some(reset_callback);
        self
    }

    /// Set the duration the reset line is held low.
    pub fn reset_duration(mut self, reset_duration: Duration) -> Self {
        self.settings.reset_duration = reset_duration;
        self
    }

    /// Set the wait between the reset and the first transmission.
    pub fn boot_wait_duration(mut self, boot_wait_duration: Duration) -> Self {
        self.settings.boot_wait_duration = boot_wait_duration;
        self
    }

    /// Set the observer notified of action progress.
    pub fn observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.settings.observer = Some(observer);
        self
    }

    /// Validate all values and produce the settings.
    pub fn finalize(self) -> Result<Settings, InputError> {
        validate_baudrate(self.settings.baudrate)?;
        validate_reset_duration(self.settings.reset_duration)?;
        validate_boot_wait_duration(self.settings.boot_wait_duration)?;
        Ok(self.settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        SettingsBuilder::new()
    }
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

pub(crate) fn validate_baudrate(baudrate: u32) -> Result<(), InputError> {
    if baudrate == 0 {
        return Err(InputError::InvalidArgument(
            "baudrate may not be zero".into(),
        ));
    }
    if baudrate > Bit3Encoder::MAX_BAUDRATE {
        return Err(InputError::InvalidArgument(format!(
            "baudrate may not exceed {}",
            Bit3Encoder::MAX_BAUDRATE
        )));
    }
    Ok(())
}

pub(crate) fn validate_reset_duration(reset_duration: Duration) -> Result<(), InputError> {
    if reset_duration < Duration::from_millis(1) {
        return Err(InputError::InvalidArgument(
            "reset duration may not be less than 1 ms".into(),
        ));
    }
    if reset_duration > Duration::from_millis(100) {
        return Err(InputError::InvalidArgument(
            "reset duration may not be greater than 100 ms".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_boot_wait_duration(boot_wait_duration: Duration) -> Result<(), InputError> {
    if boot_wait_duration < Duration::from_millis(50) {
        return Err(InputError::InvalidArgument(
            "boot wait duration may not be less than 50 ms".into(),
        ));
    }
    if boot_wait_duration > Duration::from_millis(150) {
        return Err(InputError::InvalidArgument(
            "boot wait duration may not be greater than 150 ms".into(),
        ));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_default() {
        let settings = SettingsBuilder::new().finalize().unwrap();
        assert_eq!(settings.baudrate(), 115_200);
        assert_eq!(settings.reset_line(), ResetLine::Dtr);
        assert!(settings.reset_callback().is_none());
        assert_eq!(settings.reset_duration(), Duration::from_millis(10));
        assert_eq!(settings.boot_wait_duration(), Duration::from_millis(100));
    }

    #[test]
    fn baudrate() {
        let settings = SettingsBuilder::new().baudrate(9_600).finalize().unwrap();
        assert_eq!(settings.baudrate(), 9_600);
    }

    #[test]
    fn baudrate_bounds() {
        assert!(SettingsBuilder::new().baudrate(0).finalize().is_err());
        assert!(SettingsBuilder::new().baudrate(115_201).finalize().is_err());
        assert!(SettingsBuilder::new().baudrate(115_200).finalize().is_ok());
    }

    #[test]
    fn reset_line() {
        let settings = SettingsBuilder::new()
            .reset_line(ResetLine::Rts)
            .finalize()
            .unwrap();
        assert_eq!(settings.reset_line(), ResetLine::Rts);
    }

    #[test]
    fn reset_duration_bounds() {
        assert!(SettingsBuilder::new()
            .reset_duration(Duration::ZERO)
            .finalize()
            .is_err());
        assert!(SettingsBuilder::new()
            .reset_duration(Duration::from_millis(101))
            .finalize()
            .is_err());
        assert!(SettingsBuilder::new()
            .reset_duration(Duration::from_millis(1))
            .finalize()
            .is_ok());
        assert!(SettingsBuilder::new()
            .reset_duration(Duration::from_millis(100))
            .finalize()
            .is_ok());
    }

    #[test]
    fn boot_wait_duration_bounds() {
        assert!(SettingsBuilder::new()
            .boot_wait_duration(Duration::from_millis(49))
            .finalize()
            .is_err());
        assert!(SettingsBuilder::new()
            .boot_wait_duration(Duration::from_millis(151))
            .finalize()
            .is_err());
        assert!(SettingsBuilder::new()
            .boot_wait_duration(Duration::from_millis(50))
            .finalize()
            .is_ok());
        assert!(SettingsBuilder::new()
            .boot_wait_duration(Duration::from_millis(150))
            .finalize()
            .is_ok());
    }
}
