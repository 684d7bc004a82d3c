//! Actions the loader can perform and the statuses it reports on the way.

use std::fmt;

use crate::protocol::payloads::{
    ENCODED_LOAD_RAM, ENCODED_PROGRAM_EEPROM_THEN_RUN, ENCODED_PROGRAM_EEPROM_THEN_SHUTDOWN,
    ENCODED_SHUTDOWN,
};

// =============================================================================
// Public Interface
// =============================================================================

/// The actions the loader may perform.
///
/// `Shutdown`, `LoadRam`, and the two EEPROM programming actions interact
/// with the Propeller's booter program. `Restart` just toggles the reset
/// line without any interaction; the Propeller will eventually attempt to
/// run from its EEPROM. `None` means the loader is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Action {
    /// No action; the idle state of the runner.
    #[default]
    None = 0,
    /// Reset, then command the Propeller into its shutdown mode.
    Shutdown = 1,
    /// Load an image into hub RAM and run it.
    LoadRam = 2,
    /// Program the EEPROM with an image, then shutdown.
    ProgramEepromThenShutdown = 3,
    /// Program the EEPROM with an image, then run it.
    ProgramEepromThenRun = 4,
    /// Toggle the reset line and finish.
    Restart = 5,
}

impl Action {
    /// Whether this is a valid, performable action (anything but `None`).
    pub fn is_performable(self) -> bool {
        self != Action::None
    }

    /// Whether the action delivers an image to the Propeller.
    pub fn requires_image(self) -> bool {
        matches!(
            self,
            Action::LoadRam | Action::ProgramEepromThenShutdown | Action::ProgramEepromThenRun
        )
    }

    /// The command number the Propeller's booter program associates with the
    /// action. Actions without a command map to `0xFFFF_FFFF`, which if sent
    /// to the Propeller would cause it to shutdown.
    pub fn command(self) -> u32 {
        match self {
            Action::Shutdown => 0,
            Action::LoadRam => 1,
            Action::ProgramEepromThenShutdown => 2,
            Action::ProgramEepromThenRun => 3,
            Action::None | Action::Restart => 0xFFFF_FFFF,
        }
    }

    /// The pre-encoded 11-byte wire form of the action's command word, for
    /// actions that have one.
    pub(crate) fn encoded_command(self) -> Option<&'static [u8; 11]> {
        match self {
            Action::Shutdown => Some(&ENCODED_SHUTDOWN),
            Action::LoadRam => Some(&ENCODED_LOAD_RAM),
            Action::ProgramEepromThenShutdown => Some(&ENCODED_PROGRAM_EEPROM_THEN_SHUTDOWN),
            Action::ProgramEepromThenRun => Some(&ENCODED_PROGRAM_EEPROM_THEN_RUN),
            Action::None | Action::Restart => None,
        }
    }

    /// Recovers an action from its stored discriminant. Unknown values map
    /// to `None`; only discriminants produced by `as u8` are ever stored.
    pub(crate) fn from_repr(value: u8) -> Action {
        match value {
            1 => Action::Shutdown,
            2 => Action::LoadRam,
            3 => Action::ProgramEepromThenShutdown,
            4 => Action::ProgramEepromThenRun,
            5 => Action::Restart,
            _ => Action::None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::None => "none",
            Action::Shutdown => "shutdown",
            Action::LoadRam => "load RAM",
            Action::ProgramEepromThenShutdown => "program EEPROM then shutdown",
            Action::ProgramEepromThenRun => "program EEPROM then run",
            Action::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// The status of the loader while performing an action, reported through
/// [`StatusObserver::update`](super::StatusObserver::update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Resetting,
    EstablishingCommunications,
    SendingCommandAndImage,
    WaitingForChecksumStatus,
    WaitingForEepromProgrammingStatus,
    WaitingForEepromVerificationStatus,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Resetting => "resetting",
            Status::EstablishingCommunications => "establishing communications",
            Status::SendingCommandAndImage => "sending command and image",
            Status::WaitingForChecksumStatus => "waiting for checksum status",
            Status::WaitingForEepromProgrammingStatus => "waiting for EEPROM programming status",
            Status::WaitingForEepromVerificationStatus => "waiting for EEPROM verification status",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
