//! The error surface of the loader.
//!
//! Two kinds of errors cross the public boundary. Input errors
//! ([`InputError`]) are reported synchronously from `start` and the settings
//! setters. Action errors ([`ActionError`]) happen on the worker thread and
//! are reported asynchronously through
//! [`StatusObserver::finished`](super::StatusObserver::finished), carrying a
//! stable [`ErrorCode`] plus a human-readable detail string captured at the
//! failing call site.

use std::fmt;

use thiserror::Error;

// =============================================================================
// Public Interface
// =============================================================================

/// Identifies the primary reason a loader action has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::enum_variant_names)]
pub enum ErrorCode {
    /// The action finished without error.
    #[default]
    None,
    /// The action was cancelled; the detail string carries the checkpoint at
    /// which the cancellation was observed.
    Cancelled,
    /// Another controller is using the port and refuses to relinquish it.
    FailedToObtainPortAccess,
    FailedToOpenPort,
    FailedToFlushOutput,
    FailedToSetBaudrate,
    /// Specifically, the serial port's read and write timeouts.
    FailedToSetTimeout,
    FailedToSetBytesize,
    FailedToSetParity,
    FailedToSetStopbits,
    FailedToSetFlowcontrol,
    FailedToReset,
    FailedToFlushInput,
    FailedToSendInitialBytes,
    /// The authentication data was not received.
    FailedToReceivePropAuthentication,
    /// The authentication data was received, but it was not correct.
    FailedToAuthenticateProp,
    /// The chip version was not received.
    FailedToReceiveChipVersion,
    /// The chip version was received, but was not valid 3BP.
    FailedToDecodeChipVersion,
    /// The chip version was received, but is not supported.
    UnsupportedChipVersion,
    FailedToSendCommand,
    FailedToEncodeImageSize,
    FailedToSendImageSize,
    FailedToSendImage,
    /// A transmission prompt necessary to get a status code could not be
    /// sent.
    FailedToSendStatusPrompt,
    FailedToReceiveChecksumStatus,
    PropReportsChecksumError,
    FailedToReceiveEepromProgrammingStatus,
    PropReportsEepromProgrammingError,
    FailedToReceiveEepromVerificationStatus,
    PropReportsEepromVerificationError,
    /// A bug in this crate: something escaped the worker unclassified.
    UnhandledException,
}

impl ErrorCode {
    /// The stable identifier of the code, suitable for log parsing and
    /// programmatic matching across releases.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::None => "None",
            ErrorCode::Cancelled => "Cancelled",
            ErrorCode::FailedToObtainPortAccess => "FailedToObtainPortAccess",
            ErrorCode::FailedToOpenPort => "FailedToOpenPort",
            ErrorCode::FailedToFlushOutput => "FailedToFlushOutput",
            ErrorCode::FailedToSetBaudrate => "FailedToSetBaudrate",
            ErrorCode::FailedToSetTimeout => "FailedToSetTimeout",
            ErrorCode::FailedToSetBytesize => "FailedToSetBytesize",
            ErrorCode::FailedToSetParity => "FailedToSetParity",
            ErrorCode::FailedToSetStopbits => "FailedToSetStopbits",
            ErrorCode::FailedToSetFlowcontrol => "FailedToSetFlowcontrol",
            ErrorCode::FailedToReset => "FailedToReset",
            ErrorCode::FailedToFlushInput => "FailedToFlushInput",
            ErrorCode::FailedToSendInitialBytes => "FailedToSendInitialBytes",
            ErrorCode::FailedToReceivePropAuthentication => "FailedToReceivePropAuthentication",
            ErrorCode::FailedToAuthenticateProp => "FailedToAuthenticateProp",
            ErrorCode::FailedToReceiveChipVersion => "FailedToReceiveChipVersion",
            ErrorCode::FailedToDecodeChipVersion => "FailedToDecodeChipVersion",
            ErrorCode::UnsupportedChipVersion => "UnsupportedChipVersion",
            ErrorCode::FailedToSendCommand => "FailedToSendCommand",
            ErrorCode::FailedToEncodeImageSize => "FailedToEncodeImageSize",
            ErrorCode::FailedToSendImageSize => "FailedToSendImageSize",
            ErrorCode::FailedToSendImage => "FailedToSendImage",
            ErrorCode::FailedToSendStatusPrompt => "FailedToSendStatusPrompt",
            ErrorCode::FailedToReceiveChecksumStatus => "FailedToReceiveChecksumStatus",
            ErrorCode::PropReportsChecksumError => "PropReportsChecksumError",
            ErrorCode::FailedToReceiveEepromProgrammingStatus => {
                "FailedToReceiveEepromProgrammingStatus"
            }
            ErrorCode::PropReportsEepromProgrammingError => "PropReportsEepromProgrammingError",
            ErrorCode::FailedToReceiveEepromVerificationStatus => {
                "FailedToReceiveEepromVerificationStatus"
            }
            ErrorCode::PropReportsEepromVerificationError => "PropReportsEepromVerificationError",
            ErrorCode::UnhandledException => "UnhandledException",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            ErrorCode::None => "none",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::FailedToObtainPortAccess => "failed to obtain port access",
            ErrorCode::FailedToOpenPort => "failed to open port",
            ErrorCode::FailedToFlushOutput => "failed to flush output",
            ErrorCode::FailedToSetBaudrate => "failed to set baudrate",
            ErrorCode::FailedToSetTimeout => "failed to set timeout",
            ErrorCode::FailedToSetBytesize => "failed to set bytesize",
            ErrorCode::FailedToSetParity => "failed to set parity",
            ErrorCode::FailedToSetStopbits => "failed to set stopbits",
            ErrorCode::FailedToSetFlowcontrol => "failed to set flowcontrol",
            ErrorCode::FailedToReset => "failed to reset",
            ErrorCode::FailedToFlushInput => "failed to flush input",
            ErrorCode::FailedToSendInitialBytes => "failed to send initial bytes",
            ErrorCode::FailedToReceivePropAuthentication => {
                "failed to receive Propeller authentication"
            }
            ErrorCode::FailedToAuthenticateProp => "failed to authenticate Propeller",
            ErrorCode::FailedToReceiveChipVersion => "failed to receive chip version",
            ErrorCode::FailedToDecodeChipVersion => "failed to decode chip version",
            ErrorCode::UnsupportedChipVersion => "unsupported chip version",
            ErrorCode::FailedToSendCommand => "failed to send command",
            ErrorCode::FailedToEncodeImageSize => "failed to encode image size",
            ErrorCode::FailedToSendImageSize => "failed to send image size",
            ErrorCode::FailedToSendImage => "failed to send image",
            ErrorCode::FailedToSendStatusPrompt => "failed to send status prompt",
            ErrorCode::FailedToReceiveChecksumStatus => "failed to receive checksum status",
            ErrorCode::PropReportsChecksumError => "Propeller reports checksum error",
            ErrorCode::FailedToReceiveEepromProgrammingStatus => {
                "failed to receive EEPROM programming status"
            }
            ErrorCode::PropReportsEepromProgrammingError => {
                "Propeller reports EEPROM programming error"
            }
            ErrorCode::FailedToReceiveEepromVerificationStatus => {
                "failed to receive EEPROM verification status"
            }
            ErrorCode::PropReportsEepromVerificationError => {
                "Propeller reports EEPROM verification error"
            }
            ErrorCode::UnhandledException => "BUG: unhandled exception",
        };
        f.write_str(description)
    }
}

/// A failure on the action worker.
///
/// Every failure inside the worker is converted into an `ActionError` at the
/// call site with the most specific context: a primary [`ErrorCode`] plus
/// secondary detail in `details`.
#[derive(Debug, Clone, Error)]
#[error("{code}: {details}")]
pub struct ActionError {
    /// The primary error.
    pub code: ErrorCode,
    /// Additional information about the error.
    pub details: String,
}

impl ActionError {
    pub(crate) fn new(code: ErrorCode, details: impl Into<String>) -> Self {
        ActionError {
            code,
            details: details.into(),
        }
    }
}

/// An error reported synchronously from `start` or a settings setter.
#[derive(Debug, Clone, Error)]
pub enum InputError {
    /// A value violates its documented bounds.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The image is empty or exceeds the Propeller's hub RAM size.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// An action is already in progress; the message describes it.
    #[error("the loader is busy: {0}")]
    Busy(String),
}

/// A bounded wait elapsed before the action finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timeout occurred while waiting for the action to finish")]
pub struct TimeoutError;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable_identifiers() {
        assert_eq!(ErrorCode::Cancelled.name(), "Cancelled");
        assert_eq!(
            ErrorCode::PropReportsChecksumError.name(),
            "PropReportsChecksumError"
        );
        assert_eq!(
            ErrorCode::FailedToReceiveEepromVerificationStatus.name(),
            "FailedToReceiveEepromVerificationStatus"
        );
    }

    #[test]
    fn action_error_displays_code_and_details() {
        let err = ActionError::new(ErrorCode::FailedToOpenPort, "no such device");
        assert_eq!(err.to_string(), "failed to open port: no such device");
    }
}
