//! Events for the loader state machine.
//!
//! This module is private and restricted to the [`loader`](crate::loader)
//! scope. Each event owns the [`ActionContext`], which is how the context
//! travels from the state that finished to the state being entered. Refer to
//! the [`state_machine`](super::state_machine) module for an overview of
//! states, events and transitions.

use std::fmt;
use std::time::Instant;

use super::{ActionContext, ActionError};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Event fired after the port is prepared, to trigger the transition to the
/// reset state.
pub(crate) struct ResetEvent {
    pub ctx: ActionContext,
}

/// Event fired after the reset, for actions that go on to talk to the
/// booter program. Triggers the transition to the boot wait state.
pub(crate) struct BootWaitEvent {
    pub ctx: ActionContext,
}

/// Event fired once the Propeller has had time to boot. Triggers the
/// transition to the handshake state.
pub(crate) struct HandshakeEvent {
    pub ctx: ActionContext,
}

/// Event fired after a successful handshake. Triggers the transition to the
/// command state.
pub(crate) struct CommandEvent {
    pub ctx: ActionContext,
}

/// Event fired after the command is buffered, for actions that carry an
/// image. Triggers the transition to the image send state.
///
/// Carries the estimated drain time of the command bytes; the image send
/// state extends it with the transit time of the image itself.
pub(crate) struct SendImageEvent {
    pub ctx: ActionContext,
    pub stage4_drain: Instant,
}

/// Event fired once the image is on the wire. Triggers the transition to
/// the checksum status poll.
pub(crate) struct AwaitChecksumEvent {
    pub ctx: ActionContext,
}

/// Event fired after a good checksum, for the EEPROM programming actions.
/// Triggers the transition to the programming status poll.
pub(crate) struct AwaitProgrammingEvent {
    pub ctx: ActionContext,
}

/// Event fired after the EEPROM has been programmed. Triggers the
/// transition to the verification status poll.
pub(crate) struct AwaitVerificationEvent {
    pub ctx: ActionContext,
}

/// The final event of every action, successful or not. Triggers the
/// transition to the done state, whose outcome the runner reports through
/// the observer.
pub(crate) struct DoneEvent {
    pub ctx: ActionContext,
    pub outcome: Result<(), ActionError>,
}

/// Events that can be triggered within the loader state machine.
///
/// Each value holds an event, which owns the action context and any
/// additional data the target state needs.
pub(crate) enum Event {
    Reset(ResetEvent),
    BootWait(BootWaitEvent),
    Handshake(HandshakeEvent),
    Command(CommandEvent),
    SendImage(SendImageEvent),
    AwaitChecksum(AwaitChecksumEvent),
    AwaitProgramming(AwaitProgrammingEvent),
    AwaitVerification(AwaitVerificationEvent),
    Done(DoneEvent),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Reset(_) => "Reset",
            Event::BootWait(_) => "BootWait",
            Event::Handshake(_) => "Handshake",
            Event::Command(_) => "Command",
            Event::SendImage(_) => "SendImage",
            Event::AwaitChecksum(_) => "AwaitChecksum",
            Event::AwaitProgramming(_) => "AwaitProgramming",
            Event::AwaitVerification(_) => "AwaitVerification",
            Event::Done(_) => "Done",
        };
        f.debug_tuple(name).finish()
    }
}
