//! The loader state machine.
//!
//! A loader action is a fixed progression through seven protocol stages,
//! with three early exits for the actions that don't need the whole
//! sequence. The progression is modeled as a state machine: **states** do
//! the work of one stage each and request transitions by returning typed
//! **events**; transitions consume the origin state and are implemented with
//! the `From`/`Into` pattern, so only the transitions given a `From`
//! implementation exist and anything else is caught at compile time. The
//! action context rides along inside each event.
//!
//! ```text
//!  Preparation -> Reset -> BootWait -> Handshake -> Command -> SendImage
//!                   |                                  |           |
//!                (Restart)                        (Shutdown)       v
//!                   |                                  |     AwaitChecksum
//!                   v                                  v           |
//!                 Done <------- (LoadRam or error) ----+-----------+
//!                   ^                                              v
//!                   |                                     AwaitProgramming
//!                   |                                              |
//!                   +---------------- AwaitVerification <----------+
//! ```

use super::context::ActionContext;
use super::events::*;
use super::states::*;
use super::ActionError;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Runs an action to completion.
///
/// The event loop steps the state machine until the done state is reached,
/// then hands the context back together with the outcome so the runner can
/// restore the port and report the result.
pub(crate) fn run_action(ctx: ActionContext) -> (ActionContext, Result<(), ActionError>) {
    let mut sm = LoaderStates::Preparation(PreparationState { ctx });
    loop {
        match sm.step() {
            LoaderStates::Done(done) => return (done.ctx, done.outcome),
            next => sm = next,
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// An enum wrapper around the states of the loader state machine. It
/// provides a simple model for manipulating states and their transitions,
/// and it is what makes illegal transitions detectable.
enum LoaderStates {
    Preparation(PreparationState),
    Reset(ResetState),
    BootWait(BootWaitState),
    Handshake(HandshakeState),
    Command(CommandState),
    SendImage(SendImageState),
    AwaitChecksum(AwaitChecksumState),
    AwaitProgramming(AwaitProgrammingState),
    AwaitVerification(AwaitVerificationState),
    Done(DoneState),
}

impl LoaderStates {
    /// The unit of work in the state machine event loop: run the current
    /// state and turn the event it returns into the next state.
    fn step(self) -> Self {
        match self {
            LoaderStates::Preparation(sm) => {
                let event = sm.run();
                match event {
                    Event::Reset(ev) => LoaderStates::Reset(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the preparation state", event),
                }
            }
            LoaderStates::Reset(sm) => {
                let event = sm.run();
                match event {
                    Event::BootWait(ev) => LoaderStates::BootWait(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the reset state", event),
                }
            }
            LoaderStates::BootWait(sm) => {
                let event = sm.run();
                match event {
                    Event::Handshake(ev) => LoaderStates::Handshake(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the boot wait state", event),
                }
            }
            LoaderStates::Handshake(sm) => {
                let event = sm.run();
                match event {
                    Event::Command(ev) => LoaderStates::Command(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the handshake state", event),
                }
            }
            LoaderStates::Command(sm) => {
                let event = sm.run();
                match event {
                    Event::SendImage(ev) => LoaderStates::SendImage(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the command state", event),
                }
            }
            LoaderStates::SendImage(sm) => {
                let event = sm.run();
                match event {
                    Event::AwaitChecksum(ev) => LoaderStates::AwaitChecksum(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the image send state", event),
                }
            }
            LoaderStates::AwaitChecksum(sm) => {
                let event = sm.run();
                match event {
                    Event::AwaitProgramming(ev) => LoaderStates::AwaitProgramming(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the checksum wait state", event),
                }
            }
            LoaderStates::AwaitProgramming(sm) => {
                let event = sm.run();
                match event {
                    Event::AwaitVerification(ev) => LoaderStates::AwaitVerification(ev.into()),
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the programming wait state", event),
                }
            }
            LoaderStates::AwaitVerification(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => LoaderStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:?} in the verification wait state", event),
                }
            }
            LoaderStates::Done(sm) => LoaderStates::Done(sm),
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<ResetEvent> for ResetState {
    fn from(event: ResetEvent) -> ResetState {
        ResetState { ctx: event.ctx }
    }
}

impl From<BootWaitEvent> for BootWaitState {
    fn from(event: BootWaitEvent) -> BootWaitState {
        BootWaitState { ctx: event.ctx }
    }
}

impl From<HandshakeEvent> for HandshakeState {
    fn from(event: HandshakeEvent) -> HandshakeState {
        HandshakeState { ctx: event.ctx }
    }
}

impl From<CommandEvent> for CommandState {
    fn from(event: CommandEvent) -> CommandState {
        CommandState { ctx: event.ctx }
    }
}

impl From<SendImageEvent> for SendImageState {
    fn from(event: SendImageEvent) -> SendImageState {
        SendImageState {
            ctx: event.ctx,
            stage4_drain: event.stage4_drain,
        }
    }
}

impl From<AwaitChecksumEvent> for AwaitChecksumState {
    fn from(event: AwaitChecksumEvent) -> AwaitChecksumState {
        AwaitChecksumState { ctx: event.ctx }
    }
}

impl From<AwaitProgrammingEvent> for AwaitProgrammingState {
    fn from(event: AwaitProgrammingEvent) -> AwaitProgrammingState {
        AwaitProgrammingState { ctx: event.ctx }
    }
}

impl From<AwaitVerificationEvent> for AwaitVerificationState {
    fn from(event: AwaitVerificationEvent) -> AwaitVerificationState {
        AwaitVerificationState { ctx: event.ctx }
    }
}

impl From<DoneEvent> for DoneState {
    fn from(event: DoneEvent) -> DoneState {
        DoneState {
            ctx: event.ctx,
            outcome: event.outcome,
        }
    }
}
