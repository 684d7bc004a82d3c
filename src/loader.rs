//! The seven-stage loading protocol.
//!
//! An action against the Propeller walks a fixed sequence of stages:
//! preparation, reset, boot wait, handshake, command, image, and up to three
//! polled status collections. The sequence is implemented as a state machine
//! in the [`state_machine`] module; the surrounding types -- actions,
//! statuses, errors, the progress observer, and the profiler -- live here.

mod action;
mod context;
mod error;
mod events;
mod observer;
mod profiler;
mod state_machine;
mod states;

pub use action::{Action, Status};
pub use error::{ActionError, ErrorCode, InputError, TimeoutError};
pub use observer::StatusObserver;
pub use profiler::ActionSummary;

pub(crate) use context::ActionContext;
pub(crate) use profiler::Profiler;
pub(crate) use state_machine::run_action;
