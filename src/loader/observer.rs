//! Following the activity of the loader.

use super::{Action, ActionSummary, ErrorCode, Status};

/// Receives progress notifications for loader actions.
///
/// All methods have empty default implementations; implement only the ones
/// you care about. They are called on the worker thread created for the
/// action -- never the thread that started it -- and must not panic.
///
/// For a single runner the callbacks are totally ordered: `will_begin`, any
/// number of `update`s, then exactly one `finished` per started action, and
/// `finished` for one action always returns before `will_begin` of the next.
///
/// Do not call
/// [`ActionRunner::cancel_and_wait`](crate::ActionRunner::cancel_and_wait) or
/// [`ActionRunner::wait_until_finished`](crate::ActionRunner::wait_until_finished)
/// from a callback -- the wait can never be satisfied from the thread that
/// must finish first. Calling [`ActionRunner::cancel`](crate::ActionRunner::cancel)
/// is fine.
pub trait StatusObserver: Send + Sync {
    /// Called when an action is about to begin. If `will_begin` is called,
    /// `finished` will be called.
    fn will_begin(&self, _action: Action, _seconds_taken: f32, _estimated_total: f32) {}

    /// Called when the status of the loader changes.
    ///
    /// The estimate may change between calls; it is always greater than
    /// `seconds_taken`. Return quickly: while this callback executes the
    /// loader is idle, and if the loader stays idle too long (roughly
    /// 100 ms) the Propeller reboots.
    fn update(&self, _status: Status, _seconds_taken: f32, _estimated_total: f32) {}

    /// Called when the action has finished, successfully or not.
    ///
    /// On success `error_code` is [`ErrorCode::None`] and `details` is
    /// empty. By the time this is called the runner is no longer busy and
    /// any threads blocked waiting on the action have been released.
    fn finished(&self, _error_code: ErrorCode, _details: &str, _summary: &ActionSummary) {}
}
