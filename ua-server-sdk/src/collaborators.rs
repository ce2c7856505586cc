use crate::{PublishService, StatusCode};
use std::time::Duration;

/// Queue of Publish service calls shared by every subscription of a session.
///
/// Subscriptions park requests here when they have nothing to say and pull
/// them when the publishing timer finds work; the queue also remembers which
/// subscriptions went late so the next arriving request can be steered to
/// them.
pub trait PublishQueue: Send + Sync {
    fn enqueue_request(&self, service: PublishService);

    fn poll_request(&self) -> Option<PublishService>;

    fn is_not_empty(&self) -> bool;

    /// Record that `subscription_id` is waiting for a publish request.
    fn register_late(&self, subscription_id: u32);
}

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Deadline executor driving the publishing cadence.
///
/// Implementations run `callback` once, roughly `delay` after the call, on a
/// worker that may re-enter subscription locks. Scheduling is fire and
/// forget; a scheduler that can no longer run callbacks is fatal for the
/// subscriptions relying on it.
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, callback: TimerCallback);
}

/// Manager-side bookkeeping a subscription consults while building publish
/// responses.
pub trait PublishContext: Send + Sync {
    /// Acknowledgement results computed for the request identified by
    /// `request_handle`, in the order the acknowledgements were submitted.
    fn acknowledge_results(&self, request_handle: u32) -> Vec<StatusCode>;

    /// Identifier of the session this engine instance serves.
    fn session_id(&self) -> u32;
}
