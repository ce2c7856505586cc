use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use ua_server_sdk::{PublishQueue, PublishService, StatusCode};

const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// The publish queue shared by every subscription of a session.
///
/// Holds Publish service calls no subscription could answer yet, plus the
/// ids of subscriptions that went late waiting for one. The request side is
/// capacity-bounded: when a new request would exceed the bound, the oldest
/// queued request is completed immediately with `Bad_TooManyPublishRequests`
/// (Part 4, 5.13.5) so the newest request keeps its place.
pub struct SharedPublishQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

struct QueueInner {
    requests: VecDeque<PublishService>,
    late: VecDeque<u32>,
}

impl SharedPublishQueue {
    pub fn new(capacity: usize) -> Self {
        SharedPublishQueue {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                late: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ids of subscriptions currently waiting for a publish request, oldest
    /// first.
    pub fn late_ids(&self) -> Vec<u32> {
        self.lock().late.iter().copied().collect()
    }

    /// Remove a late registration, e.g. once a request was steered to the
    /// subscription or the subscription was deleted.
    pub fn remove_late(&self, subscription_id: u32) -> bool {
        let mut inner = self.lock();
        let before = inner.late.len();
        inner.late.retain(|id| *id != subscription_id);
        inner.late.len() != before
    }

    pub fn queued_requests(&self) -> usize {
        self.lock().requests.len()
    }
}

impl Default for SharedPublishQueue {
    fn default() -> Self {
        SharedPublishQueue::new(DEFAULT_REQUEST_CAPACITY)
    }
}

impl PublishQueue for SharedPublishQueue {
    fn enqueue_request(&self, service: PublishService) {
        let overflow = {
            let mut inner = self.lock();
            let overflow = if inner.requests.len() >= self.capacity {
                inner.requests.pop_front()
            } else {
                None
            };
            inner.requests.push_back(service);
            overflow
        };

        // Completed outside the lock; the oldest requester is told to slow
        // down.
        if let Some(oldest) = overflow {
            debug!(
                request_handle = oldest.request_handle(),
                "publish queue full, rejecting oldest request"
            );
            oldest.fault(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS);
        }
    }

    fn poll_request(&self) -> Option<PublishService> {
        self.lock().requests.pop_front()
    }

    fn is_not_empty(&self) -> bool {
        !self.lock().requests.is_empty()
    }

    fn register_late(&self, subscription_id: u32) {
        let mut inner = self.lock();
        if !inner.late.contains(&subscription_id) {
            inner.late.push_back(subscription_id);
        }
    }
}
