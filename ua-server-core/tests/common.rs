//! Shared fixtures for the subscription engine integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;
use tracing::Level;
use ua_server_core::{SharedPublishQueue, SubscriptionHandle};
use ua_server_sdk::{
    CreateSubscriptionRequest, DataValue, EventFieldList, MonitoredItem,
    MonitoredItemNotification, MonitoredItemRef, Notification, NotificationData, PublishContext,
    PublishRequest, PublishResponse, PublishService, RequestHeader, Scheduler, StatusCode,
    SubscriptionAcknowledgement, TimerCallback, Variant,
};

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_target(false)
            .without_time()
            .with_test_writer()
            .try_init();
    });
}

/// Scheduler double that collects callbacks for the test to fire by hand,
/// making timer ticks deterministic and synchronous.
#[derive(Default)]
pub struct ManualScheduler {
    queued: Mutex<VecDeque<(Duration, TimerCallback)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        ManualScheduler::default()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.lock().front().map(|(delay, _)| *delay)
    }

    /// Run the oldest scheduled callback, outside the scheduler lock since
    /// it re-enters the subscription.
    pub fn run_next(&self) -> bool {
        let next = self.lock().pop_front();
        match next {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(Duration, TimerCallback)>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, callback: TimerCallback) {
        self.lock().push_back((delay, callback));
    }
}

/// No-op manager context for tests driving a subscription directly.
pub struct NullContext {
    pub session_id: u32,
}

impl PublishContext for NullContext {
    fn acknowledge_results(&self, _request_handle: u32) -> Vec<StatusCode> {
        Vec::new()
    }

    fn session_id(&self) -> u32 {
        self.session_id
    }
}

/// Monitored item double with a plain notification queue.
pub struct TestItem {
    id: u32,
    triggered: bool,
    queue: VecDeque<Notification>,
    emitted: u32,
}

impl TestItem {
    pub fn new(id: u32) -> Self {
        TestItem {
            id,
            triggered: false,
            queue: VecDeque::new(),
            emitted: 0,
        }
    }

    /// Queue `count` data-change notifications carrying this item's id as
    /// the client handle.
    pub fn push_data(&mut self, count: usize) {
        for _ in 0..count {
            self.emitted += 1;
            self.queue
                .push_back(Notification::DataChange(MonitoredItemNotification {
                    client_handle: self.id,
                    value: DataValue::new_now(Variant::UInt32(self.emitted)),
                }));
        }
    }

    /// Queue one event notification with the given fields.
    pub fn push_event(&mut self, event_fields: Vec<Variant>) {
        self.queue.push_back(Notification::Event(EventFieldList {
            client_handle: self.id,
            event_fields,
        }));
    }

    pub fn set_triggered(&mut self, triggered: bool) {
        self.triggered = triggered;
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Split into a strong handle the test keeps (to refill the queue) and
    /// the trait-object handle given to the subscription.
    pub fn shared(self) -> (Arc<Mutex<TestItem>>, MonitoredItemRef) {
        let strong = Arc::new(Mutex::new(self));
        let item_ref: MonitoredItemRef = Arc::clone(&strong) as MonitoredItemRef;
        (strong, item_ref)
    }
}

impl MonitoredItem for TestItem {
    fn id(&self) -> u32 {
        self.id
    }

    fn has_notifications(&self) -> bool {
        !self.queue.is_empty()
    }

    fn is_triggered(&self) -> bool {
        self.triggered
    }

    fn drain(&mut self, out: &mut Vec<Notification>, limit: usize) -> bool {
        let take = limit.min(self.queue.len());
        out.extend(self.queue.drain(..take));
        self.queue.is_empty()
    }
}

pub fn create_request(
    publishing_interval: f64,
    max_keep_alive_count: u32,
    lifetime_count: u32,
    max_notifications_per_publish: u32,
    publishing_enabled: bool,
) -> CreateSubscriptionRequest {
    CreateSubscriptionRequest {
        request_header: RequestHeader::new(0),
        requested_publishing_interval: publishing_interval,
        requested_lifetime_count: lifetime_count,
        requested_max_keep_alive_count: max_keep_alive_count,
        max_notifications_per_publish,
        publishing_enabled,
        priority: 0,
    }
}

pub fn publish_service(
    request_handle: u32,
) -> (
    PublishService,
    tokio::sync::oneshot::Receiver<PublishResponse>,
) {
    PublishService::new(PublishRequest {
        request_header: RequestHeader::new(request_handle),
        subscription_acknowledgements: Vec::new(),
    })
}

pub fn publish_service_with_acks(
    request_handle: u32,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
) -> (
    PublishService,
    tokio::sync::oneshot::Receiver<PublishResponse>,
) {
    PublishService::new(PublishRequest {
        request_header: RequestHeader::new(request_handle),
        subscription_acknowledgements: acknowledgements,
    })
}

pub struct SubscriptionFixture {
    pub handle: SubscriptionHandle,
    pub queue: Arc<SharedPublishQueue>,
    pub scheduler: Arc<ManualScheduler>,
}

/// Build a stand-alone subscription wired to a fresh queue, a manual
/// scheduler and a no-op context.
pub fn build_subscription(request: &CreateSubscriptionRequest) -> SubscriptionFixture {
    init_tracing();

    let queue = Arc::new(SharedPublishQueue::default());
    let scheduler = Arc::new(ManualScheduler::new());
    let context = Arc::new(NullContext { session_id: 1 });

    let handle = SubscriptionHandle::create(
        1,
        request,
        Arc::clone(&queue) as Arc<dyn ua_server_sdk::PublishQueue>,
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        context,
    );

    SubscriptionFixture {
        handle,
        queue,
        scheduler,
    }
}

/// Total data-change notifications carried by a publish response.
pub fn data_change_count(response: &PublishResponse) -> usize {
    response
        .notification_message
        .notification_data
        .iter()
        .map(|data| match data {
            NotificationData::DataChange(dc) => dc.monitored_items.len(),
            _ => 0,
        })
        .sum()
}

/// Client handles of the data-change notifications in a response, in order.
pub fn data_change_handles(response: &PublishResponse) -> Vec<u32> {
    response
        .notification_message
        .notification_data
        .iter()
        .flat_map(|data| match data {
            NotificationData::DataChange(dc) => dc
                .monitored_items
                .iter()
                .map(|n| n.client_handle)
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        })
        .collect()
}

/// A keep-alive carries no notification data.
pub fn is_keep_alive(response: &PublishResponse) -> bool {
    response.notification_message.notification_data.is_empty()
}
