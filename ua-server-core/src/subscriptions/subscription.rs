//! The subscription entity and its Part 4 state machine.
//!
//! One subscription is one publishing cadence: a timer that fires every
//! publishing interval and a stream of client Publish requests, reconciled
//! by the Subscription state table (Part 4, 5.13.1.2). Each table row is one
//! arm below, numbered as in the standard.

use crate::subscriptions::{
    cursor::ItemCursor,
    revision::PublishingParameters,
    state::{State, StateListener},
};
use chrono::Utc;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tracing::{debug, trace};
use ua_server_sdk::{
    CreateSubscriptionRequest, DataChangeNotification, EventNotificationList,
    ModifySubscriptionRequest, MonitoredItem, MonitoredItemRef, Notification, NotificationData,
    NotificationMessage, PublishContext, PublishQueue, PublishResponse, PublishService, Scheduler,
    StatusChangeNotification, StatusCode,
};

fn lock_item(item: &MonitoredItemRef) -> MutexGuard<'_, dyn MonitoredItem + 'static> {
    item.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-subscription state. All fields are guarded by the subscription mutex
/// owned by [`SubscriptionHandle`]; event handlers and mutation operations
/// run one at a time and never block inside the lock.
pub struct Subscription {
    subscription_id: u32,

    publishing_interval: f64,
    lifetime_count: u32,
    max_keep_alive_count: u32,
    max_notifications_per_publish: u32,
    publishing_enabled: bool,
    priority: u8,

    state: State,
    /// Next sequence number to assign. Keep-alives report this value without
    /// consuming it.
    sequence_number: u32,
    keep_alive_counter: u32,
    lifetime_counter: u32,
    /// Whether any message has ever been sent on this subscription.
    message_sent: bool,
    /// Whether the last gather left notifications behind.
    more_notifications: bool,

    /// Registered items in ascending item-id order, so the drain walk is
    /// reproducible.
    items: BTreeMap<u32, MonitoredItemRef>,
    /// Emitted messages awaiting acknowledgement, keyed by sequence number.
    available_messages: BTreeMap<u32, NotificationMessage>,
    /// Where the previous publish stopped draining.
    cursor: ItemCursor,

    queue: Arc<dyn PublishQueue>,
    scheduler: Arc<dyn Scheduler>,
    context: Arc<dyn PublishContext>,
    listener: Option<Box<dyn StateListener>>,
    self_ref: Weak<Mutex<Subscription>>,
}

/// Shared, lock-guarded handle to a subscription. This is the unit of mutual
/// exclusion: every event handler and mutation operation goes through the
/// single mutex inside.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<Mutex<Subscription>>,
}

impl SubscriptionHandle {
    /// Build a subscription from a create request, with its parameters
    /// revised, and arm the first publishing timer tick.
    pub fn create(
        subscription_id: u32,
        request: &CreateSubscriptionRequest,
        queue: Arc<dyn PublishQueue>,
        scheduler: Arc<dyn Scheduler>,
        context: Arc<dyn PublishContext>,
    ) -> SubscriptionHandle {
        let params = PublishingParameters::revise(
            request.requested_publishing_interval,
            request.requested_max_keep_alive_count,
            request.requested_lifetime_count,
            request.max_notifications_per_publish,
        );

        let subscription = Subscription {
            subscription_id,
            publishing_interval: params.publishing_interval,
            lifetime_count: params.lifetime_count,
            max_keep_alive_count: params.max_keep_alive_count,
            max_notifications_per_publish: params.max_notifications_per_publish,
            publishing_enabled: request.publishing_enabled,
            priority: request.priority,
            state: State::Normal,
            sequence_number: 1,
            keep_alive_counter: params.max_keep_alive_count,
            lifetime_counter: params.lifetime_count,
            message_sent: false,
            more_notifications: false,
            items: BTreeMap::new(),
            available_messages: BTreeMap::new(),
            cursor: ItemCursor::new(),
            queue,
            scheduler,
            context,
            listener: None,
            self_ref: Weak::new(),
        };

        let handle = SubscriptionHandle {
            inner: Arc::new(Mutex::new(subscription)),
        };
        {
            let mut sub = handle.lock();
            sub.self_ref = Arc::downgrade(&handle.inner);
            debug!(
                subscription_id,
                publishing_interval = sub.publishing_interval,
                max_keep_alive_count = sub.max_keep_alive_count,
                lifetime_count = sub.lifetime_count,
                "subscription created"
            );
            sub.schedule_tick();
        }
        handle
    }

    fn lock(&self) -> MutexGuard<'_, Subscription> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a Publish request to this subscription.
    pub fn on_publish(&self, service: PublishService) {
        self.lock().on_publish(service);
    }

    /// The publishing timer elapsed.
    pub fn on_timer(&self) {
        self.lock().on_timer();
    }

    pub fn modify(&self, request: &ModifySubscriptionRequest) -> PublishingParameters {
        self.lock().modify(request)
    }

    pub fn set_publishing_mode(&self, publishing_enabled: bool) {
        self.lock().set_publishing_mode(publishing_enabled);
    }

    pub fn add_items(&self, items: Vec<MonitoredItemRef>) {
        self.lock().add_items(items);
    }

    pub fn remove_items(&self, item_ids: &[u32]) -> Vec<MonitoredItemRef> {
        self.lock().remove_items(item_ids)
    }

    /// Close the subscription and hand its items back for teardown.
    pub fn delete(&self) -> Vec<MonitoredItemRef> {
        self.lock().delete()
    }

    pub fn acknowledge(&self, sequence_number: u32) -> StatusCode {
        self.lock().acknowledge(sequence_number)
    }

    pub fn republish(&self, sequence_number: u32) -> Option<NotificationMessage> {
        self.lock().republish(sequence_number)
    }

    pub fn set_state_listener(&self, listener: Box<dyn StateListener>) {
        self.lock().listener = Some(listener);
    }

    pub fn id(&self) -> u32 {
        self.lock().subscription_id
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn parameters(&self) -> PublishingParameters {
        let sub = self.lock();
        PublishingParameters {
            publishing_interval: sub.publishing_interval,
            max_keep_alive_count: sub.max_keep_alive_count,
            lifetime_count: sub.lifetime_count,
            max_notifications_per_publish: sub.max_notifications_per_publish,
        }
    }

    pub fn priority(&self) -> u8 {
        self.lock().priority
    }

    pub fn publishing_enabled(&self) -> bool {
        self.lock().publishing_enabled
    }

    pub fn lifetime_counter(&self) -> u32 {
        self.lock().lifetime_counter
    }

    pub fn keep_alive_counter(&self) -> u32 {
        self.lock().keep_alive_counter
    }

    pub fn message_sent(&self) -> bool {
        self.lock().message_sent
    }

    pub fn more_notifications(&self) -> bool {
        self.lock().more_notifications
    }

    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        self.lock().available_sequence_numbers()
    }

    pub fn monitored_item_count(&self) -> usize {
        self.lock().items.len()
    }
}

impl Subscription {
    // ---- events ----------------------------------------------------------

    fn on_publish(&mut self, service: PublishService) {
        trace!(
            subscription_id = self.subscription_id,
            state = ?self.state,
            keep_alive = self.keep_alive_counter,
            lifetime = self.lifetime_counter,
            "publish request delivered"
        );

        match self.state {
            State::Normal => self.publish_when_normal(service),
            // Row 13: a keep-alive cycle is running; park the request.
            State::KeepAlive => self.queue.enqueue_request(service),
            State::Late => self.publish_when_late(service),
            // The lifetime expired earlier; tell the client and close.
            State::Closing => {
                self.return_status_change(service);
                self.set_state(State::Closed);
            }
            // Parked for the session layer to answer with Bad_NoSubscription.
            State::Closed => self.queue.enqueue_request(service),
        }
    }

    fn on_timer(&mut self) {
        trace!(
            subscription_id = self.subscription_id,
            state = ?self.state,
            keep_alive = self.keep_alive_counter,
            lifetime = self.lifetime_counter,
            "publishing timer fired"
        );

        if self.state == State::Closed {
            debug!(
                subscription_id = self.subscription_id,
                "publishing timer fired on closed subscription"
            );
            return;
        }

        self.lifetime_counter = self.lifetime_counter.saturating_sub(1);
        if self.lifetime_counter == 0 {
            debug!(subscription_id = self.subscription_id, "lifetime expired");
            self.set_state(State::Closing);
            return;
        }

        match self.state {
            State::Normal => self.timer_when_normal(),
            State::KeepAlive => self.timer_when_keep_alive(),
            // Row 12: still waiting for a publish request; the lifetime
            // counter is what eventually ends the wait.
            State::Late => self.schedule_tick(),
            // Closing never has a timer armed and Closed returned above.
            State::Closing | State::Closed => {
                unreachable!("publishing timer fired in state {:?}", self.state)
            }
        }
    }

    fn publish_when_normal(&mut self, service: PublishService) {
        let publishing_enabled = self.publishing_enabled;

        // Row 4: nothing held back; queue the request for the timer.
        if !publishing_enabled || !self.more_notifications {
            self.queue.enqueue_request(service);
        }
        // Row 5: a previous publish left residue; answer immediately.
        else {
            self.reset_lifetime_counter();
            self.return_notifications(service);
            self.message_sent = true;
        }
    }

    fn publish_when_late(&mut self, service: PublishService) {
        let publishing_enabled = self.publishing_enabled;
        let notifications_available = self.notifications_available();

        // Row 10: something to report; return it and resume normally.
        if publishing_enabled && (notifications_available || self.more_notifications) {
            self.set_state(State::Normal);
            self.reset_lifetime_counter();
            self.return_notifications(service);
            self.message_sent = true;
        }
        // Row 11: nothing to report; the request becomes a keep-alive.
        else {
            self.set_state(State::KeepAlive);
            self.reset_lifetime_counter();
            self.return_keep_alive(service);
            self.message_sent = true;
        }
    }

    fn timer_when_normal(&mut self) {
        loop {
            let publish_request_queued = self.queue.is_not_empty();
            let publishing_enabled = self.publishing_enabled;
            let notifications_available = self.notifications_available();

            // Row 6: request waiting and notifications ready.
            if publish_request_queued && publishing_enabled && notifications_available {
                match self.queue.poll_request() {
                    Some(service) => {
                        self.reset_lifetime_counter();
                        self.return_notifications(service);
                        self.message_sent = true;
                        self.schedule_tick();
                    }
                    // The queue reported non-empty but another consumer won
                    // the race; re-evaluate from scratch.
                    None => continue,
                }
            }
            // Row 7: request waiting, nothing sent yet and nothing to send;
            // the first cycle answers with a keep-alive.
            else if publish_request_queued
                && !self.message_sent
                && (!publishing_enabled || !notifications_available)
            {
                match self.queue.poll_request() {
                    Some(service) => {
                        self.reset_lifetime_counter();
                        self.return_keep_alive(service);
                        self.message_sent = true;
                        self.schedule_tick();
                    }
                    None => continue,
                }
            }
            // Row 8: a message is owed but no request is available.
            else if !publish_request_queued
                && (!self.message_sent || (publishing_enabled && notifications_available))
            {
                self.set_state(State::Late);
                self.schedule_tick();
                self.queue.register_late(self.subscription_id);
            }
            // Row 9: quiet cycle; start counting toward a keep-alive.
            else if self.message_sent && (!publishing_enabled || !notifications_available) {
                self.set_state(State::KeepAlive);
                self.reset_keep_alive_counter();
                self.schedule_tick();
            } else {
                unreachable!("normal-state timer rows are exhaustive");
            }
            return;
        }
    }

    fn timer_when_keep_alive(&mut self) {
        loop {
            let publishing_enabled = self.publishing_enabled;
            let notifications_available = self.notifications_available();
            let publish_request_queued = self.queue.is_not_empty();

            // Row 14: notifications appeared and a request is waiting.
            if publishing_enabled && notifications_available && publish_request_queued {
                match self.queue.poll_request() {
                    Some(service) => {
                        self.set_state(State::Normal);
                        self.reset_lifetime_counter();
                        self.return_notifications(service);
                        self.message_sent = true;
                        self.schedule_tick();
                    }
                    None => continue,
                }
            }
            // Row 15: the keep-alive is due and a request is waiting.
            else if publish_request_queued
                && self.keep_alive_counter == 1
                && (!publishing_enabled || !notifications_available)
            {
                match self.queue.poll_request() {
                    Some(service) => {
                        self.return_keep_alive(service);
                        self.reset_lifetime_counter();
                        self.reset_keep_alive_counter();
                        self.schedule_tick();
                    }
                    None => continue,
                }
            }
            // Row 16: keep-alive not yet due; keep counting.
            else if self.keep_alive_counter > 1
                && (!publishing_enabled || !notifications_available)
            {
                self.keep_alive_counter -= 1;
                self.schedule_tick();
            }
            // Row 17: a message is owed but no request is available.
            else if !publish_request_queued
                && (self.keep_alive_counter == 1
                    || (self.keep_alive_counter > 1
                        && publishing_enabled
                        && notifications_available))
            {
                self.set_state(State::Late);
                self.schedule_tick();
                self.queue.register_late(self.subscription_id);
            } else {
                unreachable!("keep-alive-state timer rows are exhaustive");
            }
            return;
        }
    }

    // ---- responses -------------------------------------------------------

    /// Drain notifications fairly across items into one or more publish
    /// responses: the given service first, then any further requests the
    /// queue can supply while residue remains.
    fn return_notifications(&mut self, service: PublishService) {
        let mut working = self.working_set();
        let mut service = service;

        loop {
            let notifications = self.gather_from(&mut working);
            self.more_notifications = working.has_next();
            self.send_notifications(service, notifications);

            if !self.more_notifications {
                break;
            }
            match self.queue.poll_request() {
                Some(next) => service = next,
                None => {
                    // Residue but no request: park until the next Publish
                    // arrives.
                    self.queue.register_late(self.subscription_id);
                    break;
                }
            }
        }

        self.cursor = working;
    }

    /// Deduplicated, insertion-ordered drain plan: the saved cursor resumes
    /// first, then every registered item that currently has something to
    /// report.
    fn working_set(&mut self) -> ItemCursor {
        let mut working = std::mem::take(&mut self.cursor);
        working.retain(|id| self.items.contains_key(id));

        for (id, item) in &self.items {
            let pending = {
                let item = lock_item(item);
                item.has_notifications() || item.is_triggered()
            };
            if pending {
                working.push(*id);
            }
        }
        working
    }

    fn gather_from(&self, working: &mut ItemCursor) -> Vec<Notification> {
        let limit = self.max_notifications_per_publish as usize;
        let mut notifications = Vec::new();

        while notifications.len() < limit {
            let Some(id) = working.peek() else { break };
            let Some(item) = self.items.get(&id) else {
                // Removed since the cursor was saved; skip.
                working.advance();
                continue;
            };

            let remaining = limit - notifications.len();
            let item_drained = lock_item(item).drain(&mut notifications, remaining);
            if item_drained {
                working.advance();
            } else {
                // The item filled the remaining budget and stays at the
                // head for the next publish.
                break;
            }
        }
        notifications
    }

    fn send_notifications(&mut self, service: PublishService, notifications: Vec<Notification>) {
        let mut monitored_items = Vec::new();
        let mut events = Vec::new();
        for notification in notifications {
            match notification {
                Notification::DataChange(n) => monitored_items.push(n),
                Notification::Event(e) => events.push(e),
            }
        }

        let data_count = monitored_items.len();
        let event_count = events.len();

        let mut notification_data = Vec::new();
        if !monitored_items.is_empty() {
            notification_data.push(NotificationData::DataChange(DataChangeNotification {
                monitored_items,
                diagnostic_infos: Vec::new(),
            }));
        }
        if !events.is_empty() {
            notification_data.push(NotificationData::Events(EventNotificationList { events }));
        }

        let sequence_number = self.next_sequence_number();
        let notification_message = NotificationMessage {
            sequence_number,
            publish_time: Utc::now(),
            notification_data,
        };
        self.available_messages
            .insert(sequence_number, notification_message.clone());

        let results = self.context.acknowledge_results(service.request_handle());
        let response = PublishResponse {
            response_header: service.response_header(StatusCode::GOOD),
            subscription_id: self.subscription_id,
            available_sequence_numbers: self.available_sequence_numbers(),
            more_notifications: self.more_notifications,
            notification_message,
            results,
            diagnostic_infos: Vec::new(),
        };

        debug!(
            subscription_id = self.subscription_id,
            sequence_number,
            data_count,
            event_count,
            more_notifications = self.more_notifications,
            "returning notification message"
        );
        service.finish(response);
    }

    fn return_keep_alive(&mut self, service: PublishService) {
        // Keep-alives report the next number without consuming it.
        let sequence_number = self.sequence_number;
        let notification_message = NotificationMessage {
            sequence_number,
            publish_time: Utc::now(),
            notification_data: Vec::new(),
        };

        let results = self.context.acknowledge_results(service.request_handle());
        let response = PublishResponse {
            response_header: service.response_header(StatusCode::GOOD),
            subscription_id: self.subscription_id,
            available_sequence_numbers: self.available_sequence_numbers(),
            more_notifications: self.more_notifications,
            notification_message,
            results,
            diagnostic_infos: Vec::new(),
        };

        debug!(
            subscription_id = self.subscription_id,
            sequence_number, "returning keep-alive notification message"
        );
        service.finish(response);
    }

    fn return_status_change(&mut self, service: PublishService) {
        let sequence_number = self.next_sequence_number();
        let notification_message = NotificationMessage {
            sequence_number,
            publish_time: Utc::now(),
            notification_data: vec![NotificationData::StatusChange(StatusChangeNotification {
                status: StatusCode::BAD_TIMEOUT,
                diagnostic_info: None,
            })],
        };

        let results = self.context.acknowledge_results(service.request_handle());
        let response = PublishResponse {
            response_header: service.response_header(StatusCode::GOOD),
            subscription_id: self.subscription_id,
            available_sequence_numbers: Vec::new(),
            more_notifications: false,
            notification_message,
            results,
            diagnostic_infos: Vec::new(),
        };

        debug!(
            subscription_id = self.subscription_id,
            sequence_number, "returning status-change notification"
        );
        service.finish(response);
    }

    // ---- mutation operations ---------------------------------------------

    fn modify(&mut self, request: &ModifySubscriptionRequest) -> PublishingParameters {
        let params = PublishingParameters::revise(
            request.requested_publishing_interval,
            request.requested_max_keep_alive_count,
            request.requested_lifetime_count,
            request.max_notifications_per_publish,
        );

        self.publishing_interval = params.publishing_interval;
        self.max_keep_alive_count = params.max_keep_alive_count;
        self.lifetime_count = params.lifetime_count;
        self.max_notifications_per_publish = params.max_notifications_per_publish;
        self.priority = request.priority;

        // Modify refreshes the lifetime but not the keep-alive cadence; the
        // running counter is only pulled down if the new ceiling is below it.
        self.reset_lifetime_counter();
        self.keep_alive_counter = self.keep_alive_counter.min(self.max_keep_alive_count);

        debug!(
            subscription_id = self.subscription_id,
            publishing_interval = self.publishing_interval,
            max_keep_alive_count = self.max_keep_alive_count,
            lifetime_count = self.lifetime_count,
            "subscription modified"
        );
        params
    }

    fn set_publishing_mode(&mut self, publishing_enabled: bool) {
        self.publishing_enabled = publishing_enabled;
        self.reset_lifetime_counter();
        debug!(
            subscription_id = self.subscription_id,
            publishing_enabled, "publishing mode set"
        );
    }

    fn add_items(&mut self, items: Vec<MonitoredItemRef>) {
        let created = items.len();
        for item in items {
            let id = lock_item(&item).id();
            self.items.insert(id, item);
        }
        self.reset_lifetime_counter();
        debug!(
            subscription_id = self.subscription_id,
            created, "monitored items created"
        );
    }

    fn remove_items(&mut self, item_ids: &[u32]) -> Vec<MonitoredItemRef> {
        let removed: Vec<MonitoredItemRef> = item_ids
            .iter()
            .filter_map(|id| self.items.remove(id))
            .collect();
        self.reset_lifetime_counter();
        debug!(
            subscription_id = self.subscription_id,
            deleted = removed.len(),
            "monitored items deleted"
        );
        removed
    }

    fn delete(&mut self) -> Vec<MonitoredItemRef> {
        self.set_state(State::Closed);
        debug!(subscription_id = self.subscription_id, "subscription deleted");
        std::mem::take(&mut self.items).into_values().collect()
    }

    fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        if self.available_messages.remove(&sequence_number).is_some() {
            debug!(
                subscription_id = self.subscription_id,
                sequence_number, "sequence number acknowledged"
            );
            StatusCode::GOOD
        } else {
            debug!(
                subscription_id = self.subscription_id,
                sequence_number, "sequence number unknown"
            );
            StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
        }
    }

    fn republish(&mut self, sequence_number: u32) -> Option<NotificationMessage> {
        self.reset_lifetime_counter();
        self.available_messages.get(&sequence_number).cloned()
    }

    // ---- internals -------------------------------------------------------

    fn notifications_available(&self) -> bool {
        self.items.values().any(|item| {
            let item = lock_item(item);
            item.has_notifications() || item.is_triggered()
        })
    }

    fn available_sequence_numbers(&self) -> Vec<u32> {
        // BTreeMap keys iterate in ascending order.
        self.available_messages.keys().copied().collect()
    }

    fn next_sequence_number(&mut self) -> u32 {
        let n = self.sequence_number;
        self.sequence_number += 1;
        n
    }

    fn reset_lifetime_counter(&mut self) {
        self.lifetime_counter = self.lifetime_count;
        trace!(
            subscription_id = self.subscription_id,
            lifetime_counter = self.lifetime_counter,
            "lifetime counter reset"
        );
    }

    fn reset_keep_alive_counter(&mut self) {
        self.keep_alive_counter = self.max_keep_alive_count;
        trace!(
            subscription_id = self.subscription_id,
            keep_alive_counter = self.keep_alive_counter,
            "keep-alive counter reset"
        );
    }

    fn set_state(&mut self, next: State) {
        let previous = std::mem::replace(&mut self.state, next);
        debug!(
            subscription_id = self.subscription_id,
            ?previous,
            ?next,
            "subscription state changed"
        );
        if let Some(listener) = &self.listener {
            listener.on_state_change(self.subscription_id, previous, next);
        }
    }

    /// Arm the next publishing timer tick. The callback re-enters the
    /// subscription through a weak reference, so a dropped subscription
    /// silently ends its tick chain.
    fn schedule_tick(&self) {
        let Some(inner) = self.self_ref.upgrade() else {
            return;
        };
        let delay = Duration::from_millis(self.publishing_interval.ceil() as u64);
        self.scheduler.schedule_after(
            delay,
            Box::new(move || SubscriptionHandle { inner }.on_timer()),
        );
    }
}
