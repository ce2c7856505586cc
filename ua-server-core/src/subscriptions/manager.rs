//! Session-level subscription bookkeeping: registry, service entry points
//! and acknowledgement results.

use crate::subscriptions::{
    queue::SharedPublishQueue,
    state::{State, StateListener},
    subscription::SubscriptionHandle,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Weak,
};
use tracing::debug;
use ua_server_sdk::{
    CreateSubscriptionRequest, CreateSubscriptionResponse, DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse, ModifySubscriptionRequest, ModifySubscriptionResponse,
    PublishContext, PublishQueue, PublishService, RepublishRequest, RepublishResponse,
    ResponseHeader, Scheduler, ServiceError, ServiceResult, SetPublishingModeRequest,
    SetPublishingModeResponse, StatusCode,
};

/// Acknowledgement results keyed by request handle, shared between the
/// manager (writer) and its subscriptions (readers, via [`PublishContext`]).
/// Kept outside the manager so subscriptions do not hold a cycle back to it.
struct AcknowledgeTable {
    session_id: u32,
    results: DashMap<u32, Vec<StatusCode>>,
}

impl PublishContext for AcknowledgeTable {
    fn acknowledge_results(&self, request_handle: u32) -> Vec<StatusCode> {
        // Each handle is answered exactly once; take the entry.
        self.results
            .remove(&request_handle)
            .map(|(_, results)| results)
            .unwrap_or_default()
    }

    fn session_id(&self) -> u32 {
        self.session_id
    }
}

/// Reaps a subscription from the registry (and the late list) once it
/// reaches `Closed`. Holds only weak/shared plumbing so dropping the manager
/// drops its subscriptions.
struct RemoveOnClose {
    subscriptions: Weak<DashMap<u32, SubscriptionHandle>>,
    queue: Arc<SharedPublishQueue>,
}

impl StateListener for RemoveOnClose {
    fn on_state_change(&self, subscription_id: u32, _previous: State, current: State) {
        if current != State::Closed {
            return;
        }
        self.queue.remove_late(subscription_id);
        if let Some(subscriptions) = self.subscriptions.upgrade() {
            subscriptions.remove(&subscription_id);
        }
    }
}

/// Owns every subscription of one session and fronts the subscription
/// service set.
///
/// Locking discipline: registry shard guards are never held across a call
/// into a subscription; handles are cloned out first. Subscriptions may in
/// turn take the queue lock, never the registry.
pub struct SubscriptionManager {
    queue: Arc<SharedPublishQueue>,
    scheduler: Arc<dyn Scheduler>,
    context: Arc<AcknowledgeTable>,
    subscriptions: Arc<DashMap<u32, SubscriptionHandle>>,
    next_subscription_id: AtomicU32,
}

impl SubscriptionManager {
    pub fn new(session_id: u32, scheduler: Arc<dyn Scheduler>) -> Self {
        SubscriptionManager::with_queue(session_id, scheduler, SharedPublishQueue::default())
    }

    pub fn with_queue(
        session_id: u32,
        scheduler: Arc<dyn Scheduler>,
        queue: SharedPublishQueue,
    ) -> Self {
        SubscriptionManager {
            queue: Arc::new(queue),
            scheduler,
            context: Arc::new(AcknowledgeTable {
                session_id,
                results: DashMap::new(),
            }),
            subscriptions: Arc::new(DashMap::new()),
            next_subscription_id: AtomicU32::new(1),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.context.session_id
    }

    pub fn publish_queue(&self) -> &Arc<SharedPublishQueue> {
        &self.queue
    }

    pub fn subscription(&self, subscription_id: u32) -> Option<SubscriptionHandle> {
        self.subscriptions
            .get(&subscription_id)
            .map(|entry| entry.value().clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> CreateSubscriptionResponse {
        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);

        let handle = SubscriptionHandle::create(
            subscription_id,
            request,
            Arc::clone(&self.queue) as Arc<dyn PublishQueue>,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.context) as Arc<dyn PublishContext>,
        );
        handle.set_state_listener(Box::new(RemoveOnClose {
            subscriptions: Arc::downgrade(&self.subscriptions),
            queue: Arc::clone(&self.queue),
        }));

        let params = handle.parameters();
        self.subscriptions.insert(subscription_id, handle);

        CreateSubscriptionResponse {
            response_header: self.response_header(request.request_header.request_handle),
            subscription_id,
            revised_publishing_interval: params.publishing_interval,
            revised_lifetime_count: params.lifetime_count,
            revised_max_keep_alive_count: params.max_keep_alive_count,
        }
    }

    pub fn modify_subscription(
        &self,
        request: &ModifySubscriptionRequest,
    ) -> ServiceResult<ModifySubscriptionResponse> {
        let handle = self.subscription(request.subscription_id).ok_or(
            ServiceError::SubscriptionIdInvalid {
                subscription_id: request.subscription_id,
            },
        )?;

        let params = handle.modify(request);
        Ok(ModifySubscriptionResponse {
            response_header: self.response_header(request.request_header.request_handle),
            revised_publishing_interval: params.publishing_interval,
            revised_lifetime_count: params.lifetime_count,
            revised_max_keep_alive_count: params.max_keep_alive_count,
        })
    }

    pub fn set_publishing_mode(
        &self,
        request: &SetPublishingModeRequest,
    ) -> ServiceResult<SetPublishingModeResponse> {
        if request.subscription_ids.is_empty() {
            return Err(ServiceError::NothingToDo);
        }

        let results = request
            .subscription_ids
            .iter()
            .map(|id| match self.subscription(*id) {
                Some(handle) => {
                    handle.set_publishing_mode(request.publishing_enabled);
                    StatusCode::GOOD
                }
                None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            })
            .collect();

        Ok(SetPublishingModeResponse {
            response_header: self.response_header(request.request_header.request_handle),
            results,
        })
    }

    pub fn delete_subscriptions(
        &self,
        request: &DeleteSubscriptionsRequest,
    ) -> ServiceResult<DeleteSubscriptionsResponse> {
        if request.subscription_ids.is_empty() {
            return Err(ServiceError::NothingToDo);
        }

        let results = request
            .subscription_ids
            .iter()
            .map(|id| match self.subscriptions.remove(id) {
                Some((_, handle)) => {
                    self.queue.remove_late(*id);
                    // Items come back from the subscription and are dropped
                    // here; item teardown beyond that is the session's job.
                    let items = handle.delete();
                    debug!(
                        subscription_id = id,
                        returned_items = items.len(),
                        "subscription deleted by request"
                    );
                    StatusCode::GOOD
                }
                None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            })
            .collect();

        Ok(DeleteSubscriptionsResponse {
            response_header: self.response_header(request.request_header.request_handle),
            results,
        })
    }

    /// Handle a Publish service call: resolve its acknowledgements, then
    /// steer it to the neediest late subscription or park it in the queue.
    ///
    /// When the session tracks no live subscription the call is completed
    /// with the matching service fault and the typed error is returned so
    /// the dispatcher sees the outcome.
    pub fn publish(&self, service: PublishService) -> ServiceResult<()> {
        let acknowledgements = service.request().subscription_acknowledgements.clone();
        if !acknowledgements.is_empty() {
            let results: Vec<StatusCode> = acknowledgements
                .iter()
                .map(|ack| match self.subscription(ack.subscription_id) {
                    Some(handle) => handle.acknowledge(ack.sequence_number),
                    None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                })
                .collect();
            self.context
                .results
                .insert(service.request_handle(), results);
        }

        if self.subscriptions.is_empty() {
            debug!(
                request_handle = service.request_handle(),
                "publish request with no live subscription"
            );
            let err = ServiceError::NoSubscription;
            service.fault(err.status());
            return Err(err);
        }

        match self.take_neediest_late_subscription() {
            Some(handle) => handle.on_publish(service),
            None => self.queue.enqueue_request(service),
        }
        Ok(())
    }

    pub fn republish(&self, request: &RepublishRequest) -> ServiceResult<RepublishResponse> {
        let handle = self.subscription(request.subscription_id).ok_or(
            ServiceError::SubscriptionIdInvalid {
                subscription_id: request.subscription_id,
            },
        )?;

        let notification_message = handle
            .republish(request.retransmit_sequence_number)
            .ok_or(ServiceError::MessageNotAvailable {
                subscription_id: request.subscription_id,
                sequence_number: request.retransmit_sequence_number,
            })?;

        Ok(RepublishResponse {
            response_header: self.response_header(request.request_header.request_handle),
            notification_message,
        })
    }

    /// Pick the late subscription with the highest priority (ties go to the
    /// longest-waiting) and take it off the late list.
    fn take_neediest_late_subscription(&self) -> Option<SubscriptionHandle> {
        let mut best: Option<SubscriptionHandle> = None;
        for id in self.queue.late_ids() {
            let Some(handle) = self.subscription(id) else {
                // Stale registration from a reaped subscription.
                self.queue.remove_late(id);
                continue;
            };
            let better = match &best {
                Some(current) => handle.priority() > current.priority(),
                None => true,
            };
            if better {
                best = Some(handle);
            }
        }

        let chosen = best?;
        self.queue.remove_late(chosen.id());
        Some(chosen)
    }

    fn response_header(&self, request_handle: u32) -> ResponseHeader {
        ResponseHeader {
            timestamp: Utc::now(),
            request_handle,
            service_result: StatusCode::GOOD,
        }
    }
}
