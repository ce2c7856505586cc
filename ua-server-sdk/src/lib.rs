//! Shared surface between the ua-server subscription engine and its
//! collaborators: wire-structural Part 4 service types, status codes, the
//! pending-publish service call, and the traits the engine consumes
//! (monitored items, publish queue, scheduler, manager context).

mod collaborators;
mod error;
mod item;
mod service;
mod status;
mod types;

pub use collaborators::{PublishContext, PublishQueue, Scheduler, TimerCallback};
pub use error::{ServiceError, ServiceResult};
pub use item::{MonitoredItem, MonitoredItemRef, Notification};
pub use service::PublishService;
pub use status::StatusCode;
pub use types::{
    CreateSubscriptionRequest, CreateSubscriptionResponse, DataChangeNotification, DataValue,
    DeleteSubscriptionsRequest, DeleteSubscriptionsResponse, DiagnosticInfo, EventFieldList,
    EventNotificationList, ModifySubscriptionRequest, ModifySubscriptionResponse,
    MonitoredItemNotification, NotificationData, NotificationMessage, PublishRequest,
    PublishResponse, RepublishRequest, RepublishResponse, RequestHeader, ResponseHeader,
    SetPublishingModeRequest, SetPublishingModeResponse, StatusChangeNotification,
    SubscriptionAcknowledgement, Variant,
};
