//! Wire-structural service types exchanged with the subscription engine.
//!
//! These mirror the OPC UA Part 4 structures field for field so a stack
//! encoder can map them 1:1; binary encoding itself lives outside this
//! workspace.

use crate::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common request header fields the engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Client-assigned handle echoed into the response and used to key
    /// acknowledgement results.
    pub request_handle: u32,
    pub timestamp: DateTime<Utc>,
}

impl RequestHeader {
    pub fn new(request_handle: u32) -> Self {
        RequestHeader {
            request_handle,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHeader {
    pub timestamp: DateTime<Utc>,
    pub request_handle: u32,
    pub service_result: StatusCode,
}

/// Typed scalar value carried by a data-change notification.
///
/// The engine treats values opaquely; the variants cover the builtin types
/// monitored items produce today.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    pub fn new_now(value: Variant) -> Self {
        let now = Utc::now();
        DataValue {
            value,
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }
}

/// Placeholder for the Part 4 DiagnosticInfo structure; the engine emits
/// empty diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub additional_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub event_fields: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeNotification {
    pub monitored_items: Vec<MonitoredItemNotification>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotificationList {
    pub events: Vec<EventFieldList>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeNotification {
    pub status: StatusCode,
    pub diagnostic_info: Option<DiagnosticInfo>,
}

/// One entry of `NotificationMessage::notification_data`: the extension
/// object payloads Part 4 allows inside a notification message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationData {
    DataChange(DataChangeNotification),
    Events(EventNotificationList),
    StatusChange(StatusChangeNotification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTime<Utc>,
    pub notification_data: Vec<NotificationData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: u32,
    pub sequence_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub request_header: RequestHeader,
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

#[derive(Debug, Clone)]
pub struct PublishResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    /// Sequence numbers of retained, not yet acknowledged messages, sorted
    /// ascending.
    pub available_sequence_numbers: Vec<u32>,
    pub more_notifications: bool,
    pub notification_message: NotificationMessage,
    /// One status per acknowledgement carried by the request, in order.
    pub results: Vec<StatusCode>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub request_header: RequestHeader,
    pub requested_publishing_interval: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionResponse {
    pub response_header: ResponseHeader,
    pub subscription_id: u32,
    pub revised_publishing_interval: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifySubscriptionRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub requested_publishing_interval: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub priority: u8,
}

#[derive(Debug, Clone)]
pub struct ModifySubscriptionResponse {
    pub response_header: ResponseHeader,
    pub revised_publishing_interval: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPublishingModeRequest {
    pub request_header: RequestHeader,
    pub publishing_enabled: bool,
    pub subscription_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct SetPublishingModeResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepublishRequest {
    pub request_header: RequestHeader,
    pub subscription_id: u32,
    pub retransmit_sequence_number: u32,
}

#[derive(Debug, Clone)]
pub struct RepublishResponse {
    pub response_header: ResponseHeader,
    pub notification_message: NotificationMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSubscriptionsRequest {
    pub request_header: RequestHeader,
    pub subscription_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct DeleteSubscriptionsResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<StatusCode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_round_trips_through_json() {
        let request = CreateSubscriptionRequest {
            request_header: RequestHeader::new(12),
            requested_publishing_interval: 500.0,
            requested_lifetime_count: 60,
            requested_max_keep_alive_count: 20,
            max_notifications_per_publish: 100,
            publishing_enabled: true,
            priority: 3,
        };

        let json = serde_json::to_string(&request).expect("serialize");
        let back: CreateSubscriptionRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.request_header.request_handle, 12);
        assert_eq!(back.requested_publishing_interval, 500.0);
        assert_eq!(back.priority, 3);
    }

    #[test]
    fn notification_message_round_trips_through_json() {
        let message = NotificationMessage {
            sequence_number: 4,
            publish_time: chrono::Utc::now(),
            notification_data: vec![NotificationData::DataChange(DataChangeNotification {
                monitored_items: vec![MonitoredItemNotification {
                    client_handle: 9,
                    value: DataValue::new_now(Variant::Double(1.5)),
                }],
                diagnostic_infos: Vec::new(),
            })],
        };

        let json = serde_json::to_string(&message).expect("serialize");
        let back: NotificationMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, message);
    }
}
