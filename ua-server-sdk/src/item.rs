use crate::{EventFieldList, MonitoredItemNotification};
use std::sync::{Arc, Mutex};

/// A single notification produced by a monitored item, before it is
/// partitioned into the per-kind aggregates of a notification message.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DataChange(MonitoredItemNotification),
    Event(EventFieldList),
}

/// Capability a monitored item exposes to the subscription that reports it.
///
/// Sampling, filtering and queue management are the item's own concern; the
/// subscription only asks whether anything is pending and drains it into a
/// publish response. `drain` must not fail: item-level problems travel as
/// notification payloads (e.g. a quality status on the data value).
pub trait MonitoredItem: Send {
    /// Subscription-scoped item id.
    fn id(&self) -> u32;

    /// Whether the item's queue holds at least one notification.
    fn has_notifications(&self) -> bool;

    /// Whether a linked triggering item has fired this item even though its
    /// own monitoring mode would not report.
    fn is_triggered(&self) -> bool;

    /// Move up to `limit` notifications into `out`.
    ///
    /// Returns `true` when the item has nothing further to report, `false`
    /// when notifications remain beyond `limit`.
    fn drain(&mut self, out: &mut Vec<Notification>, limit: usize) -> bool;
}

/// Shared handle to a monitored item. Items are owned by the session layer
/// that created them; subscriptions keep handles only for notification
/// drains and return them on delete.
pub type MonitoredItemRef = Arc<Mutex<dyn MonitoredItem>>;
