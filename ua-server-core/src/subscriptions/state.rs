/// Lifecycle states of a subscription, as defined by the Part 4 Subscription
/// state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Publishing normally; the cadence and the client keep up with each
    /// other.
    Normal,
    /// Nothing to report lately; counting publishing intervals until a
    /// keep-alive is owed.
    KeepAlive,
    /// A message is owed but no publish request is available; parked until
    /// one arrives or the lifetime expires.
    Late,
    /// Lifetime expired; the next publish request is answered with a
    /// status-change notification.
    Closing,
    /// Terminal. No transitions leave this state and the publishing timer is
    /// not rescheduled.
    Closed,
}

/// Observer for subscription state transitions. The session layer uses this
/// to reap subscriptions once they close.
pub trait StateListener: Send {
    fn on_state_change(&self, subscription_id: u32, previous: State, current: State);
}
