//! Server-side OPC UA subscription engine.
//!
//! Implements the Part 4 Subscription state table: a five-state machine per
//! subscription, driven by the publishing timer and by client Publish
//! requests, producing notification messages, keep-alives and status-change
//! responses. Monitored item sampling, transport encoding and session
//! handling live behind the traits in `ua-server-sdk`.

pub mod scheduler;
pub mod subscriptions;

pub use scheduler::TokioScheduler;
pub use subscriptions::{
    manager::SubscriptionManager,
    queue::SharedPublishQueue,
    revision::PublishingParameters,
    state::{State, StateListener},
    subscription::{Subscription, SubscriptionHandle},
};
