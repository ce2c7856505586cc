use crate::StatusCode;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service-level failures surfaced to the session layer.
///
/// Each variant maps to the Part 4 status code the outer service dispatcher
/// places into the response header via [`ServiceError::status`].
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request named a subscription this session does not track.
    #[error("subscription {subscription_id} is not known to this session")]
    SubscriptionIdInvalid { subscription_id: u32 },

    /// Republish asked for a sequence number with no retained message.
    #[error(
        "no retained message with sequence number {sequence_number} on subscription {subscription_id}"
    )]
    MessageNotAvailable {
        subscription_id: u32,
        sequence_number: u32,
    },

    /// A list-shaped request carried no entries.
    #[error("request carried nothing to do")]
    NothingToDo,

    /// A Publish arrived while the session tracks no live subscription.
    #[error("no subscription available to service the publish request")]
    NoSubscription,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::SubscriptionIdInvalid { .. } => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            ServiceError::MessageNotAvailable { .. } => StatusCode::BAD_MESSAGE_NOT_AVAILABLE,
            ServiceError::NothingToDo => StatusCode::BAD_NOTHING_TO_DO,
            ServiceError::NoSubscription => StatusCode::BAD_NO_SUBSCRIPTION,
        }
    }
}
