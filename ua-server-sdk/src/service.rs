use crate::{
    NotificationMessage, PublishRequest, PublishResponse, ResponseHeader, StatusCode,
};
use chrono::Utc;
use tokio::sync::oneshot;

/// A pending Publish service call.
///
/// Pairs the decoded request with the completion channel the transport layer
/// awaits. Completing the call never blocks, so it is safe to do while the
/// subscription lock is held.
#[derive(Debug)]
pub struct PublishService {
    request: PublishRequest,
    response_tx: oneshot::Sender<PublishResponse>,
}

impl PublishService {
    /// Wrap a request, returning the service call and the receiver the
    /// transport (or a test) awaits the response on.
    pub fn new(request: PublishRequest) -> (Self, oneshot::Receiver<PublishResponse>) {
        let (response_tx, response_rx) = oneshot::channel();
        (
            PublishService {
                request,
                response_tx,
            },
            response_rx,
        )
    }

    pub fn request(&self) -> &PublishRequest {
        &self.request
    }

    pub fn request_handle(&self) -> u32 {
        self.request.request_header.request_handle
    }

    /// Build a response header echoing this request's handle.
    pub fn response_header(&self, service_result: StatusCode) -> ResponseHeader {
        ResponseHeader {
            timestamp: Utc::now(),
            request_handle: self.request_handle(),
            service_result,
        }
    }

    /// Complete the call. If the requester went away the response is dropped,
    /// which is the correct outcome for an abandoned publish.
    pub fn finish(self, response: PublishResponse) {
        let _ = self.response_tx.send(response);
    }

    /// Complete the call with a service fault carrying `status` and an empty
    /// notification message.
    pub fn fault(self, status: StatusCode) {
        let response_header = self.response_header(status);
        let publish_time = response_header.timestamp;
        self.finish(PublishResponse {
            response_header,
            subscription_id: 0,
            available_sequence_numbers: Vec::new(),
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 0,
                publish_time,
                notification_data: Vec::new(),
            },
            results: Vec::new(),
            diagnostic_infos: Vec::new(),
        });
    }
}
