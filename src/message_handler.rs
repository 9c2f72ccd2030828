use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use crate::endpoint::Endpoint;
use crate::message::Message;

/// This trait decouples the endpoint's receive loop from the application's handling of a
///  message once it is received and decoded.
///
/// Acks and Resets have already been matched against the retransmission queue when a message
///  is passed here, so handlers see every valid inbound message. A handler replies (or
///  acknowledges separately) through the endpoint it is passed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, endpoint: &Endpoint, message: Message);
}
