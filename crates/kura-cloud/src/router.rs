//! Request router: dispatches cloud requests to registered handlers and
//! publishes the correlated reply.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use kura_core::{
    Envelope, EnvelopeError, HandlerError, HandlerResult, Method, RequestEnvelope,
    RequestHandler, RequestResources, ResponseCode, ResponseEnvelope, TopicCodec,
};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::transport::{MessageId, TransportError};

/// Replies are fire-and-forget
pub const REPLY_QOS: u8 = 0;
pub const REPLY_RETAIN: bool = false;
pub const REPLY_PRIORITY: u8 = 1;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Correlation metadata missing; no reply can be addressed
    #[error("Malformed request: {0}")]
    MalformedRequest(#[from] EnvelopeError),

    #[error("No handler registered for app id: {0}")]
    HandlerNotFound(String),

    #[error("Handler already registered for app id: {0}")]
    AlreadyRegistered(String),

    #[error("Failed to publish reply: {0}")]
    Transport(#[from] TransportError),
}

impl RouterError {
    /// Reply code this failure corresponds to
    pub fn response_code(&self) -> ResponseCode {
        match self {
            RouterError::MalformedRequest(_) => ResponseCode::BadRequest,
            RouterError::HandlerNotFound(_) => ResponseCode::NotFound,
            RouterError::AlreadyRegistered(_) | RouterError::Transport(_) => ResponseCode::Error,
        }
    }
}

/// Publish primitive used to send replies
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    /// Publish a reply envelope with reply QoS, retain and priority
    async fn publish_reply(&self, topic: &str, envelope: &Envelope)
        -> Result<MessageId, TransportError>;
}

/// Routes requests by app id to a [`RequestHandler`]
pub struct RequestRouter {
    topics: TopicCodec,
    replies: Arc<dyn ReplyPublisher>,
    handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
}

impl RequestRouter {
    pub fn new(topics: TopicCodec, replies: Arc<dyn ReplyPublisher>) -> Self {
        Self {
            topics,
            replies,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under `handler_id`. At most one handler per id.
    pub fn register(
        &self,
        handler_id: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RouterError> {
        let handler_id = handler_id.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&handler_id) {
            return Err(RouterError::AlreadyRegistered(handler_id));
        }
        info!(handler_id = %handler_id, "Request handler registered");
        handlers.insert(handler_id, handler);
        Ok(())
    }

    /// Remove a handler. Returns false if nothing was registered under the id.
    pub fn unregister(&self, handler_id: &str) -> bool {
        let removed = self.handlers.write().remove(handler_id).is_some();
        if removed {
            info!(handler_id = %handler_id, "Request handler unregistered");
        } else {
            debug!(handler_id = %handler_id, "Unregister ignored: no such handler");
        }
        removed
    }

    pub fn is_registered(&self, handler_id: &str) -> bool {
        self.handlers.read().contains_key(handler_id)
    }

    pub fn handler_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle one request addressed to `handler_id` on `app_topic`.
    ///
    /// Returns the reply that was published. Requests lacking correlation
    /// metadata are rejected before any handler runs and get no reply.
    pub async fn handle(
        &self,
        handler_id: &str,
        app_topic: &str,
        envelope: Envelope,
    ) -> Result<ResponseEnvelope, RouterError> {
        let request = RequestEnvelope::try_from(envelope).map_err(|e| {
            warn!(handler_id = %handler_id, app_topic = %app_topic, error = %e, "Dropping malformed request");
            RouterError::MalformedRequest(e)
        })?;

        debug!(
            handler_id = %handler_id,
            app_topic = %app_topic,
            request_id = %request.request_id(),
            requester = %request.requester_id(),
            "Request received"
        );

        let handler = self.handlers.read().get(handler_id).cloned();
        let mut response = match handler {
            Some(handler) => self.dispatch(handler.as_ref(), app_topic, &request).await,
            None => {
                let err = RouterError::HandlerNotFound(handler_id.to_string());
                warn!(handler_id = %handler_id, request_id = %request.request_id(), "{}", err);
                ResponseEnvelope::failure(ResponseCode::NotFound, &err)
            }
        };
        response.envelope.timestamp = Some(Utc::now());

        let topic =
            self.topics
                .reply_topic(request.requester_id(), handler_id, request.request_id());
        let wire = response.clone().into_envelope();
        match self.replies.publish_reply(&topic, &wire).await {
            Ok(message_id) => {
                debug!(
                    %topic,
                    message_id,
                    code = response.code.as_u16(),
                    "Reply published"
                );
                Ok(response)
            }
            Err(e) => {
                error!(%topic, request_id = %request.request_id(), error = %e, "Failed to publish reply");
                Err(RouterError::Transport(e))
            }
        }
    }

    async fn dispatch(
        &self,
        handler: &dyn RequestHandler,
        app_topic: &str,
        request: &RequestEnvelope,
    ) -> ResponseEnvelope {
        let (method, resources) = self.topics.decode(app_topic);
        let resources = RequestResources::new(resources);

        let invocation = match &method {
            Method::Get => handler.do_get(&resources, request),
            Method::Put => handler.do_put(&resources, request),
            Method::Post => handler.do_post(&resources, request),
            Method::Del => handler.do_del(&resources, request),
            Method::Exec => handler.do_exec(&resources, request),
            Method::Unknown(token) => {
                warn!(method = %token, app_topic = %app_topic, "Unknown request method");
                let mut response = ResponseEnvelope::new(ResponseCode::BadRequest);
                response.exception_message = Some(format!("Unknown method: {}", token));
                return response;
            }
        };

        // A panicking handler still gets a reply and leaves the dispatcher running
        let result: HandlerResult<ResponseEnvelope> =
            match AssertUnwindSafe(invocation).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(method = %method, resources = %resources, panic = %message, "Handler panicked");
                    Err(HandlerError::internal(format!("handler panicked: {}", message)))
                }
            };

        match result {
            Ok(response) => response,
            Err(e) => {
                let code = e.response_code();
                debug!(method = %method, resources = %resources, code = code.as_u16(), error = %e, "Handler failed");
                ResponseEnvelope::failure(code, &e)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
