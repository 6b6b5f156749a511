//! RequestHandler trait - the seam between the router and application code

use async_trait::async_trait;

use crate::error::{HandlerError, HandlerResult};
use crate::models::{RequestEnvelope, ResponseEnvelope};

/// Resources addressed by a request: the app-topic segments after the method
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestResources(Vec<String>);

impl RequestResources {
    pub fn new(resources: Vec<String>) -> Self {
        Self(resources)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.get(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the resources are exactly `path`
    pub fn matches(&self, path: &[&str]) -> bool {
        self.0.len() == path.len() && self.0.iter().zip(path).all(|(a, b)| a == b)
    }
}

impl From<Vec<String>> for RequestResources {
    fn from(resources: Vec<String>) -> Self {
        Self(resources)
    }
}

impl std::fmt::Display for RequestResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Application code answering cloud requests for one app id.
///
/// Every verb defaults to [`HandlerError::NotSupported`], which the router
/// answers with a not-found reply. Implementors override the verbs they serve.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn do_get(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        Err(HandlerError::NotSupported(format!("GET {}", resources)))
    }

    async fn do_put(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        Err(HandlerError::NotSupported(format!("PUT {}", resources)))
    }

    async fn do_post(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        Err(HandlerError::NotSupported(format!("POST {}", resources)))
    }

    async fn do_del(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        Err(HandlerError::NotSupported(format!("DEL {}", resources)))
    }

    async fn do_exec(
        &self,
        resources: &RequestResources,
        _request: &RequestEnvelope,
    ) -> HandlerResult<ResponseEnvelope> {
        Err(HandlerError::NotSupported(format!("EXEC {}", resources)))
    }
}
