//! kura-core - Core types for Kura cloud request routing
//!
//! This crate provides the envelope model, topic codec, request handler
//! abstraction and background-worker lifecycle shared by the cloud and
//! gateway crates.

pub mod codec;
pub mod error;
pub mod handler;
pub mod models;
pub mod topic;
pub mod worker;

pub use codec::{JsonCodec, PayloadCodec};
pub use error::{CodecError, EnvelopeError, HandlerError, HandlerResult};
pub use handler::{RequestHandler, RequestResources};
pub use models::*;
pub use topic::{
    expand_placeholders, topic_matches, topic_matches_with, MessageType, Method, ParsedTopic,
    TopicCodec, TopicOptions,
};
pub use worker::{CancelToken, ManagedWorker, StopOutcome, WorkerError, WorkerStatus};
