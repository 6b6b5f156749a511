//! kura-cloud - Cloud connection and message routing for Kura gateways
//!
//! A [`CloudConnection`] wraps one [`DataTransport`](transport::DataTransport)
//! and dispatches what arrives on it: requests go to the [`RequestRouter`],
//! data messages to bound [`CloudSubscriber`]s. [`CloudPublisher`]s send
//! envelopes out through the same connection.

pub mod config;
pub mod connection;
pub mod listener;
pub mod publisher;
pub mod router;
pub mod subscriber;
pub mod transport;

pub use config::{
    ConnectionConfig, DataTransportConfig, LoopbackConfig, PositionMode, PublisherConfig,
    PublisherOptions, SubscriberConfig, SubscriberOptions,
};
pub use connection::{CloudConnection, InboundEndpoint};
pub use listener::{ConnectionListener, ListenerSet, MessageProperties, SubscriberListener};
pub use publisher::{CloudPublisher, PositionProvider, PublishError, Publisher};
pub use router::{ReplyPublisher, RequestRouter, RouterError};
pub use subscriber::{CloudSubscriber, SubscribeError};
pub use transport::{DataTransport, MessageId, TransportError, TransportEvent};
