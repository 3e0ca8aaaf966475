//! # Warren Client
//!
//! Resilient session layer for message-broker clients. Keeps one connection
//! open against a cluster of broker hosts, fails over between them, and keeps
//! consumers subscribed and ordered across reconnects.
//!
//! ## Features
//!
//! - Cluster failover with ordered or shuffled host selection
//! - Indefinite background reconnection with bounded connection attempts
//! - Typed in-process event bus for connection and consumer lifecycle events
//! - One shared, strictly ordered dispatcher thread for consumer callbacks
//! - Self-healing consumers that survive reconnects and broker cancellations
//! - Transport-agnostic design (works with any [`Transport`] implementation)
//!
//! ## Architecture
//!
//! ```text
//!  HostSelectionStrategy ◄── PersistentConnection ──publish──► EventBus
//!                                   │                            │
//!                             create_channel                subscribe
//!                                   ▼                            ▼
//!                        InternalConsumerFactory ◄──── PersistentConsumer
//!                                   │
//!                     DeliverySink (I/O context)
//!                                   ▼
//!                          ConsumerDispatcher ──► MessageHandler
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warren_client::{
//!     AckStrategy, ConnectionConfig, ConsumerConfig, HandlerResult, MessageProperties,
//!     ReceivedInfo, Session, Transport,
//! };
//!
//! # async fn example(transport: Arc<dyn Transport>) -> warren_client::Result<()> {
//! let config = ConnectionConfig::new()
//!     .with_host("rabbit-1", 5672)
//!     .with_host("rabbit-2", 5672)
//!     .with_credentials("orders", "secret");
//!
//! let session = Session::connect(config, transport)?;
//! let _consumer = session.consume(
//!     "orders",
//!     ConsumerConfig::default(),
//!     |body: &[u8], _: &MessageProperties, _: &ReceivedInfo| -> HandlerResult {
//!         println!("received {} bytes", body.len());
//!         Ok(AckStrategy::Ack)
//!     },
//! )?;
//!
//! session.wait_connected().await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod connection;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod host_selection;
pub mod metrics;
pub mod session;

pub use config::{ConnectionConfig, ConsumerConfig, HostConfig};
pub use connection::{ConnectionState, PersistentConnection};
pub use consumer::{
    AckStrategy, ConsumerStatus, HandlerError, HandlerResult, InternalConsumerFactory,
    MessageHandler, PersistentConsumer,
};
pub use dispatcher::ConsumerDispatcher;
pub use error::{Error, Result};
pub use event_bus::{Event, EventBus, Subscription};
pub use host_selection::{
    HostSelection, HostSelectionStrategy, OrderedHostSelection, RandomHostSelection,
};
pub use metrics::{ConnectionStats, DispatcherStats};
pub use session::Session;

pub use warren_transport_traits::{
    Host, MessageProperties, ReceivedInfo, Transport, TransportChannel, TransportError,
};
