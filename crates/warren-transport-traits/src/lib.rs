//! # Warren Transport Traits
//!
//! Transport capability traits and types for the Warren broker session layer.
//! This crate provides the abstractions the session layer consumes; it does not
//! speak any wire protocol itself.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Transport`], [`TransportConnection`], [`TransportChannel`], [`DeliverySink`]
//! - **Types**: [`Host`], [`ConnectionParams`], [`ConsumeOptions`], [`Delivery`],
//!   [`MessageProperties`], [`ReceivedInfo`]
//! - **Signals**: [`ConnectionSignal`], [`CancelReason`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//!
//! ## Usage
//!
//! Protocol implementations depend on this crate and implement [`Transport`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use warren_transport_traits::{
//!     ConnectionParams, Host, Transport, TransportConnection, TransportResult,
//! };
//!
//! #[derive(Debug)]
//! struct AmqpTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for AmqpTransport {
//!     async fn open(
//!         &self,
//!         host: &Host,
//!         params: &ConnectionParams,
//!     ) -> TransportResult<Arc<dyn TransportConnection>> {
//!         // handshake, tune, open virtual host ...
//!     }
//! }
//! ```
//!
//! With the `test-utils` feature, [`memory::MemoryBroker`] provides a scriptable
//! in-process broker for tests.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
mod host;
mod message;
mod signals;
mod traits;

#[cfg(feature = "test-utils")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-utils")))]
pub mod memory;

// Re-export all public items
pub use config::{ConnectionParams, ConsumeOptions};
pub use error::{TransportError, TransportResult};
pub use host::Host;
pub use message::{Delivery, DeliveryMode, MessageProperties, ReceivedInfo};
pub use signals::{CancelReason, ConnectionSignal};
pub use traits::{DeliverySink, Transport, TransportChannel, TransportConnection};
