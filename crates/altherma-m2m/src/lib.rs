//! Altherma M2M - Resource queries against a heat-pump adapter
//!
//! The adapter speaks a small subset of an M2M resource protocol over a
//! WebSocket. This crate provides the envelope codec, a [`Transport`]
//! abstraction with its WebSocket implementation, and probe helpers used by
//! discovery and polling.

pub mod envelope;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod query;
pub mod transport;

pub use envelope::{QueryResponse, RSC_NOT_FOUND, RSC_OK};
pub use error::TransportError;
pub use query::{probe_latest, read_latest_value};
pub use transport::{Endpoint, Transport, TransportConfig, WsTransport, DEFAULT_PORT};
