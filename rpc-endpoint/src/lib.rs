//! # RPC Endpoint
//!
//! Multiplexed request/response transport over a single duplex byte stream.
//!
//! This crate provides:
//! - **RpcEndpoint**: concurrent messages correlated by 16-bit ids, with
//!   keepalives, timeouts, and orderly shutdown
//! - **Wire format**: a JSON handshake followed by tagged binary packets
//! - **MessageHandler**: the seam where inbound messages become responses
//! - **Providers**: time and task abstractions over a local tokio runtime
//!
//! Endpoints are `!Send` and run on a `tokio::task::LocalSet`.
//!
//! ```ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let echo = handler_fn(|message: Vec<u8>| async move { Ok::<_, HandlerError>(message) });
//!     let endpoint = RpcEndpoint::new(TokioProviders::new(), stream, echo, "client", EndpointConfig::default());
//!     tokio::task::spawn_local({
//!         let endpoint = endpoint.clone();
//!         async move { endpoint.run().await }
//!     });
//!     let response = endpoint.send_message(b"ping").await?;
//! }).await;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Endpoint configuration and per-call send options.
pub mod config;

/// The endpoint itself.
pub mod endpoint;

/// Error types for endpoint operations.
pub mod error;

/// Message handler trait.
pub mod handler;

/// Time and task providers.
pub mod providers;

/// Handshake and packet encoding.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{EndpointConfig, SendOptions};
pub use endpoint::{ResponseFuture, RpcEndpoint};
pub use error::{CommunicationError, EndpointError, HandlerError};
pub use handler::{handler_fn, HandlerFn, MessageHandler};
pub use providers::{
    Providers, TaskProvider, TimeError, TimeProvider, TokioProviders, TokioTaskProvider,
    TokioTimeProvider,
};
pub use wire::{PeerInfo, WireError, MAX_SMALL_PAYLOAD, OUR_PROTOCOL};
