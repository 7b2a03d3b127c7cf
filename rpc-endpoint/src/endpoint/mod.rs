//! The RPC endpoint: one side of a request/response connection.
//!
//! An [`RpcEndpoint`] wraps a duplex byte stream and multiplexes any number
//! of concurrent messages over it. Each message carries a 16-bit id; the
//! peer answers with a response carrying the same id, in any order.
//!
//! # Tasks
//!
//! `run()` starts three local tasks sharing the endpoint state:
//!
//! ```text
//!             send_message() ──► out queue ──► write task ──► stream
//!                                                  ▲
//!                       keepalive task ── probe ───┘
//!
//! stream ──► read task ──┬── RESPONSE ──► in-flight table ──► ResponseFuture
//!                        └── MESSAGE  ──► handler task ──► out queue
//! ```
//!
//! The write task is the only writer, so packets reach the stream in the
//! order they were queued. The first of the three to stop closes the
//! endpoint, and the others follow.
//!
//! # Shutdown
//!
//! ```ignore
//! endpoint.close();
//! endpoint.wait_closed().await;
//! ```
//!
//! `close()` is synchronous and idempotent. `wait_closed()` collects
//! cancelled handler tasks and shuts the stream down.

/// Endpoint state, core tasks, and lifecycle.
pub mod core;

/// Message id allocation and response correlation.
pub mod in_flight;

pub use self::core::RpcEndpoint;
pub use self::in_flight::ResponseFuture;
