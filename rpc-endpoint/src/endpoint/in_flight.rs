//! Correlation of outgoing messages with their responses.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::CommunicationError;

/// Identifies one registration in the [`InFlightTable`].
///
/// The ticket distinguishes a retired record from a later one that reuses
/// the same 16-bit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InFlightKey {
    pub(crate) message_id: u16,
    ticket: u64,
}

struct InFlightMessage {
    ticket: u64,
    response_tx: oneshot::Sender<Vec<u8>>,
}

/// Outstanding messages keyed by message id.
pub(crate) struct InFlightTable {
    entries: HashMap<u16, InFlightMessage>,
    next_message_id: u16,
    next_ticket: u64,
}

impl InFlightTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_message_id: 0,
            next_ticket: 0,
        }
    }

    /// Allocate the next free looping id and register a waiter for it.
    ///
    /// Returns `None` when every id is in flight.
    pub(crate) fn register(&mut self) -> Option<(InFlightKey, oneshot::Receiver<Vec<u8>>)> {
        if self.entries.len() > u16::MAX as usize {
            return None;
        }
        let message_id = loop {
            let candidate = self.next_message_id;
            self.next_message_id = candidate.wrapping_add(1);
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        let (response_tx, response_rx) = oneshot::channel();
        self.entries.insert(
            message_id,
            InFlightMessage {
                ticket,
                response_tx,
            },
        );
        Some((InFlightKey { message_id, ticket }, response_rx))
    }

    /// Hand a response to its waiter.
    ///
    /// Returns `false` if no message with this id is in flight.
    pub(crate) fn complete(&mut self, message_id: u16, payload: Vec<u8>) -> bool {
        match self.entries.remove(&message_id) {
            Some(entry) => {
                // The caller may have given up already; nothing to do then.
                let _ = entry.response_tx.send(payload);
                true
            }
            None => false,
        }
    }

    /// Remove a registration if it is still the one identified by `key`.
    pub(crate) fn retire(&mut self, key: InFlightKey) {
        let is_same = self
            .entries
            .get(&key.message_id)
            .is_some_and(|entry| entry.ticket == key.ticket);
        if is_same {
            self.entries.remove(&key.message_id);
        }
    }

    /// Drop every waiter; their receivers observe a closed channel.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Future returned by [`RpcEndpoint::send_message`](crate::RpcEndpoint::send_message).
///
/// The message is already queued for sending when this is created.
/// Resolves to the peer's response bytes or a [`CommunicationError`].
/// Dropping it abandons the message and releases its id.
pub struct ResponseFuture {
    message_id: Option<u16>,
    inner: Pin<Box<dyn Future<Output = Result<Vec<u8>, CommunicationError>>>>,
}

impl ResponseFuture {
    pub(crate) fn new<F>(message_id: u16, future: F) -> Self
    where
        F: Future<Output = Result<Vec<u8>, CommunicationError>> + 'static,
    {
        Self {
            message_id: Some(message_id),
            inner: Box::pin(future),
        }
    }

    /// A future that fails immediately without anything being sent.
    pub(crate) fn failed(error: CommunicationError) -> Self {
        Self {
            message_id: None,
            inner: Box::pin(std::future::ready(Err(error))),
        }
    }

    /// Id the message was sent with, if it was sent at all.
    pub fn message_id(&self) -> Option<u16> {
        self.message_id
    }
}

impl Future for ResponseFuture {
    type Output = Result<Vec<u8>, CommunicationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}
