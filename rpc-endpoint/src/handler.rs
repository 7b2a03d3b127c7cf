//! The seam between the transport and whatever interprets message bytes.

use std::future::Future;

use async_trait::async_trait;

use crate::error::HandlerError;

/// Turns an incoming message into its response.
///
/// One call runs per inbound message, each in its own local task, so a slow
/// handler never stalls reception of other packets. Implementations should
/// encode their own failures into the returned bytes; an `Err` is treated as
/// a bug and the message goes unanswered.
#[async_trait(?Send)]
pub trait MessageHandler: 'static {
    /// Produce the response for `message`.
    async fn handle_message(&self, message: Vec<u8>) -> Result<Vec<u8>, HandlerError>;
}

/// Adapter implementing [`MessageHandler`] for an async closure.
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap a closure returning a future as a [`MessageHandler`].
///
/// ```ignore
/// let echo = handler_fn(|message: Vec<u8>| async move { Ok::<_, HandlerError>(message) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Vec<u8>) -> Fut + 'static,
    Fut: Future<Output = Result<Vec<u8>, HandlerError>> + 'static,
{
    HandlerFn { f }
}

#[async_trait(?Send)]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Vec<u8>) -> Fut + 'static,
    Fut: Future<Output = Result<Vec<u8>, HandlerError>> + 'static,
{
    async fn handle_message(&self, message: Vec<u8>) -> Result<Vec<u8>, HandlerError> {
        (self.f)(message).await
    }
}
