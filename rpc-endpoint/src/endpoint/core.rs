//! Endpoint implementation: shared state, core tasks, and lifecycle.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use super::in_flight::{InFlightKey, InFlightTable, ResponseFuture};
use crate::config::{EndpointConfig, SendOptions};
use crate::error::{is_expected_io_error, CommunicationError, EndpointError};
use crate::handler::MessageHandler;
use crate::providers::{Providers, TaskProvider, TimeProvider};
use crate::wire::{
    self, encode_handshake, encode_keepalive, encode_message, encode_response, Packet, PeerInfo,
    MAX_BIG_PAYLOAD, MAX_SMALL_PAYLOAD, OUR_PROTOCOL,
};

/// One side of a point-to-point RPC connection over a duplex stream.
///
/// Cloning yields another handle to the same endpoint. The type is `!Send`:
/// an endpoint lives on the thread (and `LocalSet`) that created it.
pub struct RpcEndpoint<P: Providers, S> {
    shared: Rc<Shared<P, S>>,
}

impl<P: Providers, S> Clone for RpcEndpoint<P, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Providers, S> fmt::Debug for RpcEndpoint<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("RpcEndpoint")
            .field("label", &self.shared.label)
            .field("closing", &state.closing)
            .field("peer_info", &state.peer_info)
            .field("in_flight", &state.in_flight.len())
            .field("queued", &state.out_packets.len())
            .finish()
    }
}

/// A serialized packet waiting for the write task.
struct OutgoingPacket {
    data: Vec<u8>,
    is_big: bool,
}

/// Progress of the final stream shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterShutdown {
    NotStarted,
    InProgress,
    Done,
}

/// Mutable endpoint state. Only touched from the endpoint's own thread,
/// and never borrowed across an await point.
struct EndpointState {
    closing: bool,
    closed: bool,
    run_called: bool,
    core_tasks_running: bool,
    writer_shutdown: WriterShutdown,
    peer_info: Option<PeerInfo>,
    out_packets: VecDeque<OutgoingPacket>,
    did_warn_queue_buildup: bool,
    in_flight: InFlightTable,
    total_bytes_read: u64,
    last_keepalive_receive_time: Duration,
    handler_tasks: HashMap<u64, JoinHandle<()>>,
    next_handler_task_id: u64,
}

struct Shared<P: Providers, S> {
    providers: P,
    handler: Rc<dyn MessageHandler>,
    label: String,
    config: EndpointConfig,
    state: RefCell<EndpointState>,
    reader: RefCell<Option<ReadHalf<S>>>,
    writer: RefCell<Option<WriteHalf<S>>>,
    /// Wakes the write task when the outgoing queue goes non-empty.
    data_to_send: Notify,
    /// Broadcast on every lifecycle transition; waiters re-check state.
    state_changed: Notify,
}

impl<P, S> RpcEndpoint<P, S>
where
    P: Providers,
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    /// Create an endpoint around `stream`.
    ///
    /// Nothing happens on the stream until [`run`](Self::run) is awaited.
    /// Messages may be sent before that; they are queued.
    pub fn new<H: MessageHandler>(
        providers: P,
        stream: S,
        handler: H,
        label: impl Into<String>,
        config: EndpointConfig,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let now = providers.time().now();
        let state = EndpointState {
            closing: false,
            closed: false,
            run_called: false,
            core_tasks_running: false,
            writer_shutdown: WriterShutdown::NotStarted,
            peer_info: None,
            out_packets: VecDeque::new(),
            did_warn_queue_buildup: false,
            in_flight: InFlightTable::new(),
            total_bytes_read: 0,
            last_keepalive_receive_time: now,
            handler_tasks: HashMap::new(),
            next_handler_task_id: 0,
        };

        Self {
            shared: Rc::new(Shared {
                providers,
                handler: Rc::new(handler),
                label: label.into(),
                config,
                state: RefCell::new(state),
                reader: RefCell::new(Some(reader)),
                writer: RefCell::new(Some(writer)),
                data_to_send: Notify::new(),
                state_changed: Notify::new(),
            }),
        }
    }

    /// Run the connection until it ends.
    ///
    /// Starts the read, write, and keepalive tasks and waits for all three.
    /// Whichever ends first (peer hangup, keepalive timeout, protocol error,
    /// or [`close`](Self::close)) brings the others down with it. Returns
    /// after [`wait_closed`](Self::wait_closed) has completed.
    ///
    /// Connection errors are logged, never returned. The only error is
    /// [`EndpointError::AlreadyRun`].
    ///
    /// Must be called inside a `tokio::task::LocalSet`.
    pub async fn run(&self) -> Result<(), EndpointError> {
        let shared = &self.shared;
        let closed_before_run = {
            let mut state = shared.state.borrow_mut();
            if state.run_called {
                return Err(EndpointError::AlreadyRun);
            }
            state.run_called = true;
            state.closing
        };
        if closed_before_run {
            shared.lifecycle(format_args!("closed before run() started"));
            shared.wait_closed().await;
            return Ok(());
        }

        let reader = shared.reader.borrow_mut().take();
        let writer = shared.writer.borrow_mut().take();
        let (Some(reader), Some(writer)) = (reader, writer) else {
            // Only reachable through wait_closed(), which closes first.
            shared.close();
            shared.wait_closed().await;
            return Ok(());
        };
        {
            let mut state = shared.state.borrow_mut();
            state.core_tasks_running = true;
            state.last_keepalive_receive_time = shared.providers.time().now();
        }

        let mut guard = RunGuard {
            shared: shared.clone(),
            finished: false,
        };

        shared.lifecycle(format_args!("starting"));

        let task = shared.providers.task();
        let handles = [
            task.spawn_task("rpc_read", shared.clone().read_task(reader)),
            task.spawn_task("rpc_write", shared.clone().write_task(writer)),
            task.spawn_task("rpc_keepalive", shared.clone().keepalive_task()),
        ];

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(label = %shared.label, error = %e, "core endpoint task failed");
            }
        }

        // A panicked task never reached its own close().
        shared.close();
        shared.state.borrow_mut().core_tasks_running = false;
        shared.state_changed.notify_waiters();

        shared.wait_closed().await;
        guard.finished = true;
        Ok(())
    }

    /// Send a message with default options.
    ///
    /// See [`send_message_with`](Self::send_message_with).
    pub fn send_message(&self, message: &[u8]) -> ResponseFuture {
        self.send_message_with(message, SendOptions::default())
    }

    /// Send a message and get a future for its response.
    ///
    /// The message is queued before this returns, so the order of calls is
    /// the order on the wire. The future first waits for the peer's
    /// handshake (to validate the size against its protocol), then for the
    /// response, all bounded by the timeout.
    ///
    /// On timeout or connection loss the future yields a
    /// [`CommunicationError`] and, unless
    /// [`keep_open_on_error`](SendOptions::keep_open_on_error) was set, the
    /// whole endpoint is closed. Dropping the future before it resolves
    /// counts as a failure too.
    pub fn send_message_with(&self, message: &[u8], options: SendOptions) -> ResponseFuture {
        let shared = &self.shared;
        let size = message.len();
        let timeout = options
            .timeout
            .unwrap_or(shared.config.default_message_timeout);

        let (key, response_rx) = {
            let mut state = shared.state.borrow_mut();
            if state.closing {
                return ResponseFuture::failed(CommunicationError::Closed);
            }

            let peer_protocol = state.peer_info.map_or(OUR_PROTOCOL, |info| info.protocol);
            let max = state
                .peer_info
                .map_or(MAX_BIG_PAYLOAD, |info| info.max_payload());
            if size > max {
                return ResponseFuture::failed(CommunicationError::MessageTooLarge {
                    size,
                    max,
                    peer_protocol,
                });
            }

            let Some((key, response_rx)) = state.in_flight.register() else {
                tracing::error!(label = %shared.label, "every message id is in flight");
                return ResponseFuture::failed(CommunicationError::TooManyInFlight);
            };
            let packet = match encode_message(key.message_id, message) {
                Ok(packet) => packet,
                Err(e) => {
                    state.in_flight.retire(key);
                    tracing::error!(label = %shared.label, error = %e, "failed to encode message");
                    return ResponseFuture::failed(CommunicationError::MessageTooLarge {
                        size,
                        max,
                        peer_protocol,
                    });
                }
            };
            shared.enqueue(&mut state, packet, size > MAX_SMALL_PAYLOAD);
            (key, response_rx)
        };

        if shared.config.debug_print_io {
            tracing::info!(label = %shared.label, message_id = key.message_id, len = size, "sending message");
        } else {
            tracing::trace!(label = %shared.label, message_id = key.message_id, len = size, "sending message");
        }

        let close_on_error = options.close_on_error;
        let mut guard = InFlightGuard {
            shared: shared.clone(),
            key,
            close_on_error,
            completed: false,
        };
        ResponseFuture::new(key.message_id, async move {
            let result = guard
                .shared
                .await_response(size, response_rx, timeout)
                .await;
            guard.completed = true;
            if let Err(e) = &result {
                tracing::debug!(
                    label = %guard.shared.label,
                    message_id = guard.key.message_id,
                    error = %e,
                    "message failed"
                );
                if close_on_error && e.indicates_unhealthy_channel() {
                    guard.shared.close();
                }
            }
            result
        })
    }

    /// Begin shutting the endpoint down.
    ///
    /// Idempotent. Pending sends fail with [`CommunicationError::Closed`],
    /// running handlers are cancelled, and the core tasks wind down.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Whether [`close`](Self::close) has been called (explicitly or because
    /// the connection ended).
    pub fn is_closing(&self) -> bool {
        self.shared.state.borrow().closing
    }

    /// Whether shutdown has fully completed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.borrow().closed
    }

    /// Wait for shutdown to finish, closing the endpoint first if needed.
    ///
    /// Collects cancelled handler tasks, waits for the core tasks if the
    /// endpoint was run, then shuts the stream down within
    /// [`EndpointConfig::close_timeout`].
    pub async fn wait_closed(&self) {
        self.shared.wait_closed().await;
    }

    /// The peer's handshake, once received.
    pub fn peer_info(&self) -> Option<PeerInfo> {
        self.shared.state.borrow().peer_info
    }

    /// Total bytes read from the stream so far.
    pub fn total_bytes_read(&self) -> u64 {
        self.shared.state.borrow().total_bytes_read
    }

    /// Number of messages awaiting a response.
    pub fn in_flight_count(&self) -> usize {
        self.shared.state.borrow().in_flight.len()
    }

    /// Diagnostic label given at construction.
    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<P: Providers, S> Shared<P, S> {
    fn lifecycle(&self, message: fmt::Arguments<'_>) {
        if self.config.debug_print {
            tracing::info!(label = %self.label, "{}", message);
        } else {
            tracing::debug!(label = %self.label, "{}", message);
        }
    }

    fn io_event(&self, message: fmt::Arguments<'_>) {
        if self.config.debug_print_io {
            tracing::info!(label = %self.label, "{}", message);
        } else {
            tracing::trace!(label = %self.label, "{}", message);
        }
    }

    /// Append a packet to the outgoing queue. Never suspends.
    fn enqueue(&self, state: &mut EndpointState, data: Vec<u8>, is_big: bool) {
        let first_unsent = state.out_packets.is_empty();
        state.out_packets.push_back(OutgoingPacket { data, is_big });

        if state.out_packets.len() > self.config.queue_warning_threshold
            && !state.did_warn_queue_buildup
        {
            state.did_warn_queue_buildup = true;
            tracing::warn!(
                label = %self.label,
                queued = state.out_packets.len(),
                "outgoing packet queue is building up"
            );
        }

        if first_unsent {
            self.data_to_send.notify_one();
        }
    }

    /// Wait until `check` yields a value, re-checking on every state change.
    async fn wait_until<T>(&self, check: impl Fn(&EndpointState) -> Option<T>) -> T {
        loop {
            let notified = self.state_changed.notified();
            let ready = check(&*self.state.borrow());
            if let Some(value) = ready {
                return value;
            }
            notified.await;
        }
    }

    /// Peer info once known, or `None` if the endpoint closes first.
    async fn wait_for_peer_info(&self) -> Option<PeerInfo> {
        self.wait_until(|state| match state.peer_info {
            Some(info) => Some(Some(info)),
            None if state.closing => Some(None),
            None => None,
        })
        .await
    }

    async fn wait_for_closing(&self) {
        self.wait_until(|state| state.closing.then_some(())).await
    }

    async fn await_response(
        &self,
        size: usize,
        response_rx: oneshot::Receiver<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CommunicationError> {
        let time = self.providers.time();
        let outcome = time
            .timeout(timeout, async {
                let Some(peer_info) = self.wait_for_peer_info().await else {
                    return Err(CommunicationError::Closed);
                };
                if size > peer_info.max_payload() {
                    return Err(CommunicationError::MessageTooLarge {
                        size,
                        max: peer_info.max_payload(),
                        peer_protocol: peer_info.protocol,
                    });
                }
                response_rx.await.map_err(|_| CommunicationError::Closed)
            })
            .await;
        outcome.unwrap_or(Err(CommunicationError::Timeout { timeout }))
    }

    fn close(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.closing {
                return;
            }
            state.closing = true;
            state.in_flight.clear();
            state.out_packets.clear();
            for handle in state.handler_tasks.values() {
                handle.abort();
            }
        }
        self.lifecycle(format_args!("closing"));
        self.state_changed.notify_waiters();
    }

    /// Log how a core task ended, then close the endpoint.
    fn finish_core_task(&self, name: &str, result: Result<(), EndpointError>) {
        match result {
            Ok(()) => {
                self.lifecycle(format_args!("{} task stopped", name));
            }
            Err(e) if e.is_expected() => {
                self.lifecycle(format_args!("{} task ended: {}", name, e));
            }
            Err(e) => {
                tracing::error!(label = %self.label, task = name, error = %e, "unexpected error in endpoint task");
            }
        }
        self.close();
    }
}

impl<P, S> Shared<P, S>
where
    P: Providers,
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    async fn wait_closed(&self) {
        self.close();

        let handler_tasks: Vec<JoinHandle<()>> = {
            let mut state = self.state.borrow_mut();
            state.handler_tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handler_tasks {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(label = %self.label, error = %e, "message handler task failed");
                }
            }
        }

        if self.state.borrow().run_called {
            self.wait_until(|state| (!state.core_tasks_running).then_some(()))
                .await;
        }

        let writer = {
            let mut state = self.state.borrow_mut();
            let writer = self.writer.borrow_mut().take();
            match (writer, state.writer_shutdown) {
                (Some(writer), WriterShutdown::NotStarted) => {
                    state.writer_shutdown = WriterShutdown::InProgress;
                    Some(writer)
                }
                (_, WriterShutdown::InProgress) => None,
                (_, _) => {
                    state.writer_shutdown = WriterShutdown::Done;
                    None
                }
            }
        };

        match writer {
            Some(mut writer) => {
                let time = self.providers.time();
                match time.timeout(self.config.close_timeout, writer.shutdown()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if is_expected_io_error(&e) => {
                        tracing::debug!(label = %self.label, error = %e, "stream already gone while closing");
                    }
                    Ok(Err(e)) => {
                        tracing::error!(label = %self.label, error = %e, "unexpected error closing stream");
                    }
                    Err(_) => {
                        tracing::warn!(
                            label = %self.label,
                            timeout = ?self.config.close_timeout,
                            "timed out closing stream"
                        );
                    }
                }
                self.state.borrow_mut().writer_shutdown = WriterShutdown::Done;
                self.state_changed.notify_waiters();
            }
            None => {
                self.wait_until(|state| {
                    (state.writer_shutdown == WriterShutdown::Done).then_some(())
                })
                .await;
            }
        }

        let newly_closed = {
            let mut state = self.state.borrow_mut();
            let newly_closed = !state.closed;
            state.closed = true;
            newly_closed
        };
        if newly_closed {
            self.lifecycle(format_args!("closed"));
        }
    }

    async fn read_task(self: Rc<Self>, mut reader: ReadHalf<S>) {
        let result = tokio::select! {
            result = self.read_loop(&mut reader) => result,
            _ = self.wait_for_closing() => Ok(()),
        };
        self.finish_core_task("read", result);
    }

    async fn read_loop(self: &Rc<Self>, reader: &mut ReadHalf<S>) -> Result<(), EndpointError> {
        let (peer_info, consumed) = wire::read_handshake(reader).await?;
        {
            let mut state = self.state.borrow_mut();
            state.total_bytes_read += consumed as u64;
            state.peer_info = Some(peer_info);
            state.last_keepalive_receive_time = self.providers.time().now();
        }
        self.state_changed.notify_waiters();
        self.lifecycle(format_args!(
            "received handshake: protocol {}, keepalive interval {}s",
            peer_info.protocol, peer_info.keepalive_interval
        ));

        loop {
            let frame = wire::read_packet(reader).await?;
            self.state.borrow_mut().total_bytes_read += frame.wire_len as u64;

            match frame.packet {
                Packet::Keepalive => {
                    self.io_event(format_args!("received keepalive"));
                    self.state.borrow_mut().last_keepalive_receive_time =
                        self.providers.time().now();
                }
                Packet::Message {
                    message_id,
                    payload,
                } => {
                    self.io_event(format_args!(
                        "received {:?} id={} len={}",
                        frame.packet_type,
                        message_id,
                        payload.len()
                    ));
                    self.spawn_handler(message_id, payload);
                }
                Packet::Response {
                    message_id,
                    payload,
                } => {
                    self.io_event(format_args!(
                        "received {:?} id={} len={}",
                        frame.packet_type,
                        message_id,
                        payload.len()
                    ));
                    let delivered = self
                        .state
                        .borrow_mut()
                        .in_flight
                        .complete(message_id, payload);
                    if !delivered {
                        tracing::warn!(
                            label = %self.label,
                            message_id,
                            "response for a message no longer in flight; discarding"
                        );
                    }
                }
            }
        }
    }

    /// Run the handler for one inbound message in its own task.
    fn spawn_handler(self: &Rc<Self>, message_id: u16, payload: Vec<u8>) {
        let task_id = {
            let mut state = self.state.borrow_mut();
            if state.closing {
                return;
            }
            let task_id = state.next_handler_task_id;
            state.next_handler_task_id += 1;
            task_id
        };

        let shared = self.clone();
        let handle = self
            .providers
            .task()
            .spawn_task("rpc_message_handler", async move {
                shared.handle_message(message_id, payload).await;
                shared.state.borrow_mut().handler_tasks.remove(&task_id);
            });
        self.state.borrow_mut().handler_tasks.insert(task_id, handle);
    }

    async fn handle_message(&self, message_id: u16, payload: Vec<u8>) {
        let response = match self.handler.handle_message(payload).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    label = %self.label,
                    message_id,
                    error = %e,
                    "message handler failed; message left unanswered"
                );
                return;
            }
        };

        let mut state = self.state.borrow_mut();
        if state.closing {
            return;
        }
        let max = state
            .peer_info
            .map_or(MAX_BIG_PAYLOAD, |info| info.max_payload());
        if response.len() > max {
            tracing::error!(
                label = %self.label,
                message_id,
                len = response.len(),
                max,
                "response too large for peer; message left unanswered"
            );
            return;
        }
        match encode_response(message_id, &response) {
            Ok(packet) => self.enqueue(&mut state, packet, response.len() > MAX_SMALL_PAYLOAD),
            Err(e) => {
                tracing::error!(label = %self.label, message_id, error = %e, "failed to encode response");
            }
        }
    }

    async fn write_task(self: Rc<Self>, mut writer: WriteHalf<S>) {
        let result = tokio::select! {
            result = self.write_loop(&mut writer) => result,
            _ = self.wait_for_closing() => Ok(()),
        };
        *self.writer.borrow_mut() = Some(writer);
        self.finish_core_task("write", result);
    }

    /// Sole writer of the stream: handshake first, then the queue in order.
    async fn write_loop(&self, writer: &mut WriteHalf<S>) -> Result<(), EndpointError> {
        let handshake = encode_handshake(&PeerInfo::local(self.config.keepalive_interval))?;
        writer.write_all(&handshake).await?;
        writer.flush().await?;

        loop {
            let next = self.state.borrow_mut().out_packets.pop_front();
            let Some(packet) = next else {
                self.data_to_send.notified().await;
                continue;
            };

            if packet.is_big {
                // BIG kinds must not reach a peer before we know it speaks them.
                let Some(peer_info) = self.wait_for_peer_info().await else {
                    return Ok(());
                };
                if !peer_info.supports_big_packets() {
                    tracing::error!(
                        label = %self.label,
                        peer_protocol = peer_info.protocol,
                        "dropping oversized packet for protocol-1 peer"
                    );
                    continue;
                }
            }

            self.io_event(format_args!("writing {} bytes", packet.data.len()));
            writer.write_all(&packet.data).await?;
            writer.flush().await?;
        }
    }

    async fn keepalive_task(self: Rc<Self>) {
        let result = tokio::select! {
            result = self.keepalive_loop() => result,
            _ = self.wait_for_closing() => Ok(()),
        };
        self.finish_core_task("keepalive", result);
    }

    /// Probe the peer periodically and watch for its probes.
    ///
    /// Only keepalives (and the handshake) count as signs of life; ordinary
    /// message traffic does not.
    async fn keepalive_loop(&self) -> Result<(), EndpointError> {
        let time = self.providers.time();
        loop {
            time.sleep(self.config.keepalive_interval).await;

            let last_receive = {
                let mut state = self.state.borrow_mut();
                if !self.config.suppress_keepalives {
                    self.enqueue(&mut state, encode_keepalive(), false);
                }
                state.last_keepalive_receive_time
            };

            let elapsed = time.now().saturating_sub(last_receive);
            if elapsed > self.config.keepalive_timeout {
                return Err(EndpointError::KeepaliveTimeout { elapsed });
            }
        }
    }
}

impl<P: Providers, S> Drop for Shared<P, S> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.run_called && !state.closed {
            tracing::warn!(
                label = %self.label,
                "endpoint dropped without being closed; call close() and wait_closed()"
            );
        }
    }
}

/// Releases a message's in-flight record however its future ends.
///
/// A future dropped before resolving is a cancelled send; with
/// `close_on_error` that closes the endpoint like any other failure.
struct InFlightGuard<P: Providers, S> {
    shared: Rc<Shared<P, S>>,
    key: InFlightKey,
    close_on_error: bool,
    completed: bool,
}

impl<P: Providers, S> Drop for InFlightGuard<P, S> {
    fn drop(&mut self) {
        let cancelled = match self.shared.state.try_borrow_mut() {
            Ok(mut state) => {
                state.in_flight.retire(self.key);
                !self.completed && !state.closing
            }
            Err(_) => {
                tracing::error!(
                    label = %self.shared.label,
                    message_id = self.key.message_id,
                    "could not release in-flight record"
                );
                false
            }
        };
        if !cancelled {
            return;
        }
        tracing::debug!(
            label = %self.shared.label,
            message_id = self.key.message_id,
            close_on_error = self.close_on_error,
            "message cancelled"
        );
        if self.close_on_error {
            self.shared.close();
        }
    }
}

/// Closes the endpoint if `run()` is dropped before finishing.
struct RunGuard<P: Providers, S> {
    shared: Rc<Shared<P, S>>,
    finished: bool,
}

impl<P: Providers, S> Drop for RunGuard<P, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(label = %self.shared.label, "run() was cancelled; closing endpoint");
        self.shared.close();
    }
}
