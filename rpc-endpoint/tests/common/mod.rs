//! Shared helpers for endpoint integration tests.
//!
//! Tests run on a paused tokio clock inside a `LocalSet`. Streams are
//! in-memory `tokio::io::duplex` pipes, either between two endpoints or
//! between an endpoint and a [`RawPeer`] that speaks the wire format by hand.

#![allow(dead_code)]

use std::time::Duration;

use rpc_endpoint::wire::{self, Frame, Packet};
use rpc_endpoint::{
    handler_fn, EndpointConfig, EndpointError, HandlerError, MessageHandler, PeerInfo,
    RpcEndpoint, TokioProviders,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Buffer size of the in-memory pipes; large enough for BIG packets.
pub const PIPE_CAPACITY: usize = 1 << 20;

pub type TestEndpoint = RpcEndpoint<TokioProviders, DuplexStream>;

/// Install a test subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Handler that answers every message with its own bytes.
pub fn echo() -> impl MessageHandler {
    handler_fn(|message: Vec<u8>| async move { Ok::<_, HandlerError>(message) })
}

/// Handler that answers every message with `response`.
pub fn reply_with(response: &'static [u8]) -> impl MessageHandler {
    handler_fn(move |_message: Vec<u8>| async move { Ok::<_, HandlerError>(response.to_vec()) })
}

/// Spawn `endpoint.run()` on the current `LocalSet`.
pub fn start(endpoint: &TestEndpoint) -> JoinHandle<Result<(), EndpointError>> {
    let endpoint = endpoint.clone();
    tokio::task::spawn_local(async move { endpoint.run().await })
}

/// Two endpoints talking to each other.
pub fn connected_pair<A, B>(
    client_config: EndpointConfig,
    client_handler: A,
    server_config: EndpointConfig,
    server_handler: B,
) -> (TestEndpoint, TestEndpoint)
where
    A: MessageHandler,
    B: MessageHandler,
{
    let (client_stream, server_stream) = tokio::io::duplex(PIPE_CAPACITY);
    let providers = TokioProviders::new();
    let client = RpcEndpoint::new(
        providers.clone(),
        client_stream,
        client_handler,
        "client",
        client_config,
    );
    let server = RpcEndpoint::new(
        providers,
        server_stream,
        server_handler,
        "server",
        server_config,
    );
    (client, server)
}

/// An endpoint whose peer is driven by hand.
pub fn raw_pair<H: MessageHandler>(config: EndpointConfig, handler: H) -> (TestEndpoint, RawPeer) {
    let (endpoint_stream, peer_stream) = tokio::io::duplex(PIPE_CAPACITY);
    let endpoint = RpcEndpoint::new(
        TokioProviders::new(),
        endpoint_stream,
        handler,
        "endpoint",
        config,
    );
    (
        endpoint,
        RawPeer {
            stream: peer_stream,
        },
    )
}

/// Wait until the endpoint has processed the peer's handshake.
pub async fn wait_for_handshake(endpoint: &TestEndpoint) -> PeerInfo {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Some(info) = endpoint.peer_info() {
                return info;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("handshake not processed")
}

/// Peer side of a connection, reading and writing packets directly.
pub struct RawPeer {
    stream: DuplexStream,
}

impl RawPeer {
    pub async fn send_handshake(&mut self, protocol: u32) {
        let info = PeerInfo {
            protocol,
            keepalive_interval: 10.73,
        };
        let data = wire::encode_handshake(&info).expect("encode handshake");
        self.send_raw(&data).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.expect("write to endpoint");
        self.stream.flush().await.expect("flush");
    }

    pub async fn send_keepalive(&mut self) {
        self.send_raw(&wire::encode_keepalive()).await;
    }

    pub async fn send_message(&mut self, message_id: u16, payload: &[u8]) {
        let data = wire::encode_message(message_id, payload).expect("encode message");
        self.send_raw(&data).await;
    }

    pub async fn send_response(&mut self, message_id: u16, payload: &[u8]) {
        let data = wire::encode_response(message_id, payload).expect("encode response");
        self.send_raw(&data).await;
    }

    pub async fn read_handshake(&mut self) -> PeerInfo {
        let (info, _) = wire::read_handshake(&mut self.stream)
            .await
            .expect("read handshake");
        info
    }

    /// Next packet of any kind, keepalives included.
    pub async fn next_frame(&mut self) -> Frame {
        wire::read_packet(&mut self.stream)
            .await
            .expect("read packet")
    }

    /// Next packet that is not a keepalive.
    pub async fn next_packet(&mut self) -> Frame {
        loop {
            let frame = self.next_frame().await;
            if frame.packet != Packet::Keepalive {
                return frame;
            }
        }
    }

    /// Next MESSAGE (small or BIG) as `(id, payload)`.
    pub async fn next_message(&mut self) -> (u16, Vec<u8>) {
        match self.next_packet().await.packet {
            Packet::Message {
                message_id,
                payload,
            } => (message_id, payload),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    /// Next RESPONSE (small or BIG) as `(id, payload)`.
    pub async fn next_response(&mut self) -> (u16, Vec<u8>) {
        match self.next_packet().await.packet {
            Packet::Response {
                message_id,
                payload,
            } => (message_id, payload),
            other => panic!("expected a response, got {other:?}"),
        }
    }

    /// Hang up.
    pub fn disconnect(self) {
        drop(self.stream);
    }
}
