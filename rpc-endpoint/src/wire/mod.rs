//! Wire format for the endpoint protocol.
//!
//! Each side first sends a handshake with no type tag:
//!
//! ```text
//! [length:4 BE][PeerInfo JSON: length bytes]
//! ```
//!
//! Every later packet starts with a one-byte tag:
//!
//! | Tag | Packet | Body |
//! |---|---|---|
//! | 1 | KEEPALIVE | none |
//! | 2 | MESSAGE | `[id:2][len:2][payload]` |
//! | 3 | RESPONSE | `[id:2][len:2][payload]` |
//! | 4 | MESSAGE_BIG | `[id:2][len:4][payload]` |
//! | 5 | RESPONSE_BIG | `[id:2][len:4][payload]` |
//!
//! All integers are unsigned big-endian. The BIG kinds exist only in
//! protocol 2 and later; they are chosen automatically for payloads over
//! 65535 bytes.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::EndpointError;

/// Protocol version spoken by this implementation.
pub const OUR_PROTOCOL: u32 = 2;

/// Largest payload a MESSAGE or RESPONSE packet can carry.
pub const MAX_SMALL_PAYLOAD: usize = u16::MAX as usize;

/// Largest payload a BIG packet can carry.
pub const MAX_BIG_PAYLOAD: usize = u32::MAX as usize;

/// Largest handshake blob accepted from a peer.
pub const MAX_HANDSHAKE_SIZE: usize = 64 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Tag byte does not name a packet kind valid after the handshake.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),

    /// The handshake blob could not be decoded.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The announced handshake length is implausibly large.
    #[error("handshake too large: {size} bytes (max {MAX_HANDSHAKE_SIZE})")]
    HandshakeTooLarge {
        /// Announced handshake size.
        size: usize,
    },

    /// The payload does not fit any packet kind.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: usize,
        /// Maximum payload size.
        max: usize,
    },
}

/// Packet kinds.
///
/// `Handshake` never appears as a tag byte; it only names the untagged
/// first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Untagged peer info exchange.
    Handshake = 0,
    /// Liveness probe.
    Keepalive = 1,
    /// Request with a 16-bit length.
    Message = 2,
    /// Reply with a 16-bit length.
    Response = 3,
    /// Request with a 32-bit length.
    MessageBig = 4,
    /// Reply with a 32-bit length.
    ResponseBig = 5,
}

impl PacketType {
    /// Whether this kind uses a 32-bit length field.
    pub fn is_big(self) -> bool {
        matches!(self, PacketType::MessageBig | PacketType::ResponseBig)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(PacketType::Keepalive),
            2 => Ok(PacketType::Message),
            3 => Ok(PacketType::Response),
            4 => Ok(PacketType::MessageBig),
            5 => Ok(PacketType::ResponseBig),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

/// What each side tells the other right after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Protocol version.
    #[serde(rename = "p")]
    pub protocol: u32,

    /// Keepalive interval of the sender, in seconds.
    #[serde(rename = "k")]
    pub keepalive_interval: f64,
}

impl PeerInfo {
    /// Peer info describing this implementation.
    pub fn local(keepalive_interval: Duration) -> Self {
        Self {
            protocol: OUR_PROTOCOL,
            keepalive_interval: keepalive_interval.as_secs_f64(),
        }
    }

    /// Largest payload this peer can receive.
    pub fn max_payload(&self) -> usize {
        if self.protocol >= 2 {
            MAX_BIG_PAYLOAD
        } else {
            MAX_SMALL_PAYLOAD
        }
    }

    /// Whether this peer understands the BIG packet kinds.
    pub fn supports_big_packets(&self) -> bool {
        self.protocol >= 2
    }
}

/// A decoded tagged packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Liveness probe.
    Keepalive,
    /// Request awaiting a response.
    Message {
        /// Correlation id.
        message_id: u16,
        /// Opaque request bytes.
        payload: Vec<u8>,
    },
    /// Reply to an earlier message.
    Response {
        /// Correlation id of the message being answered.
        message_id: u16,
        /// Opaque response bytes.
        payload: Vec<u8>,
    },
}

/// A packet as read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Kind named by the tag byte.
    pub packet_type: PacketType,
    /// Decoded contents.
    pub packet: Packet,
    /// Bytes consumed from the stream, tag included.
    pub wire_len: usize,
}

/// Serialize the untagged handshake frame.
pub fn encode_handshake(info: &PeerInfo) -> Result<Vec<u8>, WireError> {
    let body =
        serde_json::to_vec(info).map_err(|e| WireError::InvalidHandshake(e.to_string()))?;
    let mut data = Vec::with_capacity(4 + body.len());
    data.extend_from_slice(&(body.len() as u32).to_be_bytes());
    data.extend_from_slice(&body);
    Ok(data)
}

/// Serialize a KEEPALIVE packet.
pub fn encode_keepalive() -> Vec<u8> {
    vec![PacketType::Keepalive as u8]
}

/// Serialize a MESSAGE, or MESSAGE_BIG when the payload exceeds 65535 bytes.
pub fn encode_message(message_id: u16, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    encode_correlated(PacketType::Message, PacketType::MessageBig, message_id, payload)
}

/// Serialize a RESPONSE, or RESPONSE_BIG when the payload exceeds 65535 bytes.
pub fn encode_response(message_id: u16, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    encode_correlated(PacketType::Response, PacketType::ResponseBig, message_id, payload)
}

fn encode_correlated(
    small: PacketType,
    big: PacketType,
    message_id: u16,
    payload: &[u8],
) -> Result<Vec<u8>, WireError> {
    let len = payload.len();
    if len > MAX_BIG_PAYLOAD {
        return Err(WireError::PayloadTooLarge {
            size: len,
            max: MAX_BIG_PAYLOAD,
        });
    }

    let is_big = len > MAX_SMALL_PAYLOAD;
    let (packet_type, header_len) = if is_big { (big, 7) } else { (small, 5) };
    let mut data = Vec::with_capacity(header_len + len);
    data.push(packet_type as u8);
    data.extend_from_slice(&message_id.to_be_bytes());
    if is_big {
        data.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        data.extend_from_slice(&(len as u16).to_be_bytes());
    }
    data.extend_from_slice(payload);
    Ok(data)
}

/// Read the untagged handshake frame.
///
/// Returns the peer info and the number of bytes consumed.
pub async fn read_handshake<R>(reader: &mut R) -> Result<(PeerInfo, usize), EndpointError>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_u32().await? as usize;
    if size > MAX_HANDSHAKE_SIZE {
        return Err(WireError::HandshakeTooLarge { size }.into());
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    let info: PeerInfo = serde_json::from_slice(&body)
        .map_err(|e| WireError::InvalidHandshake(e.to_string()))?;
    Ok((info, 4 + size))
}

/// Read one tagged packet.
pub async fn read_packet<R>(reader: &mut R) -> Result<Frame, EndpointError>
where
    R: AsyncRead + Unpin,
{
    let packet_type = PacketType::try_from(reader.read_u8().await?)?;
    let (packet, wire_len) = match packet_type {
        PacketType::Keepalive => (Packet::Keepalive, 1),
        PacketType::Message | PacketType::MessageBig => {
            let (message_id, payload, len) = read_correlated(reader, packet_type.is_big()).await?;
            (
                Packet::Message {
                    message_id,
                    payload,
                },
                len,
            )
        }
        PacketType::Response | PacketType::ResponseBig => {
            let (message_id, payload, len) = read_correlated(reader, packet_type.is_big()).await?;
            (
                Packet::Response {
                    message_id,
                    payload,
                },
                len,
            )
        }
        PacketType::Handshake => return Err(WireError::UnknownPacketType(0).into()),
    };
    Ok(Frame {
        packet_type,
        packet,
        wire_len,
    })
}

async fn read_correlated<R>(
    reader: &mut R,
    is_big: bool,
) -> Result<(u16, Vec<u8>, usize), EndpointError>
where
    R: AsyncRead + Unpin,
{
    let message_id = reader.read_u16().await?;
    let (len, header_len) = if is_big {
        (reader.read_u32().await? as usize, 7)
    } else {
        (reader.read_u16().await? as usize, 5)
    };
    // Grow with the data actually received, not the announced length.
    let mut payload = Vec::with_capacity(len.min(MAX_SMALL_PAYLOAD));
    let received = (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut payload)
        .await?;
    if received < len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok((message_id, payload, header_len + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_message_layout() {
        let packet = encode_message(0x0102, b"ping").expect("encode");
        assert_eq!(packet, vec![2, 0x01, 0x02, 0x00, 0x04, b'p', b'i', b'n', b'g']);
    }

    #[test]
    fn test_big_response_layout() {
        let payload = vec![0xAB; MAX_SMALL_PAYLOAD + 1];
        let packet = encode_response(7, &payload).expect("encode");
        assert_eq!(packet[0], PacketType::ResponseBig as u8);
        assert_eq!(&packet[1..3], &[0, 7]);
        assert_eq!(&packet[3..7], &65_536u32.to_be_bytes());
        assert_eq!(packet.len(), 7 + payload.len());
    }

    #[test]
    fn test_big_threshold() {
        let at_limit = encode_message(1, &vec![0; MAX_SMALL_PAYLOAD]).expect("encode");
        assert_eq!(at_limit[0], PacketType::Message as u8);

        let over_limit = encode_message(1, &vec![0; MAX_SMALL_PAYLOAD + 1]).expect("encode");
        assert_eq!(over_limit[0], PacketType::MessageBig as u8);
    }

    #[test]
    fn test_handshake_is_untagged_json() {
        let info = PeerInfo {
            protocol: 2,
            keepalive_interval: 10.73,
        };
        let data = encode_handshake(&info).expect("encode");
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        assert_eq!(len, data.len() - 4);
        assert_eq!(&data[4..], br#"{"p":2,"k":10.73}"#);
    }

    #[test]
    fn test_peer_info_limits() {
        let old = PeerInfo {
            protocol: 1,
            keepalive_interval: 10.0,
        };
        assert_eq!(old.max_payload(), MAX_SMALL_PAYLOAD);
        assert!(!old.supports_big_packets());

        let current = PeerInfo::local(Duration::from_secs(5));
        assert_eq!(current.protocol, OUR_PROTOCOL);
        assert!(current.supports_big_packets());
        assert_eq!(current.keepalive_interval, 5.0);
    }

    #[test]
    fn test_packet_type_tags() {
        assert_eq!(PacketType::try_from(1u8), Ok(PacketType::Keepalive));
        assert_eq!(PacketType::try_from(5u8), Ok(PacketType::ResponseBig));
        assert_eq!(PacketType::try_from(0u8), Err(WireError::UnknownPacketType(0)));
        assert_eq!(PacketType::try_from(6u8), Err(WireError::UnknownPacketType(6)));
    }

    #[tokio::test]
    async fn test_read_handshake() {
        let info = PeerInfo {
            protocol: 1,
            keepalive_interval: 2.5,
        };
        let data = encode_handshake(&info).expect("encode");
        let mut reader = data.as_slice();
        let (decoded, consumed) = read_handshake(&mut reader).await.expect("read");
        assert_eq!(decoded, info);
        assert_eq!(consumed, data.len());
    }

    #[tokio::test]
    async fn test_read_handshake_rejects_oversized() {
        let data = ((MAX_HANDSHAKE_SIZE + 1) as u32).to_be_bytes();
        let mut reader = &data[..];
        let result = read_handshake(&mut reader).await;
        assert!(matches!(
            result,
            Err(EndpointError::Wire(WireError::HandshakeTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_handshake_rejects_garbage() {
        let mut data = 3u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"{{{");
        let mut reader = data.as_slice();
        let result = read_handshake(&mut reader).await;
        assert!(matches!(
            result,
            Err(EndpointError::Wire(WireError::InvalidHandshake(_)))
        ));
    }

    #[tokio::test]
    async fn test_read_packet_sequence() {
        let mut data = encode_keepalive();
        data.extend(encode_message(3, b"hello").expect("encode"));
        data.extend(encode_response(3, &vec![9; 70_000]).expect("encode"));
        let mut reader = data.as_slice();

        let keepalive = read_packet(&mut reader).await.expect("keepalive");
        assert_eq!(keepalive.packet, Packet::Keepalive);
        assert_eq!(keepalive.wire_len, 1);

        let message = read_packet(&mut reader).await.expect("message");
        assert_eq!(message.packet_type, PacketType::Message);
        assert_eq!(
            message.packet,
            Packet::Message {
                message_id: 3,
                payload: b"hello".to_vec()
            }
        );
        assert_eq!(message.wire_len, 10);

        let response = read_packet(&mut reader).await.expect("response");
        assert_eq!(response.packet_type, PacketType::ResponseBig);
        assert_eq!(response.wire_len, 7 + 70_000);
        match response.packet {
            Packet::Response {
                message_id,
                payload,
            } => {
                assert_eq!(message_id, 3);
                assert_eq!(payload.len(), 70_000);
            }
            other => panic!("expected response, got {:?}", other),
        }
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_read_packet_errors() {
        let mut reader: &[u8] = &[0];
        assert!(matches!(
            read_packet(&mut reader).await,
            Err(EndpointError::Wire(WireError::UnknownPacketType(0)))
        ));

        // Truncated payload looks like the peer hung up mid-packet.
        let mut reader: &[u8] = &[2, 0, 1, 0, 10, b'x'];
        let result = read_packet(&mut reader).await;
        match result {
            Err(error @ EndpointError::Io(_)) => assert!(error.is_expected()),
            other => panic!("expected EOF, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_packet_huge_announced_length() {
        // A BIG header claiming ~4 GiB followed by three bytes and EOF.
        let mut data = vec![PacketType::MessageBig as u8, 0, 1];
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(b"abc");
        let mut reader = data.as_slice();
        match read_packet(&mut reader).await {
            Err(EndpointError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {:?}", other),
        }
    }
}
