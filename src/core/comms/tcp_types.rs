// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Frames of UA over TCP. Every frame opens with a three letter type, a one letter chunk marker
//! and the total frame size. HEL, ACK and ERR make up the handshake, MSG, OPN and CLO frames
//! carry the chunks described in `message_chunk`.

use std::io::{Read, Write};

use crate::types::{encoding::*, status_code::StatusCode, string::UAString};

pub(crate) const HELLO: [u8; 3] = *b"HEL";
pub(crate) const ACKNOWLEDGE: [u8; 3] = *b"ACK";
pub(crate) const ERROR: [u8; 3] = *b"ERR";
pub(crate) const MESSAGE: [u8; 3] = *b"MSG";
pub(crate) const OPEN_CHANNEL: [u8; 3] = *b"OPN";
pub(crate) const CLOSE_CHANNEL: [u8; 3] = *b"CLO";

pub(crate) const MARKER_FINAL: u8 = b'F';
pub(crate) const MARKER_INTERMEDIATE: u8 = b'C';
pub(crate) const MARKER_ABORT: u8 = b'A';

/// No chunk may be smaller than this
pub const MIN_CHUNK_SIZE: usize = 8192;

/// Type, marker and size
pub const MESSAGE_HEADER_LEN: usize = 8;

pub const PROTOCOL_VERSION: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Invalid,
    Hello,
    Acknowledge,
    Chunk,
    Error,
}

impl MessageType {
    /// Classifies a frame by its first four bytes. Handshake frames are always final, chunks
    /// may also be intermediate or aborted.
    pub fn from_prefix(prefix: &[u8]) -> MessageType {
        let &[a, b, c, marker] = prefix else {
            return MessageType::Invalid;
        };
        match ([a, b, c], marker) {
            (HELLO, MARKER_FINAL) => MessageType::Hello,
            (ACKNOWLEDGE, MARKER_FINAL) => MessageType::Acknowledge,
            (ERROR, MARKER_FINAL) => MessageType::Error,
            (
                MESSAGE | OPEN_CHANNEL | CLOSE_CHANNEL,
                MARKER_FINAL | MARKER_INTERMEDIATE | MARKER_ABORT,
            ) => MessageType::Chunk,
            _ => {
                debug!("Unrecognized frame prefix {:?}", prefix);
                MessageType::Invalid
            }
        }
    }

    fn handshake_code(self) -> Option<[u8; 3]> {
        match self {
            MessageType::Hello => Some(HELLO),
            MessageType::Acknowledge => Some(ACKNOWLEDGE),
            MessageType::Error => Some(ERROR),
            MessageType::Chunk | MessageType::Invalid => None,
        }
    }
}

/// Header of a frame. Only handshake headers are written through this type, chunks write
/// their own header.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub message_size: u32,
}

impl BinaryEncoder<MessageHeader> for MessageHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let Some(code) = self.message_type.handshake_code() else {
            error!("{:?} frames have no handshake header", self.message_type);
            return Err(StatusCode::BadEncodingError);
        };
        let written = write_bytes(stream, &code)? + write_u8(stream, MARKER_FINAL)?;
        Ok(written + write_u32(stream, self.message_size)?)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut prefix = [0u8; 4];
        process_decode_io_result(stream.read_exact(&mut prefix))?;
        Ok(MessageHeader {
            message_type: MessageType::from_prefix(&prefix),
            message_size: read_u32(stream)?,
        })
    }
}

impl MessageHeader {
    fn sized(message_type: MessageType, body_len: usize) -> MessageHeader {
        MessageHeader {
            message_type,
            message_size: (MESSAGE_HEADER_LEN + body_len) as u32,
        }
    }
}

/// Protocol version and buffer limits, the body shared by HEL and ACK. In a HEL they are
/// what the client proposes, in an ACK what the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferLimits {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl BufferLimits {
    const ENCODED_LEN: usize = 20;

    fn write<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut written = 0;
        for v in [
            self.protocol_version,
            self.receive_buffer_size,
            self.send_buffer_size,
            self.max_message_size,
            self.max_chunk_count,
        ] {
            written += write_u32(stream, v)?;
        }
        Ok(written)
    }

    fn read<S: Read>(stream: &mut S) -> EncodingResult<Self> {
        let mut v = [0u32; 5];
        for field in v.iter_mut() {
            *field = read_u32(stream)?;
        }
        let [protocol_version, receive_buffer_size, send_buffer_size, max_message_size, max_chunk_count] =
            v;
        Ok(BufferLimits {
            protocol_version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
        })
    }
}

/// HEL, the first frame the client sends.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub message_header: MessageHeader,
    pub limits: BufferLimits,
    pub endpoint_url: UAString,
}

impl BinaryEncoder<HelloMessage> for HelloMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + BufferLimits::ENCODED_LEN + self.endpoint_url.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut written = self.message_header.encode(stream)?;
        written += self.limits.write(stream)?;
        Ok(written + self.endpoint_url.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let limits = BufferLimits::read(stream)?;
        let endpoint_url = UAString::decode(stream, decoding_options)?;
        Ok(HelloMessage {
            message_header,
            limits,
            endpoint_url,
        })
    }
}

impl HelloMessage {
    pub fn new(
        endpoint_url: &str,
        send_buffer_size: usize,
        receive_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> HelloMessage {
        let endpoint_url = UAString::from(endpoint_url);
        HelloMessage {
            message_header: MessageHeader::sized(
                MessageType::Hello,
                BufferLimits::ENCODED_LEN + endpoint_url.byte_len(),
            ),
            limits: BufferLimits {
                protocol_version: PROTOCOL_VERSION,
                receive_buffer_size: receive_buffer_size as u32,
                send_buffer_size: send_buffer_size as u32,
                max_message_size: max_message_size as u32,
                max_chunk_count: max_chunk_count as u32,
            },
            endpoint_url,
        }
    }
}

/// ACK, the server's answer to a HEL.
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgeMessage {
    pub message_header: MessageHeader,
    pub limits: BufferLimits,
}

impl BinaryEncoder<AcknowledgeMessage> for AcknowledgeMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + BufferLimits::ENCODED_LEN
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.message_header.encode(stream)? + self.limits.write(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        Ok(AcknowledgeMessage {
            message_header,
            limits: BufferLimits::read(stream)?,
        })
    }
}

impl AcknowledgeMessage {
    pub fn new(
        receive_buffer_size: u32,
        send_buffer_size: u32,
        max_message_size: u32,
        max_chunk_count: u32,
    ) -> AcknowledgeMessage {
        AcknowledgeMessage {
            message_header: MessageHeader::sized(
                MessageType::Acknowledge,
                BufferLimits::ENCODED_LEN,
            ),
            limits: BufferLimits {
                protocol_version: PROTOCOL_VERSION,
                receive_buffer_size,
                send_buffer_size,
                max_message_size,
                max_chunk_count,
            },
        }
    }
}

/// ERR, sent by a server that refuses the connection or drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message_header: MessageHeader,
    pub error: u32,
    pub reason: UAString,
}

impl BinaryEncoder<ErrorMessage> for ErrorMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 4 + self.reason.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let written = self.message_header.encode(stream)? + write_u32(stream, self.error)?;
        Ok(written + self.reason.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let error = read_u32(stream)?;
        let reason = UAString::decode(stream, decoding_options)?;
        Ok(ErrorMessage {
            message_header,
            error,
            reason,
        })
    }
}

impl ErrorMessage {
    pub fn from_status_code(status_code: StatusCode) -> ErrorMessage {
        ErrorMessage::new(status_code, status_code.description())
    }

    pub fn new(status_code: StatusCode, reason: &str) -> ErrorMessage {
        let reason = UAString::from(reason);
        ErrorMessage {
            message_header: MessageHeader::sized(MessageType::Error, 4 + reason.byte_len()),
            error: status_code.bits(),
            reason,
        }
    }

    /// The status carried by the frame. A good status here is nonsense and is reported as
    /// `BadUnexpectedError`.
    pub fn status_code(&self) -> StatusCode {
        match StatusCode::from_bits_truncate(self.error) {
            status if status.is_good() => StatusCode::BadUnexpectedError,
            status => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_layout() {
        let url = "opc.tcp://localhost:4855/";
        let hello = HelloMessage::new(url, 8192, 16384, 0, 0);
        let buf = hello.encode_to_vec();
        assert_eq!(&buf[0..4], b"HELF");
        assert_eq!(buf.len(), hello.message_header.message_size as usize);
        assert_eq!(buf.len(), 8 + 20 + 4 + url.len());
        // Receive buffer comes before send buffer
        assert_eq!(&buf[12..16], &16384u32.to_le_bytes());
        assert_eq!(&buf[16..20], &8192u32.to_le_bytes());
        let decoded = HelloMessage::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn frame_prefixes() {
        assert_eq!(MessageType::from_prefix(b"HELF"), MessageType::Hello);
        assert_eq!(MessageType::from_prefix(b"ACKF"), MessageType::Acknowledge);
        assert_eq!(MessageType::from_prefix(b"ERRF"), MessageType::Error);
        assert_eq!(MessageType::from_prefix(b"MSGC"), MessageType::Chunk);
        assert_eq!(MessageType::from_prefix(b"OPNA"), MessageType::Chunk);
        assert_eq!(MessageType::from_prefix(b"CLOF"), MessageType::Chunk);
        assert_eq!(MessageType::from_prefix(b"ACKC"), MessageType::Invalid);
        assert_eq!(MessageType::from_prefix(b"MSGX"), MessageType::Invalid);
        assert_eq!(MessageType::from_prefix(b"XYZF"), MessageType::Invalid);
        assert_eq!(MessageType::from_prefix(b"HEL"), MessageType::Invalid);
    }

    #[test]
    fn acknowledge_limits() {
        let ack = AcknowledgeMessage::new(8192, 4096, 100_000, 3);
        let buf = ack.encode_to_vec();
        assert_eq!(buf.len(), 28);
        assert_eq!(ack.message_header.message_size, 28);
        let decoded =
            AcknowledgeMessage::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded.limits.receive_buffer_size, 8192);
        assert_eq!(decoded.limits.send_buffer_size, 4096);
        assert_eq!(decoded.limits.max_chunk_count, 3);
    }

    #[test]
    fn error_message() {
        let err = ErrorMessage::from_status_code(StatusCode::BadTcpEndpointUrlInvalid);
        let buf = err.encode_to_vec();
        assert_eq!(&buf[0..4], b"ERRF");
        assert_eq!(buf.len(), err.message_header.message_size as usize);
        let decoded = ErrorMessage::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded.status_code(), StatusCode::BadTcpEndpointUrlInvalid);

        let good = ErrorMessage::new(StatusCode::Good, "");
        assert_eq!(good.status_code(), StatusCode::BadUnexpectedError);
    }

    #[test]
    fn chunk_header_cannot_be_written() {
        let header = MessageHeader {
            message_type: MessageType::Chunk,
            message_size: 0,
        };
        assert!(header.encode(&mut Vec::new()).is_err());
    }
}
