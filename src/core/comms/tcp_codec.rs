// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A tokio codec that splits the bytes read from the socket into frames. A client receives ACK
//! and ERR during the handshake and message chunks afterwards.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::types::{
    encoding::{BinaryEncoder, DecodingOptions},
    status_code::StatusCode,
};

use super::{
    message_chunk::MessageChunk,
    tcp_types::{AcknowledgeMessage, ErrorMessage, MessageHeader, MessageType, MESSAGE_HEADER_LEN},
};

#[derive(Debug)]
pub enum Message {
    Acknowledge(AcknowledgeMessage),
    Error(ErrorMessage),
    Chunk(MessageChunk),
}

/// Frames are decoded straight out of the read buffer once all of their bytes have arrived.
pub struct TcpCodec {
    decoding_options: DecodingOptions,
}

impl Decoder for TcpCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(prefix) = buf.get(..MESSAGE_HEADER_LEN) else {
            return Ok(None);
        };
        let header = MessageHeader::decode(&mut &prefix[..], &self.decoding_options)?;
        let frame_len = self.check_header(&header)?;

        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }
        let frame = buf.split_to(frame_len);
        self.decode_frame(header.message_type, &frame).map(Some).map_err(|e| {
            error!("Cannot decode {:?} frame, {}", header.message_type, e);
            io::Error::from(e)
        })
    }
}

impl TcpCodec {
    pub fn new(decoding_options: DecodingOptions) -> TcpCodec {
        TcpCodec { decoding_options }
    }

    /// Replaces the decoding limits once the server has acknowledged its own.
    pub fn set_decoding_options(&mut self, decoding_options: DecodingOptions) {
        self.decoding_options = decoding_options;
    }

    pub fn decoding_options(&self) -> &DecodingOptions {
        &self.decoding_options
    }

    /// Checks a frame header and yields the frame length.
    fn check_header(&self, header: &MessageHeader) -> Result<usize, StatusCode> {
        match header.message_type {
            MessageType::Acknowledge | MessageType::Error | MessageType::Chunk => {}
            MessageType::Hello => {
                error!("Servers do not send HEL");
                return Err(StatusCode::BadTcpMessageTypeInvalid);
            }
            MessageType::Invalid => {
                error!("Frame has an invalid message type");
                return Err(StatusCode::BadTcpMessageTypeInvalid);
            }
        }
        let len = header.message_size as usize;
        let max = self.decoding_options.max_message_size;
        if len < MESSAGE_HEADER_LEN {
            error!("Frame size {} is smaller than its header", len);
            Err(StatusCode::BadTcpMessageTypeInvalid)
        } else if max > 0 && len > max {
            error!("Frame size {} exceeds the maximum message size {}", len, max);
            Err(StatusCode::BadTcpMessageTooLarge)
        } else {
            Ok(len)
        }
    }

    fn decode_frame(&self, message_type: MessageType, frame: &[u8]) -> Result<Message, StatusCode> {
        let mut stream = frame;
        let options = &self.decoding_options;
        Ok(match message_type {
            MessageType::Acknowledge => {
                Message::Acknowledge(AcknowledgeMessage::decode(&mut stream, options)?)
            }
            MessageType::Error => Message::Error(ErrorMessage::decode(&mut stream, options)?),
            MessageType::Chunk => Message::Chunk(MessageChunk::decode(&mut stream, options)?),
            MessageType::Hello | MessageType::Invalid => {
                return Err(StatusCode::BadTcpMessageTypeInvalid)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comms::tcp_types::HelloMessage;

    fn codec() -> TcpCodec {
        TcpCodec::new(DecodingOptions::default())
    }

    #[test]
    fn decode_ack_in_pieces() {
        let ack = AcknowledgeMessage::new(8192, 8192, 0, 0);
        let bytes = ack.encode_to_vec();

        let mut codec = codec();
        let mut buf = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[5..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[10..]);
        match codec.decode(&mut buf).unwrap() {
            Some(Message::Acknowledge(decoded)) => assert_eq!(decoded, ack),
            other => panic!("Unexpected message {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&AcknowledgeMessage::new(8192, 8192, 0, 0).encode_to_vec());
        bytes.extend_from_slice(
            &ErrorMessage::new(StatusCode::BadTcpEndpointUrlInvalid, "bad url").encode_to_vec(),
        );

        let mut codec = codec();
        assert!(matches!(
            codec.decode(&mut bytes).unwrap(),
            Some(Message::Acknowledge(_))
        ));
        match codec.decode(&mut bytes).unwrap() {
            Some(Message::Error(decoded)) => {
                assert_eq!(decoded.status_code(), StatusCode::BadTcpEndpointUrlInvalid);
                assert_eq!(decoded.reason.as_ref(), "bad url");
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert!(codec.decode(&mut bytes).unwrap().is_none());
    }

    #[test]
    fn hello_is_rejected() {
        let hello = HelloMessage::new("opc.tcp://localhost:4855/", 8192, 8192, 0, 0);
        let mut buf = BytesMut::from(&hello.encode_to_vec()[..]);
        assert!(codec().decode(&mut buf).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let mut buf = BytesMut::from(&b"XYZF\x10\0\0\0garbage!"[..]);
        assert!(codec().decode(&mut buf).is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = TcpCodec::new(DecodingOptions {
            max_message_size: 100,
            ..Default::default()
        });
        let mut buf = BytesMut::from(&b"MSGF\0\x10\0\0"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.to_string().contains("BadTcpMessageTooLarge"));
    }
}
