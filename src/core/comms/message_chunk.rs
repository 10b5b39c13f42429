// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Message chunks. A service message is sent as one or more chunks, each a MSG, OPN or CLO
//! frame made of a chunk header, a security header, a sequence header and a slice of the
//! encoded message.

use std::io::{Cursor, Read, Write};

use crate::types::{status_code::StatusCode, *};

use super::{
    secure_channel::SecureChannel,
    security_header::{SecurityHeader, SequenceHeader},
    tcp_types::{
        CLOSE_CHANNEL, MARKER_ABORT, MARKER_FINAL, MARKER_INTERMEDIATE, MESSAGE, MIN_CHUNK_SIZE,
        OPEN_CHANNEL,
    },
};

/// Type, marker, size and secure channel id
pub const MESSAGE_CHUNK_HEADER_SIZE: usize = 12;

/// Sequence number and request id
const SEQUENCE_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageChunkType {
    Message,
    OpenSecureChannel,
    CloseSecureChannel,
}

impl MessageChunkType {
    pub fn is_open_secure_channel(&self) -> bool {
        *self == MessageChunkType::OpenSecureChannel
    }

    fn code(self) -> [u8; 3] {
        match self {
            MessageChunkType::Message => MESSAGE,
            MessageChunkType::OpenSecureChannel => OPEN_CHANNEL,
            MessageChunkType::CloseSecureChannel => CLOSE_CHANNEL,
        }
    }

    fn from_code(code: [u8; 3]) -> Option<Self> {
        match code {
            MESSAGE => Some(MessageChunkType::Message),
            OPEN_CHANNEL => Some(MessageChunkType::OpenSecureChannel),
            CLOSE_CHANNEL => Some(MessageChunkType::CloseSecureChannel),
            _ => None,
        }
    }
}

/// Where a chunk sits in its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIsFinalType {
    /// More chunks follow
    Intermediate,
    /// Last chunk of the message
    Final,
    /// The sender gave up on the message, the body holds an error
    FinalError,
}

impl MessageIsFinalType {
    fn marker(self) -> u8 {
        match self {
            MessageIsFinalType::Intermediate => MARKER_INTERMEDIATE,
            MessageIsFinalType::Final => MARKER_FINAL,
            MessageIsFinalType::FinalError => MARKER_ABORT,
        }
    }

    fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            MARKER_INTERMEDIATE => Some(MessageIsFinalType::Intermediate),
            MARKER_FINAL => Some(MessageIsFinalType::Final),
            MARKER_ABORT => Some(MessageIsFinalType::FinalError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunkHeader {
    pub message_type: MessageChunkType,
    pub is_final: MessageIsFinalType,
    /// Size of the whole chunk including this header
    pub message_size: u32,
    pub secure_channel_id: u32,
}

impl BinaryEncoder<MessageChunkHeader> for MessageChunkHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_CHUNK_HEADER_SIZE
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut written = write_bytes(stream, &self.message_type.code())?;
        written += write_u8(stream, self.is_final.marker())?;
        written += write_u32(stream, self.message_size)?;
        Ok(written + write_u32(stream, self.secure_channel_id)?)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut code = [0u8; 3];
        process_decode_io_result(stream.read_exact(&mut code))?;
        let Some(message_type) = MessageChunkType::from_code(code) else {
            error!("Chunk type {:?} is not MSG, OPN or CLO", code);
            return Err(StatusCode::BadDecodingError);
        };
        let marker = read_u8(stream)?;
        let Some(is_final) = MessageIsFinalType::from_marker(marker) else {
            error!("Chunk marker {} is not C, F or A", marker);
            return Err(StatusCode::BadDecodingError);
        };
        Ok(MessageChunkHeader {
            message_type,
            is_final,
            message_size: read_u32(stream)?,
            secure_channel_id: read_u32(stream)?,
        })
    }
}

/// The decoded headers of a chunk and where its body lies.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    pub message_header: MessageChunkHeader,
    /// Asymmetric for OPN chunks, symmetric for the rest
    pub security_header: SecurityHeader,
    pub sequence_header: SequenceHeader,
    pub body_offset: usize,
    pub body_length: usize,
}

impl ChunkInfo {
    fn parse(data: &[u8], decoding_options: &DecodingOptions) -> Result<ChunkInfo, StatusCode> {
        let mut stream = Cursor::new(data);
        let message_header = MessageChunkHeader::decode(&mut stream, decoding_options)?;

        let security_header =
            SecurityHeader::decode_for(message_header.message_type, &mut stream, decoding_options)
                .map_err(|e| {
                    error!("Security header of chunk is malformed, {}", e);
                    StatusCode::BadCommunicationError
                })?;
        if let SecurityHeader::Asymmetric(header) = &security_header {
            if !header.security_policy().is_supported() {
                error!(
                    "Chunk uses unsupported security policy {}",
                    header.security_policy_uri
                );
                return Err(StatusCode::BadSecurityPolicyRejected);
            }
        }

        let sequence_header =
            SequenceHeader::decode(&mut stream, decoding_options).map_err(|e| {
                error!("Sequence header of chunk is malformed, {}", e);
                StatusCode::BadCommunicationError
            })?;

        let body_offset = stream.position() as usize;
        Ok(ChunkInfo {
            message_header,
            security_header,
            sequence_header,
            body_offset,
            body_length: data.len() - body_offset,
        })
    }
}

/// A whole chunk, headers included.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunk {
    pub data: Vec<u8>,
}

impl BinaryEncoder<MessageChunk> for MessageChunk {
    fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_bytes(stream, &self.data)
    }

    fn decode<S: Read>(
        in_stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let header = MessageChunkHeader::decode(in_stream, decoding_options).map_err(|e| {
            error!("Chunk header is malformed, {}", e);
            StatusCode::BadCommunicationError
        })?;

        let size = header.message_size as usize;
        let limit = decoding_options.max_message_size;
        if limit > 0 && size > limit {
            error!("Chunk of {} bytes exceeds the limit of {}", size, limit);
            return Err(StatusCode::BadTcpMessageTooLarge);
        }
        if size < MESSAGE_CHUNK_HEADER_SIZE {
            error!("Chunk size {} is smaller than its header", size);
            return Err(StatusCode::BadDecodingError);
        }

        // The header was consumed from the stream so it is written back in front of the rest
        let mut data = Vec::with_capacity(size);
        header.encode(&mut data)?;
        data.resize(size, 0);
        process_decode_io_result(in_stream.read_exact(&mut data[MESSAGE_CHUNK_HEADER_SIZE..]))?;
        Ok(MessageChunk { data })
    }
}

impl MessageChunk {
    pub fn new(
        sequence_number: u32,
        request_id: u32,
        message_type: MessageChunkType,
        is_final: MessageIsFinalType,
        secure_channel: &SecureChannel,
        data: &[u8],
    ) -> Result<MessageChunk, StatusCode> {
        let security_header = secure_channel.make_security_header(message_type);
        let size =
            MESSAGE_CHUNK_HEADER_SIZE + security_header.byte_len() + SEQUENCE_HEADER_SIZE + data.len();
        trace!("Creating a chunk of {} bytes", size);

        let header = MessageChunkHeader {
            message_type,
            is_final,
            message_size: size as u32,
            secure_channel_id: secure_channel.secure_channel_id(),
        };
        let sequence_header = SequenceHeader {
            sequence_number,
            request_id,
        };

        let mut buf = Vec::with_capacity(size);
        header.encode(&mut buf)?;
        security_header.encode(&mut buf)?;
        sequence_header.encode(&mut buf)?;
        buf.extend_from_slice(data);
        Ok(MessageChunk { data: buf })
    }

    /// How much of the message fits in a chunk of `chunk_size` bytes once headers and
    /// signature are accounted for.
    pub fn body_size_from_message_size(
        message_type: MessageChunkType,
        secure_channel: &SecureChannel,
        chunk_size: usize,
    ) -> Result<usize, StatusCode> {
        if chunk_size < MIN_CHUNK_SIZE {
            error!(
                "Chunk size {} is below the minimum of {}",
                chunk_size, MIN_CHUNK_SIZE
            );
            return Err(StatusCode::BadTcpInternalError);
        }
        let overhead = MESSAGE_CHUNK_HEADER_SIZE
            + secure_channel.make_security_header(message_type).byte_len()
            + SEQUENCE_HEADER_SIZE
            + secure_channel.signature_size();
        Ok(chunk_size - overhead)
    }

    pub fn message_header(
        &self,
        decoding_options: &DecodingOptions,
    ) -> Result<MessageChunkHeader, StatusCode> {
        MessageChunkHeader::decode(&mut self.data.as_slice(), decoding_options)
    }

    pub fn chunk_info(&self, secure_channel: &SecureChannel) -> Result<ChunkInfo, StatusCode> {
        ChunkInfo::parse(&self.data, &secure_channel.decoding_options())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> SecureChannel {
        SecureChannel::new(DecodingOptions::default())
    }

    #[test]
    fn chunk_layout() {
        let channel = channel();
        let chunk = MessageChunk::new(
            3,
            9,
            MessageChunkType::Message,
            MessageIsFinalType::Intermediate,
            &channel,
            &[1, 2, 3, 4],
        )
        .unwrap();
        assert_eq!(&chunk.data[0..4], b"MSGC");
        // Header, token id, sequence header, body
        assert_eq!(chunk.data.len(), 12 + 4 + 8 + 4);

        let info = chunk.chunk_info(&channel).unwrap();
        assert_eq!(info.message_header.message_size as usize, chunk.data.len());
        assert_eq!(info.sequence_header.sequence_number, 3);
        assert_eq!(info.sequence_header.request_id, 9);
        assert_eq!(&chunk.data[info.body_offset..], &[1, 2, 3, 4]);
        assert_eq!(info.body_length, 4);
    }

    #[test]
    fn open_chunk_has_asymmetric_header() {
        let channel = channel();
        let chunk = MessageChunk::new(
            1,
            1,
            MessageChunkType::OpenSecureChannel,
            MessageIsFinalType::Final,
            &channel,
            &[],
        )
        .unwrap();
        assert_eq!(&chunk.data[0..4], b"OPNF");
        let info = chunk.chunk_info(&channel).unwrap();
        assert!(matches!(info.security_header, SecurityHeader::Asymmetric(_)));
        assert_eq!(info.body_length, 0);
    }

    #[test]
    fn decode_restores_header() {
        let channel = channel();
        let chunk = MessageChunk::new(
            1,
            2,
            MessageChunkType::CloseSecureChannel,
            MessageIsFinalType::Final,
            &channel,
            &[7; 10],
        )
        .unwrap();
        let decoded =
            MessageChunk::decode(&mut chunk.data.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn bad_marker() {
        let mut data = b"MSGX".to_vec();
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(
            MessageChunkHeader::decode(&mut data.as_slice(), &DecodingOptions::default())
                .unwrap_err(),
            StatusCode::BadDecodingError
        );
    }

    #[test]
    fn body_size() {
        let channel = channel();
        assert_eq!(
            MessageChunk::body_size_from_message_size(MessageChunkType::Message, &channel, 8192),
            Ok(8192 - 12 - 4 - 8)
        );
        assert_eq!(
            MessageChunk::body_size_from_message_size(MessageChunkType::Message, &channel, 100),
            Err(StatusCode::BadTcpInternalError)
        );
    }
}
