// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Splitting messages into chunks for sending and joining received chunks back into messages.

use std::io::Cursor;

use crate::{
    core::{
        comms::{
            message_chunk::{ChunkInfo, MessageChunk, MessageChunkType, MessageIsFinalType},
            secure_channel::SecureChannel,
        },
        supported_message::SupportedMessage,
    },
    types::{
        encoding::BinaryEncoder, node_id::NodeId, node_ids::ObjectId, status_code::StatusCode,
    },
};

/// Sequence numbers wrap back to 1 once they pass this.
const SEQUENCE_NUMBER_WRAP: u32 = u32::MAX - 1024;

pub struct Chunker;

impl Chunker {
    fn chunk_type(message: &SupportedMessage) -> MessageChunkType {
        use SupportedMessage::*;
        match message {
            OpenSecureChannelRequest(_) | OpenSecureChannelResponse(_) => {
                MessageChunkType::OpenSecureChannel
            }
            CloseSecureChannelRequest(_) | CloseSecureChannelResponse(_) => {
                MessageChunkType::CloseSecureChannel
            }
            _ => MessageChunkType::Message,
        }
    }

    /// The sequence number after `sequence_number`. 0 is never used.
    pub(crate) fn next_sequence_number(sequence_number: u32) -> u32 {
        if sequence_number >= SEQUENCE_NUMBER_WRAP {
            1
        } else {
            sequence_number + 1
        }
    }

    /// Checks the chunks of one message as received: every chunk on this channel, one request
    /// id throughout and sequence numbers that run on from `last_sequence_number`. The first
    /// message on a channel (`last_sequence_number` of 0) may start anywhere.
    ///
    /// Returns the sequence number of the last chunk.
    pub fn validate_chunks(
        last_sequence_number: u32,
        secure_channel: &SecureChannel,
        chunks: &[MessageChunk],
    ) -> Result<u32, StatusCode> {
        let infos = chunks
            .iter()
            .map(|c| c.chunk_info(secure_channel))
            .collect::<Result<Vec<ChunkInfo>, _>>()?;
        let Some(first) = infos.first() else {
            error!("No chunks to validate");
            return Err(StatusCode::BadUnexpectedError);
        };

        let first_sequence_number = first.sequence_header.sequence_number;
        let request_id = first.sequence_header.request_id;
        if last_sequence_number != 0
            && first_sequence_number != Self::next_sequence_number(last_sequence_number)
            && first_sequence_number <= last_sequence_number
        {
            error!(
                "Sequence number {} does not follow {}",
                first_sequence_number, last_sequence_number
            );
            return Err(StatusCode::BadSequenceNumberInvalid);
        }

        let channel_id = secure_channel.secure_channel_id();
        let mut expected = first_sequence_number;
        for info in &infos {
            let chunk_channel_id = info.message_header.secure_channel_id;
            if channel_id != 0 && chunk_channel_id != channel_id {
                error!(
                    "Chunk belongs to secure channel {}, not {}",
                    chunk_channel_id, channel_id
                );
                return Err(StatusCode::BadSecureChannelIdInvalid);
            }
            let sequence = &info.sequence_header;
            if sequence.sequence_number != expected || sequence.request_id != request_id {
                error!(
                    "Chunk {} of request {} out of place, expected {} of request {}",
                    sequence.sequence_number, sequence.request_id, expected, request_id
                );
                return Err(StatusCode::BadSequenceNumberInvalid);
            }
            expected = Self::next_sequence_number(expected);
        }

        Ok(infos
            .last()
            .map_or(first_sequence_number, |i| i.sequence_header.sequence_number))
    }

    /// Encodes `message` behind the node id of its binary encoding and splits the result into
    /// chunks numbered from `sequence_number`.
    ///
    /// `max_message_size` and `max_chunk_size` are in bytes, 0 for no limit.
    pub fn encode(
        sequence_number: u32,
        request_id: u32,
        max_message_size: usize,
        max_chunk_size: usize,
        secure_channel: &SecureChannel,
        message: &SupportedMessage,
    ) -> Result<Vec<MessageChunk>, StatusCode> {
        secure_channel.security_policy().ensure_supported()?;

        let message_size = message.byte_len();
        if max_message_size > 0 && message_size > max_message_size {
            error!(
                "Message of {} bytes exceeds the limit of {}",
                message_size, max_message_size
            );
            return Err(StatusCode::BadRequestTooLarge);
        }

        let node_id = message.node_id();
        let mut body = Vec::with_capacity(node_id.byte_len() + message_size);
        node_id.encode(&mut body)?;
        message.encode(&mut body)?;

        let chunk_type = Self::chunk_type(message);
        let body_per_chunk = if max_chunk_size == 0 {
            body.len().max(1)
        } else {
            MessageChunk::body_size_from_message_size(chunk_type, secure_channel, max_chunk_size)
                .map_err(|_| {
                    error!("No room for a body in chunks of {} bytes", max_chunk_size);
                    StatusCode::BadTcpInternalError
                })?
        };

        let count = body.len().div_ceil(body_per_chunk).max(1);
        let mut sequence_number = sequence_number;
        let mut chunks = Vec::with_capacity(count);
        for (i, slice) in body.chunks(body_per_chunk).enumerate() {
            let is_final = if i + 1 == count {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            chunks.push(MessageChunk::new(
                sequence_number,
                request_id,
                chunk_type,
                is_final,
                secure_channel,
                slice,
            )?);
            sequence_number = Self::next_sequence_number(sequence_number);
        }
        trace!("{:?} encoded in {} chunk(s)", node_id, chunks.len());
        Ok(chunks)
    }

    /// Joins the bodies of the chunks of a message and decodes it. Only the last chunk may be
    /// final.
    pub fn decode(
        chunks: &[MessageChunk],
        secure_channel: &SecureChannel,
    ) -> Result<SupportedMessage, StatusCode> {
        let mut body = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let info = chunk.chunk_info(secure_channel)?;
            let is_last = i + 1 == chunks.len();
            if is_last != (info.message_header.is_final == MessageIsFinalType::Final) {
                error!("Chunk {} of {} has marker {:?}", i + 1, chunks.len(), info.message_header.is_final);
                return Err(StatusCode::BadDecodingError);
            }
            body.extend_from_slice(&chunk.data[info.body_offset..info.body_offset + info.body_length]);
        }

        let decoding_options = secure_channel.decoding_options();
        let mut stream = Cursor::new(body);
        let node_id = NodeId::decode(&mut stream, &decoding_options)?;
        let Ok(object_id) = ObjectId::try_from(&node_id) else {
            error!("Message body starts with {:?}, not an encoding id", node_id);
            return Err(StatusCode::BadUnexpectedError);
        };

        match SupportedMessage::decode_by_object_id(&mut stream, object_id, &decoding_options) {
            Ok(SupportedMessage::Invalid(_)) => {
                debug!("No support for message {:?}", object_id);
                Err(StatusCode::BadServiceUnsupported)
            }
            Ok(message) => Ok(message),
            Err(e) => {
                debug!("Message {:?} cannot be decoded, {}", object_id, e);
                Err(StatusCode::BadDecodingError)
            }
        }
    }
}
