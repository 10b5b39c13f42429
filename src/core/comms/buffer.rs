// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::collections::VecDeque;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    core::{
        comms::{chunker::Chunker, message_chunk::MessageChunk, secure_channel::SecureChannel},
        supported_message::SupportedMessage,
    },
    types::StatusCode,
};

/// Outgoing side of a transport. Messages are chunked into a queue when written, then each
/// chunk is secured and streamed out in turn.
pub struct SendBuffer {
    queued: VecDeque<MessageChunk>,
    /// Secured bytes of the chunk on the wire and how many have been written so far
    in_flight: Option<(Vec<u8>, usize)>,
    last_sequence_number: u32,
    /// 0 for no limit
    pub max_message_size: usize,
    /// 0 for no limit
    pub max_chunk_count: usize,
    /// Upper bound of a chunk, what the server said it can receive
    pub send_buffer_size: usize,
}

impl SendBuffer {
    pub fn new(send_buffer_size: usize, max_message_size: usize, max_chunk_count: usize) -> Self {
        Self {
            queued: VecDeque::new(),
            in_flight: None,
            last_sequence_number: 0,
            max_message_size,
            max_chunk_count,
            send_buffer_size,
        }
    }

    /// Chunks the message and queues the chunks. Each chunk takes the next sequence number.
    /// A message over the size or chunk limits is rejected without consuming any.
    pub fn write(
        &mut self,
        request_id: u32,
        message: SupportedMessage,
        secure_channel: &SecureChannel,
    ) -> Result<u32, StatusCode> {
        let chunks = Chunker::encode(
            Chunker::next_sequence_number(self.last_sequence_number),
            request_id,
            self.max_message_size,
            self.send_buffer_size,
            secure_channel,
            &message,
        )?;
        if self.max_chunk_count > 0 && chunks.len() > self.max_chunk_count {
            error!(
                "Request {} needs {} chunks, the limit is {}",
                request_id,
                chunks.len(),
                self.max_chunk_count
            );
            return Err(StatusCode::BadRequestTooLarge);
        }
        trace!("Queued request {} as {} chunk(s)", request_id, chunks.len());
        for _ in &chunks {
            self.last_sequence_number = Chunker::next_sequence_number(self.last_sequence_number);
        }
        self.queued.extend(chunks);
        Ok(request_id)
    }

    /// True when a chunk is waiting and nothing is on the wire.
    pub fn should_encode_chunks(&self) -> bool {
        self.in_flight.is_none() && !self.queued.is_empty()
    }

    /// True while part of a chunk is still to be written.
    pub fn can_read(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Secures the next queued chunk so it can be written.
    pub fn encode_next_chunk(&mut self, secure_channel: &SecureChannel) -> Result<(), StatusCode> {
        if self.in_flight.is_some() {
            return Err(StatusCode::BadInvalidState);
        }
        if let Some(chunk) = self.queued.pop_front() {
            let secured = secure_channel.apply_security(&chunk)?;
            if self.send_buffer_size > 0 && secured.len() > self.send_buffer_size {
                error!(
                    "Secured chunk of {} bytes exceeds the send buffer of {}",
                    secured.len(),
                    self.send_buffer_size
                );
                return Err(StatusCode::BadEncodingLimitsExceeded);
            }
            self.in_flight = Some((secured, 0));
        }
        Ok(())
    }

    /// Writes as much of the chunk on the wire as the stream accepts. Progress is recorded only
    /// once a write has completed, which keeps this cancel safe.
    pub async fn read_into_async(
        &mut self,
        write: &mut (impl AsyncWrite + Unpin),
    ) -> Result<(), std::io::Error> {
        let Some((bytes, offset)) = self.in_flight.as_mut() else {
            return Ok(());
        };
        let written = write.write(&bytes[*offset..]).await?;
        if written == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        *offset += written;
        if *offset == bytes.len() {
            self.in_flight = None;
        }
        Ok(())
    }

    /// Applies the limits from the server's acknowledge. Limits only ever shrink, and a 0 from
    /// the server leaves the local limit in place.
    pub fn revise(&mut self, send_buffer_size: usize, max_message_size: usize, max_chunk_count: usize) {
        fn lower(current: &mut usize, revised: usize) {
            if revised > 0 && (*current == 0 || *current > revised) {
                *current = revised;
            }
        }
        if send_buffer_size > 0 {
            self.send_buffer_size = self.send_buffer_size.min(send_buffer_size);
        }
        lower(&mut self.max_message_size, max_message_size);
        lower(&mut self.max_chunk_count, max_chunk_count);
    }
}

#[cfg(test)]
mod tests {
    use super::SendBuffer;

    use crate::core::comms::secure_channel::SecureChannel;
    use crate::types::{
        DecodingOptions, NodeId, ReadRequest, ReadValueId, RequestHeader, StatusCode,
        TimestampsToReturn,
    };

    fn buffer_and_channel() -> (SendBuffer, SecureChannel) {
        (
            SendBuffer::new(8196, 81960, 5),
            SecureChannel::new(DecodingOptions::default()),
        )
    }

    fn read_request(count: u32) -> ReadRequest {
        ReadRequest {
            request_header: RequestHeader::dummy(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(
                (0..count)
                    .map(|r| ReadValueId::from(NodeId::new(1, r)))
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn single_chunk_is_written() {
        let (mut buffer, channel) = buffer_and_channel();
        assert!(!buffer.should_encode_chunks());

        assert_eq!(buffer.write(1, read_request(1).into(), &channel), Ok(1));
        assert!(buffer.should_encode_chunks());
        buffer.encode_next_chunk(&channel).unwrap();
        assert!(buffer.can_read());
        assert!(!buffer.should_encode_chunks());
        assert_eq!(
            buffer.encode_next_chunk(&channel),
            Err(StatusCode::BadInvalidState)
        );

        let mut out = Vec::new();
        buffer.read_into_async(&mut out).await.unwrap();
        assert_eq!(&out[0..4], b"MSGF");
        assert!(!buffer.can_read());
    }

    #[tokio::test]
    async fn chunks_take_consecutive_sequence_numbers() {
        let (mut buffer, channel) = buffer_and_channel();
        buffer.write(1, read_request(1000).into(), &channel).unwrap();
        let chunk_count = buffer.queued.len();
        assert!(chunk_count > 1);

        let mut out = Vec::new();
        while buffer.should_encode_chunks() {
            buffer.encode_next_chunk(&channel).unwrap();
            while buffer.can_read() {
                buffer.read_into_async(&mut out).await.unwrap();
            }
        }
        assert_eq!(buffer.last_sequence_number, chunk_count as u32);

        buffer.write(2, read_request(1).into(), &channel).unwrap();
        let next = buffer.queued[0].chunk_info(&channel).unwrap();
        assert_eq!(
            next.sequence_header.sequence_number,
            chunk_count as u32 + 1
        );
    }

    #[test]
    fn oversized_messages_are_rejected() {
        let (mut buffer, channel) = buffer_and_channel();
        assert_eq!(
            buffer.write(1, read_request(10000).into(), &channel),
            Err(StatusCode::BadRequestTooLarge)
        );
        // Under the message size limit but more than 5 chunks
        assert_eq!(
            buffer.write(2, read_request(3000).into(), &channel),
            Err(StatusCode::BadRequestTooLarge)
        );
        assert!(buffer.queued.is_empty());
        assert_eq!(buffer.last_sequence_number, 0);
    }

    #[tokio::test]
    async fn partial_writes_resume() {
        let (mut buffer, channel) = buffer_and_channel();
        buffer.write(1, read_request(100).into(), &channel).unwrap();
        buffer.encode_next_chunk(&channel).unwrap();

        // A socket that takes 64 bytes at a time
        let mut small = [0u8; 64];
        let mut cursor = std::io::Cursor::new(&mut small as &mut [u8]);
        buffer.read_into_async(&mut cursor).await.unwrap();
        assert_eq!(cursor.position(), 64);
        assert!(buffer.can_read());
        assert!(!buffer.should_encode_chunks());

        let mut rest = Vec::new();
        buffer.read_into_async(&mut rest).await.unwrap();
        assert!(!buffer.can_read());
        assert_eq!(&small[0..4], b"MSGF");
    }

    #[test]
    fn revise_only_lowers() {
        let mut buffer = SendBuffer::new(65535, 0, 0);
        buffer.revise(8192, 0, 0);
        assert_eq!(buffer.send_buffer_size, 8192);
        assert_eq!(buffer.max_message_size, 0);
        buffer.revise(65535, 100_000, 10);
        assert_eq!(buffer.send_buffer_size, 8192);
        assert_eq!(buffer.max_message_size, 100_000);
        assert_eq!(buffer.max_chunk_count, 10);
        buffer.revise(0, 200_000, 20);
        assert_eq!(buffer.max_message_size, 100_000);
        assert_eq!(buffer.max_chunk_count, 10);
    }
}
