// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::Either;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::core::comms::{
    chunker::Chunker,
    message_chunk::{ChunkInfo, MessageChunk, MessageIsFinalType},
    secure_channel::SecureChannel,
    tcp_codec::Message,
};
use crate::core::supported_message::SupportedMessage;
use crate::types::StatusCode;

/// Completion handle of a request, resolved exactly once.
pub type ResponseCallback = oneshot::Sender<Result<SupportedMessage, StatusCode>>;

#[derive(Debug)]
struct MessageChunkWithChunkInfo {
    header: ChunkInfo,
    data_with_header: Vec<u8>,
}

/// A request that has been written and is waiting for its response.
struct PendingRequest {
    callback: ResponseCallback,
    chunks: Vec<MessageChunkWithChunkInfo>,
    deadline: Instant,
}

/// The request multiplexer. It owns the queue of outgoing messages, assigns each a request id,
/// and keeps the table of pending requests until their response, timeout or teardown.
pub struct TransportState {
    /// Channel for outgoing requests. Only polled while the number of inflight requests is
    /// below the limit.
    outgoing_recv: mpsc::Receiver<OutgoingMessage>,
    /// Requests waiting for a response, keyed by request id
    pending: HashMap<u32, PendingRequest>,
    /// Maximum number of inflight requests
    max_inflight: usize,
    /// Secure channel
    pub(super) secure_channel: Arc<RwLock<SecureChannel>>,
    /// Max pending incoming chunks of a single message
    max_pending_incoming: usize,
    /// Last decoded sequence number
    last_received_sequence_number: u32,
    /// The request id given to the next outgoing message
    next_request_id: u32,
}

/// What happened during a single poll of a transport.
#[derive(Debug)]
pub enum TransportPollResult {
    OutgoingMessage,
    OutgoingMessageSent,
    IncomingMessage,
    Closed(StatusCode),
}

/// A message queued for sending. Messages without a callback expect no response.
pub struct OutgoingMessage {
    pub request: SupportedMessage,
    pub callback: Option<ResponseCallback>,
    pub deadline: Instant,
}

impl TransportState {
    pub fn new(
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        max_pending_incoming: usize,
        max_inflight: usize,
    ) -> Self {
        Self {
            secure_channel,
            outgoing_recv,
            pending: HashMap::new(),
            max_inflight: max_inflight.max(1),
            max_pending_incoming,
            last_received_sequence_number: 0,
            next_request_id: 1,
        }
    }

    /// The secure channel the transport encodes and decodes with.
    pub fn secure_channel(&self) -> &Arc<RwLock<SecureChannel>> {
        &self.secure_channel
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_request_id(&mut self) -> u32 {
        let request_id = self.next_request_id;
        self.next_request_id = if request_id == u32::MAX {
            1
        } else {
            request_id + 1
        };
        request_id
    }

    /// Wait for an outgoing message and register it as pending. Expired requests are failed
    /// with `BadTimeout` while waiting. Returns `None` once the queue is closed.
    pub async fn wait_for_outgoing_message(&mut self) -> Option<(SupportedMessage, u32)> {
        loop {
            // Expire any timed out requests and find out when the next one expires
            let timeout_fut = match self.next_timeout() {
                Some(t) => Either::Left(tokio::time::sleep_until(t.into())),
                None => Either::Right(futures::future::pending::<()>()),
            };

            if self.max_inflight > self.pending.len() {
                tokio::select! {
                    _ = timeout_fut => {
                        continue;
                    }
                    outgoing = self.outgoing_recv.recv() => {
                        let outgoing = outgoing?;
                        let request_id = self.next_request_id();
                        if let Some(callback) = outgoing.callback {
                            if outgoing.deadline <= Instant::now() {
                                debug!("Request {} expired before it was sent", request_id);
                                let _ = callback.send(Err(StatusCode::BadTimeout));
                                continue;
                            }
                            self.pending.insert(request_id, PendingRequest {
                                callback,
                                chunks: Vec::new(),
                                deadline: outgoing.deadline,
                            });
                        }
                        break Some((outgoing.request, request_id));
                    }
                }
            } else {
                timeout_fut.await;
            }
        }
    }

    /// Handle a frame read from the stream. An error means the connection must be closed with
    /// the returned status.
    pub fn handle_incoming_message(&mut self, message: Message) -> Result<(), StatusCode> {
        match message {
            Message::Chunk(chunk) => self.process_chunk(chunk),
            Message::Error(error) => {
                let status = error.status_code();
                error!(
                    "Server sent an error message {}, reason {}",
                    status, error.reason
                );
                Err(status)
            }
            m => {
                error!("Expected a message chunk, got {:?}", m);
                Err(StatusCode::BadTcpMessageTypeInvalid)
            }
        }
    }

    /// Resolve the request with the given id. Responses for unknown ids, e.g. requests that
    /// already timed out, are dropped.
    pub fn complete_request(
        &mut self,
        request_id: u32,
        result: Result<SupportedMessage, StatusCode>,
    ) -> bool {
        if let Some(pending) = self.pending.remove(&request_id) {
            let _ = pending.callback.send(result);
            true
        } else {
            debug!("Dropping response for unknown request {}", request_id);
            false
        }
    }

    fn next_timeout(&mut self) -> Option<Instant> {
        let now = Instant::now();
        let mut next_timeout: Option<Instant> = None;
        let mut timed_out = Vec::new();
        for (id, state) in &self.pending {
            if state.deadline <= now {
                timed_out.push(*id);
            } else if next_timeout.map_or(true, |t| t > state.deadline) {
                next_timeout = Some(state.deadline);
            }
        }
        for id in timed_out {
            debug!("Request {} timed out", id);
            self.complete_request(id, Err(StatusCode::BadTimeout));
        }
        next_timeout
    }

    fn process_chunk(&mut self, chunk: MessageChunk) -> Result<(), StatusCode> {
        let mut secure_channel = trace_write_lock!(self.secure_channel);
        let chunk = secure_channel.verify_and_remove_security(&chunk.data)?;
        let chunk_info = chunk.chunk_info(&secure_channel)?;
        drop(secure_channel);

        let request_id = chunk_info.sequence_header.request_id;

        // Chunks without a matching request are ignored
        let Some(pending) = self.pending.get_mut(&request_id) else {
            debug!("Ignoring chunk for request {} which is not pending", request_id);
            return Ok(());
        };

        match chunk_info.message_header.is_final {
            MessageIsFinalType::Intermediate => {
                trace!(
                    "Received intermediate chunk {}:{}",
                    request_id,
                    chunk_info.sequence_header.sequence_number
                );
                pending.chunks.push(MessageChunkWithChunkInfo {
                    header: chunk_info,
                    data_with_header: chunk.data,
                });
                let chunks_len = pending.chunks.len();
                if self.max_pending_incoming > 0 && chunks_len > self.max_pending_incoming {
                    error!(
                        "Too many pending incoming chunks {} > {}",
                        chunks_len, self.max_pending_incoming
                    );
                    self.complete_request(request_id, Err(StatusCode::BadEncodingLimitsExceeded));
                }
            }
            MessageIsFinalType::FinalError => {
                info!("Discarding request {} aborted by the server", request_id);
                self.complete_request(request_id, Err(StatusCode::BadCommunicationError));
            }
            MessageIsFinalType::Final => {
                pending.chunks.push(MessageChunkWithChunkInfo {
                    header: chunk_info,
                    data_with_header: chunk.data,
                });
                let chunks = std::mem::take(&mut pending.chunks);
                let result = self.turn_received_chunks_into_message(Self::merge_chunks(chunks));
                // A message that cannot be decoded fails its own request only
                self.complete_request(request_id, result);
            }
        }
        Ok(())
    }

    fn turn_received_chunks_into_message(
        &mut self,
        chunks: Vec<MessageChunk>,
    ) -> Result<SupportedMessage, StatusCode> {
        let secure_channel = trace_read_lock!(self.secure_channel);
        self.last_received_sequence_number = Chunker::validate_chunks(
            self.last_received_sequence_number,
            &secure_channel,
            &chunks,
        )?;
        Chunker::decode(&chunks, &secure_channel)
    }

    /// Orders the chunks of a message by sequence number, dropping duplicates.
    fn merge_chunks(mut chunks: Vec<MessageChunkWithChunkInfo>) -> Vec<MessageChunk> {
        chunks.sort_by_key(|c| c.header.sequence_header.sequence_number);
        let mut last_sequence_number = None;
        let mut merged = Vec::with_capacity(chunks.len());
        for c in chunks {
            let sequence_number = c.header.sequence_header.sequence_number;
            if last_sequence_number == Some(sequence_number) {
                warn!("Dropping duplicate chunk {}", sequence_number);
                continue;
            }
            last_sequence_number = Some(sequence_number);
            merged.push(MessageChunk {
                data: c.data_with_header,
            });
        }
        merged
    }

    /// Close the transport. The outgoing queue is closed first so nothing new can be submitted,
    /// then every pending request and every message still queued is failed with
    /// `BadConnectionClosed`. Safe to call repeatedly.
    pub async fn close(&mut self, status: StatusCode) -> StatusCode {
        self.outgoing_recv.close();

        for (_, pending) in self.pending.drain() {
            let _ = pending.callback.send(Err(StatusCode::BadConnectionClosed));
        }

        // recv no longer blocks once the channel is closed
        while let Some(msg) = self.outgoing_recv.recv().await {
            if let Some(cb) = msg.callback {
                let _ = cb.send(Err(StatusCode::BadConnectionClosed));
            }
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::{
        CloseSessionRequest, CloseSessionResponse, DecodingOptions, RequestHeader, ResponseHeader,
    };

    fn state(max_inflight: usize) -> (TransportState, mpsc::Sender<OutgoingMessage>) {
        let (send, recv) = mpsc::channel(16);
        let channel = Arc::new(RwLock::new(SecureChannel::new(DecodingOptions::default())));
        (TransportState::new(channel, recv, 5, max_inflight), send)
    }

    fn request() -> SupportedMessage {
        CloseSessionRequest {
            request_header: RequestHeader::dummy(),
            delete_subscriptions: true,
        }
        .into()
    }

    fn response() -> SupportedMessage {
        CloseSessionResponse {
            response_header: ResponseHeader::new_good(&RequestHeader::dummy()),
        }
        .into()
    }

    async fn queue(
        send: &mpsc::Sender<OutgoingMessage>,
        timeout: Duration,
    ) -> oneshot::Receiver<Result<SupportedMessage, StatusCode>> {
        let (cb, recv) = oneshot::channel();
        send.send(OutgoingMessage {
            request: request(),
            callback: Some(cb),
            deadline: Instant::now() + timeout,
        })
        .await
        .unwrap();
        recv
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let (mut state, send) = state(10);
        let _r1 = queue(&send, Duration::from_secs(10)).await;
        let _r2 = queue(&send, Duration::from_secs(10)).await;
        let (_, id1) = state.wait_for_outgoing_message().await.unwrap();
        let (_, id2) = state.wait_for_outgoing_message().await.unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(state.pending_count(), 2);
    }

    #[tokio::test]
    async fn request_id_skips_zero() {
        let (mut state, _send) = state(10);
        state.next_request_id = u32::MAX;
        assert_eq!(state.next_request_id(), u32::MAX);
        assert_eq!(state.next_request_id(), 1);
    }

    #[tokio::test]
    async fn response_resolves_request() {
        let (mut state, send) = state(10);
        let recv = queue(&send, Duration::from_secs(10)).await;
        let (_, id) = state.wait_for_outgoing_message().await.unwrap();
        assert!(state.complete_request(id, Ok(response())));
        // A second completion for the same id goes nowhere
        assert!(!state.complete_request(id, Ok(response())));
        assert!(matches!(
            recv.await.unwrap(),
            Ok(SupportedMessage::CloseSessionResponse(_))
        ));
    }

    #[tokio::test]
    async fn timeout_only_affects_expired_request() {
        let (mut state, send) = state(10);
        let short = queue(&send, Duration::from_millis(50)).await;
        let long = queue(&send, Duration::from_secs(10)).await;
        let (_, _) = state.wait_for_outgoing_message().await.unwrap();
        let (_, long_id) = state.wait_for_outgoing_message().await.unwrap();

        // Nothing else is queued, so this only returns by timing out
        let _ = tokio::time::timeout(
            Duration::from_millis(200),
            state.wait_for_outgoing_message(),
        )
        .await;
        assert_eq!(short.await.unwrap().unwrap_err(), StatusCode::BadTimeout);
        assert_eq!(state.pending_count(), 1);
        state.complete_request(long_id, Ok(response()));
        assert!(long.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn close_fails_pending_and_queued() {
        let (mut state, send) = state(2);
        let r1 = queue(&send, Duration::from_secs(10)).await;
        let r2 = queue(&send, Duration::from_secs(10)).await;
        let r3 = queue(&send, Duration::from_secs(10)).await;
        state.wait_for_outgoing_message().await.unwrap();
        state.wait_for_outgoing_message().await.unwrap();

        assert_eq!(state.close(StatusCode::Good).await, StatusCode::Good);
        for r in [r1, r2, r3] {
            assert_eq!(
                r.await.unwrap().unwrap_err(),
                StatusCode::BadConnectionClosed
            );
        }
        assert_eq!(state.pending_count(), 0);
        // The queue no longer accepts messages
        let (cb, _) = oneshot::channel();
        assert!(send
            .send(OutgoingMessage {
                request: request(),
                callback: Some(cb),
                deadline: Instant::now(),
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn error_message_closes() {
        use crate::core::comms::tcp_types::ErrorMessage;
        let (mut state, _send) = state(2);
        let err = ErrorMessage::from_status_code(StatusCode::BadTcpServerTooBusy);
        assert_eq!(
            state.handle_incoming_message(Message::Error(err)),
            Err(StatusCode::BadTcpServerTooBusy)
        );
    }
}
