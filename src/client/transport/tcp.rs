// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use super::core::{OutgoingMessage, TransportPollResult, TransportState};
use crate::core::comms::{
    buffer::SendBuffer,
    secure_channel::SecureChannel,
    tcp_codec::{Message, TcpCodec},
    tcp_types::{AcknowledgeMessage, HelloMessage, PROTOCOL_VERSION},
    url::hostname_port_from_url,
};
use crate::core::{constants::DEFAULT_OPC_UA_SERVER_PORT, supported_message::SupportedMessage};
use crate::sync::RwLock;
use crate::types::{encoding::BinaryEncoder, StatusCode};

#[derive(Debug, Clone, Copy)]
enum TransportCloseState {
    Open,
    Closing(StatusCode),
    Closed(StatusCode),
}

/// A transport over `opc.tcp`. Created once the Hello / Acknowledge handshake has succeeded.
pub struct TcpTransport {
    state: TransportState,
    read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    write: WriteHalf<TcpStream>,
    send_buffer: SendBuffer,
    should_close: bool,
    closed: TransportCloseState,
}

/// Limits and timeouts of a transport. The buffer and message limits are what the client
/// proposes in its Hello, the server may lower them.
#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    pub max_pending_incoming: usize,
    pub max_inflight: usize,
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    pub max_message_size: usize,
    pub max_chunk_count: usize,
    pub connect_timeout: Duration,
    pub acknowledge_timeout: Duration,
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        Self {
            max_pending_incoming: 5,
            max_inflight: 20,
            send_buffer_size: 65535,
            recv_buffer_size: 65535,
            max_message_size: crate::types::constants::MAX_MESSAGE_SIZE,
            max_chunk_count: crate::types::constants::MAX_CHUNK_COUNT,
            connect_timeout: Duration::from_secs(5),
            acknowledge_timeout: Duration::from_secs(5),
        }
    }
}

/// The limits in effect once the server has acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RevisedLimits {
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    pub max_message_size: usize,
    pub max_chunk_count: usize,
}

impl RevisedLimits {
    /// Each limit becomes the smaller of ours and the server's. A server value of 0 means
    /// it does not impose a limit. A local 0 means unlimited for the message limits only.
    pub fn from_acknowledge(config: &TransportConfiguration, ack: &AcknowledgeMessage) -> Self {
        fn min_buffer(local: usize, remote: u32) -> usize {
            if remote == 0 {
                local
            } else {
                local.min(remote as usize)
            }
        }
        fn min_limit(local: usize, remote: u32) -> usize {
            match (local, remote as usize) {
                (local, 0) => local,
                (0, remote) => remote,
                (local, remote) => local.min(remote),
            }
        }
        Self {
            // What we send is bounded by what they can receive and vice versa
            send_buffer_size: min_buffer(config.send_buffer_size, ack.limits.receive_buffer_size),
            recv_buffer_size: min_buffer(config.recv_buffer_size, ack.limits.send_buffer_size),
            max_message_size: min_limit(config.max_message_size, ack.limits.max_message_size),
            max_chunk_count: min_limit(config.max_chunk_count, ack.limits.max_chunk_count),
        }
    }
}

type FramedReader = FramedRead<ReadHalf<TcpStream>, TcpCodec>;

/// First address `endpoint_url` resolves to.
async fn resolve(endpoint_url: &str) -> Result<SocketAddr, StatusCode> {
    let (host, port) = hostname_port_from_url(endpoint_url, DEFAULT_OPC_UA_SERVER_PORT)?;
    let mut addrs = tokio::net::lookup_host(format!("{}:{}", host, port))
        .await
        .map_err(|e| {
            error!("Cannot resolve {}, {}", endpoint_url, e);
            StatusCode::BadTcpEndpointUrlInvalid
        })?;
    addrs.next().ok_or_else(|| {
        error!("{} resolves to no address", endpoint_url);
        StatusCode::BadTcpEndpointUrlInvalid
    })
}

/// Waits for the server's answer to our Hello.
async fn read_acknowledge(
    read: &mut FramedReader,
    timeout: Duration,
) -> Result<AcknowledgeMessage, StatusCode> {
    let Ok(frame) = tokio::time::timeout(timeout, read.next()).await else {
        error!("No acknowledge within {:?}", timeout);
        return Err(StatusCode::BadTimeout);
    };
    match frame {
        Some(Ok(Message::Acknowledge(ack))) => Ok(ack),
        Some(Ok(Message::Error(err))) => {
            error!("Hello rejected with {}, {}", err.status_code(), err.reason);
            Err(err.status_code())
        }
        Some(Ok(other)) => {
            error!("Expected an acknowledge, received {:?}", other);
            Err(StatusCode::BadTcpMessageTypeInvalid)
        }
        Some(Err(e)) => {
            error!("Unreadable acknowledge, {}", e);
            Err(StatusCode::BadTcpMessageTypeInvalid)
        }
        None => {
            error!("Connection closed before the acknowledge");
            Err(StatusCode::BadConnectionClosed)
        }
    }
}

impl TcpTransport {
    /// Connects to the endpoint and performs the Hello / Acknowledge handshake. Nothing is sent
    /// or received afterwards unless the returned transport is polled.
    pub async fn connect(
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Self, StatusCode> {
        let addr = resolve(endpoint_url).await?;
        debug!("Connecting to {} at {}", endpoint_url, addr);
        let socket = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                error!("Cannot connect to {}, {}", addr, e);
                return Err(StatusCode::BadCommunicationError);
            }
            Err(_) => {
                error!("Connecting to {} timed out", addr);
                return Err(StatusCode::BadTimeout);
            }
        };

        // Dropping the halves on any error below closes the socket
        let (reader, mut write) = tokio::io::split(socket);
        let decoding_options = trace_read_lock!(secure_channel).decoding_options();
        let mut read = FramedRead::new(reader, TcpCodec::new(decoding_options));

        let hello = HelloMessage::new(
            endpoint_url,
            config.send_buffer_size,
            config.recv_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        write.write_all(&hello.encode_to_vec()).await.map_err(|e| {
            error!("Cannot send hello, {}", e);
            StatusCode::BadCommunicationError
        })?;

        let ack = read_acknowledge(&mut read, config.acknowledge_timeout).await?;
        if ack.limits.protocol_version < PROTOCOL_VERSION {
            warn!(
                "Server speaks protocol version {}, older than {}",
                ack.limits.protocol_version, PROTOCOL_VERSION
            );
        }
        let limits = RevisedLimits::from_acknowledge(&config, &ack);
        debug!("Transport limits after acknowledge {:?}", limits);

        // Incoming messages are held to the revised limits from now on
        {
            let mut secure_channel = trace_write_lock!(secure_channel);
            let mut decoding_options = secure_channel.decoding_options();
            decoding_options.max_message_size = limits.max_message_size;
            decoding_options.max_chunk_count = limits.max_chunk_count;
            read.decoder_mut()
                .set_decoding_options(decoding_options.clone());
            secure_channel.set_decoding_options(decoding_options);
        }

        let mut send_buffer = SendBuffer::new(
            config.send_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        send_buffer.revise(
            limits.send_buffer_size,
            limits.max_message_size,
            limits.max_chunk_count,
        );

        Ok(Self {
            state: TransportState::new(
                secure_channel,
                outgoing_recv,
                config.max_pending_incoming,
                config.max_inflight,
            ),
            read,
            write,
            send_buffer,
            should_close: false,
            closed: TransportCloseState::Open,
        })
    }

    fn on_incoming(&mut self, incoming: Option<Result<Message, std::io::Error>>) -> TransportPollResult {
        match incoming {
            Some(Ok(message)) => match self.state.handle_incoming_message(message) {
                Ok(()) => TransportPollResult::IncomingMessage,
                Err(e) => TransportPollResult::Closed(e),
            },
            Some(Err(e)) => {
                error!("Reading from the socket failed, {}", e);
                TransportPollResult::Closed(StatusCode::BadConnectionClosed)
            }
            None => TransportPollResult::Closed(StatusCode::BadCommunicationError),
        }
    }

    /// Chunks a message taken from the queue into the send buffer.
    fn on_outgoing(&mut self, message: SupportedMessage, request_id: u32) -> TransportPollResult {
        if matches!(message, SupportedMessage::CloseSecureChannelRequest(_)) {
            debug!("CloseSecureChannel queued, the transport closes once it is written");
            self.should_close = true;
        }
        let written = {
            let secure_channel = trace_read_lock!(self.state.secure_channel);
            self.send_buffer.write(request_id, message, &secure_channel)
        };
        if let Err(e) = written {
            // The message never made it out, only its own request fails
            self.state.complete_request(request_id, Err(e));
        }
        TransportPollResult::OutgoingMessage
    }

    /// One step of work. Reading goes on throughout. While bytes are waiting to be written
    /// the queue is left alone, otherwise the next message is taken from it.
    async fn poll_inner(&mut self) -> TransportPollResult {
        if self.send_buffer.should_encode_chunks() {
            let secure_channel = trace_read_lock!(self.state.secure_channel);
            if let Err(e) = self.send_buffer.encode_next_chunk(&secure_channel) {
                return TransportPollResult::Closed(e);
            }
        }

        if self.send_buffer.can_read() {
            tokio::select! {
                r = self.send_buffer.read_into_async(&mut self.write) => match r {
                    Ok(()) => TransportPollResult::OutgoingMessageSent,
                    Err(e) => {
                        error!("Writing to the socket failed, {}", e);
                        TransportPollResult::Closed(StatusCode::BadCommunicationError)
                    }
                },
                incoming = self.read.next() => self.on_incoming(incoming),
            }
        } else if self.should_close {
            debug!("CloseSecureChannel written, closing");
            TransportPollResult::Closed(StatusCode::Good)
        } else {
            tokio::select! {
                outgoing = self.state.wait_for_outgoing_message() => match outgoing {
                    Some((message, request_id)) => self.on_outgoing(message, request_id),
                    None => TransportPollResult::Closed(StatusCode::Good),
                },
                incoming = self.read.next() => self.on_incoming(incoming),
            }
        }
    }

    /// Makes progress on the connection. Cancel safe: each step completes at most one cancel
    /// safe future, and an interrupted close picks up where it left off.
    pub async fn poll(&mut self) -> TransportPollResult {
        let status = match self.closed {
            TransportCloseState::Closed(status) => return TransportPollResult::Closed(status),
            TransportCloseState::Closing(status) => status,
            TransportCloseState::Open => match self.poll_inner().await {
                TransportPollResult::Closed(status) => {
                    self.closed = TransportCloseState::Closing(status);
                    status
                }
                r => return r,
            },
        };
        let status = self.state.close(status).await;
        self.closed = TransportCloseState::Closed(status);
        let _ = self.write.shutdown().await;
        TransportPollResult::Closed(status)
    }
}
