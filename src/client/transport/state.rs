// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use tokio::sync::{mpsc::error::SendTimeoutError, oneshot};

use crate::{
    client::{
        session::process_unexpected_response,
        transport::{OutgoingMessage, ResponseCallback},
    },
    core::{
        comms::secure_channel::SecureChannel, handle::AtomicHandle,
        supported_message::SupportedMessage,
    },
    sync::RwLock,
    types::{
        DateTime, DiagnosticBits, NodeId, OpenSecureChannelRequest, RequestHeader,
        SecurityTokenRequestType, StatusCode,
    },
};

pub(crate) type RequestSend = tokio::sync::mpsc::Sender<OutgoingMessage>;

/// What every request on a channel shares: the handle counter, the session's authentication
/// token and the offset between our clock and the server's.
pub struct SecureChannelState {
    client_offset: ArcSwap<chrono::Duration>,
    ignore_clock_skew: bool,
    secure_channel: Arc<RwLock<SecureChannel>>,
    /// Null until a session has been created
    authentication_token: Arc<ArcSwap<NodeId>>,
    request_handle: AtomicHandle,
    /// Token lifetime asked for in OpenSecureChannel, in milliseconds
    requested_lifetime: u32,
}

/// A request on its way into the outgoing queue. The timeout bounds the time spent queueing
/// and waiting for the response together.
pub(super) struct Request {
    payload: SupportedMessage,
    sender: RequestSend,
    timeout: Duration,
}

impl Request {
    pub fn new(
        payload: impl Into<SupportedMessage>,
        sender: RequestSend,
        timeout: Duration,
    ) -> Self {
        Self {
            payload: payload.into(),
            sender,
            timeout,
        }
    }

    async fn enqueue(self, callback: Option<ResponseCallback>) -> Result<(), StatusCode> {
        let message = OutgoingMessage {
            request: self.payload,
            callback,
            deadline: Instant::now() + self.timeout,
        };
        self.sender
            .send_timeout(message, self.timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Closed(_) => StatusCode::BadConnectionClosed,
                SendTimeoutError::Timeout(_) => StatusCode::BadTimeout,
            })
    }

    /// Queue the request, no response is expected.
    pub async fn send_no_response(self) -> Result<(), StatusCode> {
        self.enqueue(None).await
    }

    /// Queue the request and wait for its response.
    pub async fn send(self) -> Result<SupportedMessage, StatusCode> {
        let (callback, response) = oneshot::channel();
        self.enqueue(Some(callback)).await?;
        // A dropped callback means the transport went away with the request pending
        response
            .await
            .unwrap_or(Err(StatusCode::BadConnectionClosed))
    }
}

impl SecureChannelState {
    pub fn new(
        ignore_clock_skew: bool,
        secure_channel: Arc<RwLock<SecureChannel>>,
        authentication_token: Arc<ArcSwap<NodeId>>,
        requested_lifetime: u32,
    ) -> Self {
        SecureChannelState {
            client_offset: ArcSwap::from_pointee(chrono::Duration::zero()),
            ignore_clock_skew,
            secure_channel,
            authentication_token,
            request_handle: AtomicHandle::new(1),
            requested_lifetime,
        }
    }

    /// Builds the OpenSecureChannel request that issues a first token or renews the current
    /// one.
    pub(super) fn open_request(
        &self,
        request_type: SecurityTokenRequestType,
        timeout: Duration,
        sender: RequestSend,
    ) -> Request {
        let (security_mode, client_nonce) = {
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            let nonce = secure_channel.security_policy().random_nonce();
            secure_channel.set_local_nonce(nonce.as_ref());
            (secure_channel.security_mode(), nonce)
        };
        debug!(
            "{:?} security token, mode {:?}, lifetime {}ms",
            request_type, security_mode, self.requested_lifetime
        );

        let request = OpenSecureChannelRequest {
            request_header: self.make_request_header(timeout),
            client_protocol_version: 0,
            request_type,
            security_mode,
            client_nonce,
            requested_lifetime: self.requested_lifetime,
        };
        Request::new(request, sender, timeout)
    }

    /// Takes the token and nonce from an OpenSecureChannel response.
    pub(super) fn apply_open_response(&self, response: SupportedMessage) -> Result<(), StatusCode> {
        let SupportedMessage::OpenSecureChannelResponse(response) = response else {
            return Err(process_unexpected_response(response));
        };
        let header = &response.response_header;
        if header.service_result.is_bad() {
            error!("Server refused the security token, {}", header.service_result);
            return Err(header.service_result);
        }

        // Request timestamps follow the server's clock from here on
        if self.ignore_clock_skew && !header.timestamp.is_null() {
            let offset = header.timestamp - DateTime::now();
            self.client_offset
                .store(Arc::new(**self.client_offset.load() + offset));
            debug!("Client offset is now {}", **self.client_offset.load());
        }

        let token = &response.security_token;
        debug!(
            "Channel {} has token {}, lifetime {}ms",
            token.channel_id, token.token_id, token.revised_lifetime
        );
        let mut secure_channel = trace_write_lock!(self.secure_channel);
        secure_channel.set_client_offset(**self.client_offset.load());
        secure_channel.set_security_token(token.clone());
        secure_channel.set_remote_nonce_from_byte_string(&response.server_nonce)
    }

    /// Header for a request on this channel. Once a session exists its authentication token
    /// goes in every header.
    pub fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        RequestHeader {
            authentication_token: NodeId::clone(&self.authentication_token.load()),
            timestamp: DateTime::now() + **self.client_offset.load(),
            request_handle: self.request_handle.next(),
            return_diagnostics: DiagnosticBits::empty().bits(),
            timeout_hint: u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ChannelSecurityToken, DecodingOptions, OpenSecureChannelResponse, ResponseHeader,
        ServiceFault,
    };

    fn state(ignore_clock_skew: bool) -> (SecureChannelState, Arc<RwLock<SecureChannel>>) {
        let channel = Arc::new(RwLock::new(SecureChannel::new(DecodingOptions::default())));
        let token = Arc::new(ArcSwap::from_pointee(NodeId::new(1, "token")));
        (
            SecureChannelState::new(ignore_clock_skew, channel.clone(), token, 60_000),
            channel,
        )
    }

    fn open_response(timestamp: DateTime) -> SupportedMessage {
        let mut response_header = ResponseHeader::new_good(&RequestHeader::dummy());
        response_header.timestamp = timestamp;
        OpenSecureChannelResponse {
            response_header,
            security_token: ChannelSecurityToken {
                channel_id: 5,
                token_id: 9,
                created_at: DateTime::now(),
                revised_lifetime: 30_000,
            },
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn request_headers() {
        let (state, _) = state(false);
        let h1 = state.make_request_header(Duration::from_secs(5));
        let h2 = state.make_request_header(Duration::from_secs(5));
        assert_eq!(h1.request_handle + 1, h2.request_handle);
        assert_eq!(h1.timeout_hint, 5000);
        assert_eq!(h1.authentication_token, NodeId::new(1, "token"));
    }

    #[tokio::test]
    async fn open_request_uses_configured_lifetime() {
        let (state, _) = state(false);
        let (send, mut recv) = tokio::sync::mpsc::channel(1);
        state
            .open_request(SecurityTokenRequestType::Issue, Duration::from_secs(5), send)
            .send_no_response()
            .await
            .unwrap();
        let message = recv.recv().await.unwrap();
        assert!(message.callback.is_none());
        let SupportedMessage::OpenSecureChannelRequest(request) = message.request else {
            panic!("Expected an open secure channel request");
        };
        assert_eq!(request.requested_lifetime, 60_000);
        assert_eq!(request.request_type, SecurityTokenRequestType::Issue);
    }

    #[tokio::test]
    async fn closed_queue() {
        let (state, _) = state(false);
        let (send, recv) = tokio::sync::mpsc::channel(1);
        drop(recv);
        let request =
            state.open_request(SecurityTokenRequestType::Renew, Duration::from_secs(5), send);
        assert_eq!(request.send().await, Err(StatusCode::BadConnectionClosed));
    }

    #[test]
    fn response_sets_token() {
        let (state, channel) = state(false);
        state.apply_open_response(open_response(DateTime::now())).unwrap();
        let channel = channel.read();
        assert_eq!(channel.secure_channel_id(), 5);
        assert_eq!(channel.token_id(), 9);
        assert_eq!(channel.token_lifetime(), 30_000);
        assert_eq!(channel.client_offset(), chrono::Duration::zero());
    }

    #[test]
    fn clock_skew_is_corrected_when_ignored() {
        let (state, channel) = state(true);
        let server_time = DateTime::now() + chrono::Duration::hours(1);
        state.apply_open_response(open_response(server_time)).unwrap();
        let offset = channel.read().client_offset();
        assert!(offset > chrono::Duration::minutes(59));
        let header = state.make_request_header(Duration::from_secs(1));
        assert!(header.timestamp - DateTime::now() > chrono::Duration::minutes(59));
    }

    #[test]
    fn fault_instead_of_response() {
        let (state, _) = state(false);
        let fault = ServiceFault::new(&RequestHeader::dummy(), StatusCode::BadSecureChannelIdInvalid);
        assert_eq!(
            state.apply_open_response(fault.into()),
            Err(StatusCode::BadSecureChannelIdInvalid)
        );
    }
}
