// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{sync::Arc, time::Duration};

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::{
    client::transport::{
        connect::{Connector, Transport},
        core::TransportPollResult,
        tcp::TransportConfiguration,
    },
    core::{comms::secure_channel::SecureChannel, supported_message::SupportedMessage},
    crypto::SecurityPolicy,
    sync::RwLock,
    types::{
        ByteString, CloseSecureChannelRequest, DecodingOptions, EndpointDescription,
        MessageSecurityMode, NodeId, RequestHeader, SecurityTokenRequestType, StatusCode,
    },
};

use super::state::{Request, RequestSend, SecureChannelState};

/// The client end of a secure channel. Owns the channel state and hands requests to the
/// transport of the current connection, renewing the security token when it is due.
pub struct AsyncSecureChannel {
    endpoint: EndpointDescription,
    pub(crate) secure_channel: Arc<RwLock<SecureChannel>>,
    decoding_options: DecodingOptions,
    transport_config: TransportConfiguration,
    connector: Arc<dyn Connector>,
    state: SecureChannelState,
    /// Held while a token is renewed so concurrent requests renew once
    renew_lock: tokio::sync::Mutex<()>,
    request_timeout: Duration,
    /// Queue into the current transport, `None` while disconnected
    request_send: ArcSwapOption<RequestSend>,
}

/// Drives the transport of a connected secure channel. Nothing is sent or received unless this
/// is polled.
pub struct SecureChannelEventLoop {
    transport: Box<dyn Transport>,
}

impl SecureChannelEventLoop {
    pub async fn poll(&mut self) -> TransportPollResult {
        self.transport.poll().await
    }
}

impl AsyncSecureChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: EndpointDescription,
        decoding_options: DecodingOptions,
        ignore_clock_skew: bool,
        auth_token: Arc<ArcSwap<NodeId>>,
        transport_config: TransportConfiguration,
        connector: Arc<dyn Connector>,
        channel_lifetime: u32,
        request_timeout: Duration,
    ) -> Self {
        let secure_channel = Arc::new(RwLock::new(SecureChannel::new(decoding_options.clone())));

        Self {
            transport_config,
            renew_lock: tokio::sync::Mutex::new(()),
            state: SecureChannelState::new(
                ignore_clock_skew,
                secure_channel.clone(),
                auth_token,
                channel_lifetime,
            ),
            endpoint,
            secure_channel,
            decoding_options,
            connector,
            request_timeout,
            request_send: Default::default(),
        }
    }

    fn token_due_for_renewal(&self) -> bool {
        trace_read_lock!(self.secure_channel).should_renew_security_token()
    }

    /// Renews the security token once 75% of its lifetime is gone. Callers that find a renewal
    /// under way wait for it and then see a fresh token.
    async fn renew_token_if_due(&self, send: &RequestSend) -> Result<(), StatusCode> {
        if !self.token_due_for_renewal() {
            return Ok(());
        }
        let _renewing = self.renew_lock.lock().await;
        if !self.token_due_for_renewal() {
            return Ok(());
        }
        debug!("Renewing the security token");
        let response = self
            .state
            .open_request(SecurityTokenRequestType::Renew, self.request_timeout, send.clone())
            .send()
            .await?;
        self.state.apply_open_response(response)
    }

    /// Sends a request on the channel and waits for its response, at most `timeout`.
    pub async fn send(
        &self,
        request: impl Into<SupportedMessage>,
        timeout: Duration,
    ) -> Result<SupportedMessage, StatusCode> {
        let Some(send) = self.request_send.load().as_deref().cloned() else {
            return Err(StatusCode::BadNotConnected);
        };
        self.renew_token_if_due(&send).await?;
        Request::new(request, send, timeout).send().await
    }

    pub(crate) fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        self.state.make_request_header(timeout)
    }

    pub(crate) fn client_nonce(&self) -> ByteString {
        let secure_channel = trace_read_lock!(self.secure_channel);
        secure_channel.local_nonce_as_byte_string()
    }

    pub(crate) fn update_from_created_session(&self, nonce: &ByteString) -> Result<(), StatusCode> {
        let mut secure_channel = trace_write_lock!(self.secure_channel);
        secure_channel.set_remote_nonce_from_byte_string(nonce)
    }

    pub(crate) fn security_policy(&self) -> SecurityPolicy {
        let secure_channel = trace_read_lock!(self.secure_channel);
        secure_channel.security_policy()
    }

    pub(crate) fn decoding_options(&self) -> DecodingOptions {
        let secure_channel = trace_read_lock!(self.secure_channel);
        secure_channel.decoding_options()
    }

    /// The endpoint this channel connects to.
    pub fn endpoint(&self) -> &EndpointDescription {
        &self.endpoint
    }

    /// Whether requests can currently be queued on the channel.
    pub fn is_connected(&self) -> bool {
        self.request_send
            .load()
            .as_deref()
            .is_some_and(|s| !s.is_closed())
    }

    /// One attempt to connect and open the secure channel. Retrying is up to the caller.
    pub async fn connect_no_retry(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        self.request_send.store(None);
        let (mut transport, send) = self.create_transport().await?;

        // Nobody else polls the transport until the channel is open
        let open = self
            .state
            .open_request(SecurityTokenRequestType::Issue, self.request_timeout, send.clone())
            .send();
        tokio::pin!(open);
        let response = loop {
            tokio::select! {
                r = &mut open => break r?,
                r = transport.poll() => {
                    if let TransportPollResult::Closed(e) = r {
                        return Err(e);
                    }
                }
            }
        };
        self.state.apply_open_response(response)?;

        self.request_send.store(Some(Arc::new(send)));
        Ok(SecureChannelEventLoop { transport })
    }

    /// The policy of the endpoint, which must be one that sends unsecured messages.
    fn endpoint_security_policy(&self) -> Result<SecurityPolicy, StatusCode> {
        let uri = self.endpoint.security_policy_uri.as_ref();
        let policy = if uri.is_empty() {
            SecurityPolicy::None
        } else {
            SecurityPolicy::from_uri(uri)
        };
        if policy != SecurityPolicy::None {
            error!("Security policy \"{}\" is not supported", uri);
            return Err(StatusCode::BadSecurityPolicyRejected);
        }
        match self.endpoint.security_mode {
            MessageSecurityMode::None | MessageSecurityMode::Invalid => Ok(policy),
            mode => {
                error!("Security mode {:?} is not supported", mode);
                Err(StatusCode::BadSecurityModeRejected)
            }
        }
    }

    async fn create_transport(&self) -> Result<(Box<dyn Transport>, RequestSend), StatusCode> {
        let security_policy = self.endpoint_security_policy()?;
        {
            // Every connection starts from a fresh channel
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            *secure_channel = SecureChannel::new(self.decoding_options.clone());
            secure_channel.set_security_policy(security_policy);
            secure_channel.set_security_mode(MessageSecurityMode::None);
        }

        let endpoint_url = self.endpoint.endpoint_url.as_ref();
        debug!("Connecting to {}, policy {:?}", endpoint_url, security_policy);
        let (send, recv) = tokio::sync::mpsc::channel(self.transport_config.max_inflight.max(1));
        let transport = self
            .connector
            .connect(
                self.secure_channel.clone(),
                recv,
                self.transport_config.clone(),
                endpoint_url,
            )
            .await?;
        Ok((transport, send))
    }

    /// Queues CloseSecureChannel and detaches from the transport. The transport closes once
    /// the request is written and fails whatever is still pending.
    pub async fn close_channel(&self) {
        let Some(send) = self.request_send.swap(None) else {
            return;
        };
        let request = CloseSecureChannelRequest {
            request_header: self.state.make_request_header(self.request_timeout),
        };
        let queued = Request::new(request, (*send).clone(), self.request_timeout)
            .send_no_response()
            .await;
        if let Err(e) = queued {
            error!("CloseSecureChannel could not be queued, {e}");
        }
    }
}
