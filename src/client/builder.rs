// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{core::config::Config, types::StatusCode};

use super::{
    config::DecodingOptions, transport::Connector, Client, ClientConfig, ClientEndpoint,
    ClientUserToken, ANONYMOUS_USER_TOKEN_ID,
};

/// Fluent construction of a [`ClientConfig`] and the [`Client`] that uses it.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    pub fn new() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Creates a `ClientBuilder` using a configuration file as the initial state.
    pub fn from_config(path: impl Into<PathBuf>) -> Result<ClientBuilder, StatusCode> {
        Ok(ClientBuilder {
            config: ClientConfig::load(&path.into())?,
            connector: None,
        })
    }

    /// Yields a [`Client`] from the values set by the builder. If the builder is not in a valid state
    /// it will return `None`.
    pub fn client(self) -> Option<Client> {
        if self.is_valid() {
            Some(match self.connector {
                Some(connector) => Client::new_with_connector(self.config, connector),
                None => Client::new(self.config),
            })
        } else {
            None
        }
    }

    /// Yields a [`ClientConfig`] from the values set by the builder.
    pub fn config(self) -> ClientConfig {
        self.config
    }

    /// Tests if the builder is in a valid state to be able to yield a `Client`.
    pub fn is_valid(&self) -> bool {
        self.config.is_valid()
    }

    /// Sets the connector used to open transports to the server. The default connects over TCP.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, application_name: impl Into<String>) -> Self {
        self.config.application_name = application_name.into();
        self
    }

    /// Sets the application uri
    pub fn application_uri(mut self, application_uri: impl Into<String>) -> Self {
        self.config.application_uri = application_uri.into();
        self
    }

    /// Sets the product uri.
    pub fn product_uri(mut self, product_uri: impl Into<String>) -> Self {
        self.config.product_uri = product_uri.into();
        self
    }

    /// Locales sent when activating a session, most preferred first.
    pub fn preferred_locales(mut self, preferred_locales: Vec<String>) -> Self {
        self.config.preferred_locales = preferred_locales;
        self
    }

    /// Key into the endpoint table used by `Client::new_session`.
    pub fn default_endpoint(mut self, endpoint_id: impl Into<String>) -> Self {
        self.config.default_endpoint = endpoint_id.into();
        self
    }

    /// Registers a named endpoint.
    pub fn endpoint(mut self, endpoint_id: impl Into<String>, endpoint: ClientEndpoint) -> Self {
        self.config.endpoints.insert(endpoint_id.into(), endpoint);
        self
    }

    /// Registers several named endpoints at once.
    pub fn endpoints(
        mut self,
        endpoints: impl IntoIterator<Item = (impl Into<String>, ClientEndpoint)>,
    ) -> Self {
        self.config
            .endpoints
            .extend(endpoints.into_iter().map(|(id, e)| (id.into(), e)));
        self
    }

    /// Registers a named user identity. The anonymous id is reserved and rejected.
    pub fn user_token(
        mut self,
        user_token_id: impl Into<String>,
        user_token: ClientUserToken,
    ) -> Self {
        let user_token_id = user_token_id.into();
        if user_token_id == ANONYMOUS_USER_TOKEN_ID {
            error!("User token id {} is reserved", user_token_id);
        } else {
            self.config.user_tokens.insert(user_token_id, user_token);
        }
        self
    }

    /// Replaces the message and decoding limits as a whole. Limits of 0 on messages and
    /// chunks mean unlimited, on strings and arrays they forbid the value entirely.
    pub fn decoding_limits(mut self, limits: DecodingOptions) -> Self {
        self.config.decoding_options = limits;
        self
    }

    /// Adjusts the message and decoding limits in place.
    pub fn with_decoding_limits(mut self, f: impl FnOnce(&mut DecodingOptions)) -> Self {
        f(&mut self.config.decoding_options);
        self
    }

    /// Connection attempts before the event loop gives up. -1 keeps trying, 0 stops after
    /// the first failure and other negative values fail validation.
    pub fn session_retry_limit(mut self, session_retry_limit: i32) -> Self {
        self.config.session_retry_limit = session_retry_limit;
        self
    }

    /// First backoff delay. Each later delay doubles.
    pub fn session_retry_initial(mut self, session_retry_initial: Duration) -> Self {
        self.config.session_retry_initial = session_retry_initial;
        self
    }

    /// Ceiling for the backoff delay.
    pub fn session_retry_max(mut self, session_retry_max: Duration) -> Self {
        self.config.session_retry_max = session_retry_max;
        self
    }

    /// Period of the server state read that keeps an idle session alive.
    pub fn keep_alive_interval(mut self, keep_alive_interval: Duration) -> Self {
        self.config.keep_alive_interval = keep_alive_interval;
        self
    }

    /// Bound on opening the socket.
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }

    /// Bound on waiting for ACK after HEL.
    pub fn acknowledge_timeout(mut self, acknowledge_timeout: Duration) -> Self {
        self.config.acknowledge_timeout = acknowledge_timeout;
        self
    }

    /// Default timeout for service calls.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    /// Timeout for Publish, which the server may legitimately hold for a long time.
    pub fn publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.config.publish_timeout = publish_timeout;
        self
    }

    /// Upper bound on Publish requests parked at the server.
    pub fn max_inflight_publish(mut self, max_inflight_publish: usize) -> Self {
        self.config.max_inflight_publish = max_inflight_publish;
        self
    }

    /// Requested session timeout in milliseconds. The server may revise it.
    pub fn session_timeout(mut self, session_timeout: u32) -> Self {
        self.config.session_timeout = session_timeout;
        self
    }

    /// Don't correct request timestamps for the server's clock offset.
    pub fn ignore_clock_skew(mut self) -> Self {
        self.config.performance.ignore_clock_skew = true;
        self
    }

    /// Batch size for CreateMonitoredItems when subscriptions are rebuilt on a new session.
    pub fn recreate_monitored_items_chunk(mut self, recreate_monitored_items_chunk: usize) -> Self {
        self.config.performance.recreate_monitored_items_chunk = recreate_monitored_items_chunk;
        self
    }

    /// Requests the transport will have outstanding before it stops sending.
    pub fn max_inflight_messages(mut self, max_inflight_messages: usize) -> Self {
        self.config.performance.max_inflight_messages = max_inflight_messages;
        self
    }

    /// Name sent in CreateSession.
    pub fn session_name(mut self, session_name: impl Into<String>) -> Self {
        self.config.session_name = session_name.into();
        self
    }

    /// Requested security token lifetime in milliseconds. Renewal happens at 75% of the
    /// revised lifetime.
    pub fn channel_lifetime(mut self, channel_lifetime: u32) -> Self {
        self.config.channel_lifetime = channel_lifetime;
        self
    }
}
