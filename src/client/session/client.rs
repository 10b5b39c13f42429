// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::sync::Arc;

use crate::{
    client::{
        retry::SessionRetryPolicy,
        transport::{Connector, TcpConnector},
        ClientConfig, ClientEndpoint, IdentityToken, ANONYMOUS_USER_TOKEN_ID,
    },
    core::{comms::url::is_opc_ua_binary_url, config::Config},
    crypto::SecurityPolicy,
    types::{DecodingOptions, EndpointDescription, MessageSecurityMode, StatusCode, UAString},
};

use super::{ConnectionInfo, Session, SessionEventLoop};

/// Creates sessions. Sessions made by the same client share its configuration, its retry policy
/// and the connector used to reach servers.
pub struct Client {
    /// Client configuration
    config: ClientConfig,
    /// The session retry policy for new sessions
    session_retry_policy: SessionRetryPolicy,
    /// Opens the transport for each connection attempt
    connector: Arc<dyn Connector>,
}

impl Client {
    /// Create a new client from config, connecting to servers over TCP.
    ///
    /// Note that this does not make any connection to the server.
    ///
    /// # Arguments
    ///
    /// * `config` - Client configuration object.
    pub fn new(config: ClientConfig) -> Self {
        Self::new_with_connector(config, Arc::new(TcpConnector))
    }

    /// Create a new client from config that opens its transports through `connector`.
    pub fn new_with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        // The session retry policy dictates how many times to retry if connection to the server goes down
        // and on what interval
        let session_retry_policy = config.session_retry_policy();
        Self {
            config,
            session_retry_policy,
            connector,
        }
    }

    /// The configuration the client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Creates a session for an ad-hoc endpoint description.
    ///
    /// This function returns both a reference to the session, and a `SessionEventLoop`. You must run and
    /// poll the event loop in order to actually establish a connection.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The endpoint to connect to.
    /// * `user_identity_token` - Identity token to use for authentication.
    ///
    /// # Returns
    ///
    /// * `Ok((Arc<Session>, SessionEventLoop))` - Session and event loop.
    /// * `Err(StatusCode)` - The endpoint cannot be used.
    pub fn new_session_from_endpoint(
        &self,
        endpoint: impl Into<EndpointDescription>,
        user_identity_token: IdentityToken,
    ) -> Result<(Arc<Session>, SessionEventLoop), StatusCode> {
        self.new_session_from_info(ConnectionInfo {
            endpoint: endpoint.into(),
            user_identity_token,
            preferred_locales: self.config.preferred_locales.clone(),
        })
    }

    /// Creates a session from the supplied [`ConnectionInfo`].
    ///
    /// This method will not attempt to create a session on the server, that will only happen once you start polling
    /// the session event loop.
    ///
    /// # Returns
    ///
    /// * `Ok((Arc<Session>, SessionEventLoop))` - Session and event loop.
    /// * `Err(StatusCode)` - `BadTcpEndpointUrlInvalid` if the url is not an `opc.tcp` url,
    ///   `BadSecurityPolicyRejected` if the endpoint requires security.
    pub fn new_session_from_info(
        &self,
        connection_info: impl Into<ConnectionInfo>,
    ) -> Result<(Arc<Session>, SessionEventLoop), StatusCode> {
        let connection_info = connection_info.into();
        let endpoint_url = connection_info.endpoint.endpoint_url.as_ref();
        if !is_opc_ua_binary_url(endpoint_url) {
            error!(
                "Endpoint url {} is not a valid / supported url",
                endpoint_url
            );
            return Err(StatusCode::BadTcpEndpointUrlInvalid);
        }
        endpoint_security_policy(&connection_info.endpoint).ensure_supported()?;

        Ok(Session::new(
            connection_info,
            self.config.session_name.as_str().into(),
            self.config.application_description(),
            self.session_retry_policy.clone(),
            self.decoding_options(),
            &self.config,
            self.connector.clone(),
        ))
    }

    /// Creates a session for the default endpoint named in the config. If there is no default,
    /// or the endpoint does not exist, this function will return an error.
    pub fn new_session(&self) -> Result<(Arc<Session>, SessionEventLoop), StatusCode> {
        let endpoint = self.default_endpoint()?;
        self.new_session_from_client_endpoint(&endpoint)
    }

    /// Creates a session for the named endpoint in the config.
    ///
    /// # Arguments
    ///
    /// * `endpoint_id` - ID matching an endpoint defined in config.
    pub fn new_session_from_id(
        &self,
        endpoint_id: impl Into<String>,
    ) -> Result<(Arc<Session>, SessionEventLoop), StatusCode> {
        let endpoint_id = endpoint_id.into();
        let Some(endpoint) = self.config.endpoints.get(&endpoint_id) else {
            error!("Cannot find endpoint with id {}", endpoint_id);
            return Err(StatusCode::BadConfigurationError);
        };
        self.new_session_from_client_endpoint(endpoint)
    }

    fn new_session_from_client_endpoint(
        &self,
        client_endpoint: &ClientEndpoint,
    ) -> Result<(Arc<Session>, SessionEventLoop), StatusCode> {
        let Some(user_identity_token) =
            self.client_identity_token(client_endpoint.user_token_id.as_str())
        else {
            error!(
                "Endpoint {} user id {} cannot be found",
                client_endpoint.url, client_endpoint.user_token_id
            );
            return Err(StatusCode::BadConfigurationError);
        };
        let endpoint = endpoint_from_config(client_endpoint)?;
        info!(
            "Creating a session for endpoint {}, {} / {:?}",
            client_endpoint.url,
            client_endpoint.security_policy(),
            client_endpoint.security_mode()
        );
        self.new_session_from_info(ConnectionInfo {
            endpoint,
            user_identity_token,
            preferred_locales: self.config.preferred_locales.clone(),
        })
    }

    /// Returns an identity token corresponding to the matching user in the configuration. Or None
    /// if there is no matching token.
    pub fn client_identity_token(&self, user_token_id: &str) -> Option<IdentityToken> {
        if user_token_id == ANONYMOUS_USER_TOKEN_ID {
            Some(IdentityToken::Anonymous)
        } else {
            self.config
                .user_tokens
                .get(user_token_id)
                .map(|token| IdentityToken::UserName(token.user.clone(), token.password.clone()))
        }
    }

    /// Gets the [`ClientEndpoint`] information for the default endpoint, as defined
    /// by the configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(ClientEndpoint)` - The default endpoint set in config.
    /// * `Err(StatusCode)` - No default endpoint could be found.
    pub fn default_endpoint(&self) -> Result<ClientEndpoint, StatusCode> {
        let default_endpoint_id = &self.config.default_endpoint;
        if default_endpoint_id.is_empty() {
            error!("No default endpoint has been specified");
            Err(StatusCode::BadConfigurationError)
        } else if let Some(endpoint) = self.config.endpoints.get(default_endpoint_id) {
            Ok(endpoint.clone())
        } else {
            error!(
                "Cannot find default endpoint with id {}",
                default_endpoint_id
            );
            Err(StatusCode::BadConfigurationError)
        }
    }

    fn decoding_options(&self) -> DecodingOptions {
        self.config.decoding_options.as_comms_decoding_options()
    }
}

fn endpoint_security_policy(endpoint: &EndpointDescription) -> SecurityPolicy {
    let uri = endpoint.security_policy_uri.as_ref();
    if uri.is_empty() {
        SecurityPolicy::None
    } else {
        SecurityPolicy::from_uri(uri)
    }
}

/// The endpoint description for an endpoint from the config. The identity token policies are
/// not known until the server returns its endpoints in CreateSession.
fn endpoint_from_config(client_endpoint: &ClientEndpoint) -> Result<EndpointDescription, StatusCode> {
    let security_mode = client_endpoint.security_mode();
    if security_mode == MessageSecurityMode::Invalid {
        error!(
            "Endpoint {} security mode {} is invalid",
            client_endpoint.url, client_endpoint.security_mode
        );
        return Err(StatusCode::BadConfigurationError);
    }
    let Some(security_policy_uri) = client_endpoint.security_policy().to_uri() else {
        error!(
            "Endpoint {} security policy {} is invalid",
            client_endpoint.url, client_endpoint.security_policy
        );
        return Err(StatusCode::BadConfigurationError);
    };
    Ok(EndpointDescription {
        endpoint_url: UAString::from(client_endpoint.url.as_str()),
        security_mode,
        security_policy_uri: UAString::from(security_policy_uri),
        ..Default::default()
    })
}
