// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The client configuration and its validation.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use crate::{
    core::config::Config,
    crypto::SecurityPolicy,
    types::{ApplicationType, MessageSecurityMode, UAString},
};

use super::retry::SessionRetryPolicy;

/// Id an endpoint uses to connect without a user token. No user token may take it.
pub const ANONYMOUS_USER_TOKEN_ID: &str = "ANONYMOUS";

/// A user name and password, referenced from endpoints by the key it is stored under.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ClientUserToken {
    pub user: String,
    pub password: String,
}

impl ClientUserToken {
    pub fn user_pass(user: impl Into<String>, password: impl Into<String>) -> Self {
        ClientUserToken {
            user: user.into(),
            password: password.into(),
        }
    }

    /// A token needs a user name, the password may be empty.
    pub fn is_valid(&self) -> bool {
        !self.user.is_empty()
    }
}

/// An endpoint the client can connect to. Policy and mode are stored by name, as they appear
/// in the configuration file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ClientEndpoint {
    pub url: String,
    pub security_policy: String,
    pub security_mode: String,
    /// Key of the user token to authenticate with, or [`ANONYMOUS_USER_TOKEN_ID`]
    #[serde(default = "anonymous_user_token_id")]
    pub user_token_id: String,
}

fn anonymous_user_token_id() -> String {
    ANONYMOUS_USER_TOKEN_ID.to_string()
}

impl ClientEndpoint {
    /// An endpoint at `url` without security, connecting anonymously.
    pub fn new(url: impl Into<String>) -> Self {
        ClientEndpoint {
            url: url.into(),
            security_policy: SecurityPolicy::None.to_str().into(),
            security_mode: "None".into(),
            user_token_id: anonymous_user_token_id(),
        }
    }

    /// `Unknown` for a name that is not recognized.
    pub fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy::from_str(&self.security_policy).unwrap_or(SecurityPolicy::Unknown)
    }

    /// `Invalid` for a name that is not recognized.
    pub fn security_mode(&self) -> MessageSecurityMode {
        MessageSecurityMode::from_str(&self.security_mode).unwrap_or(MessageSecurityMode::Invalid)
    }
}

/// Message and value limits. Those the server acknowledges may lower the message limits
/// further once connected.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct DecodingOptions {
    /// Bytes, 0 for no limit
    pub max_message_size: usize,
    /// 0 for no limit
    pub max_chunk_count: usize,
    /// Largest chunk we send, proposed as our send buffer in Hello
    pub max_chunk_size: usize,
    /// Largest chunk we accept, proposed as our receive buffer in Hello
    pub max_incoming_chunk_size: usize,
    /// Bytes of a string. Unlike the message limits, 0 allows only null or empty strings
    pub max_string_length: usize,
    /// Bytes of a byte string, 0 allows only null or empty ones
    pub max_byte_string_length: usize,
    /// Elements of an array, 0 allows only null or empty ones
    pub max_array_length: usize,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        let defaults = crate::types::DecodingOptions::default();
        DecodingOptions {
            max_message_size: defaults.max_message_size,
            max_chunk_count: defaults.max_chunk_count,
            max_chunk_size: 65535,
            max_incoming_chunk_size: 65535,
            max_string_length: defaults.max_string_length,
            max_byte_string_length: defaults.max_byte_string_length,
            max_array_length: defaults.max_array_length,
        }
    }
}

impl DecodingOptions {
    /// The same limits in the form the decoders take.
    pub fn as_comms_decoding_options(&self) -> crate::types::DecodingOptions {
        crate::types::DecodingOptions {
            max_message_size: self.max_message_size,
            max_chunk_count: self.max_chunk_count,
            max_string_length: self.max_string_length,
            max_byte_string_length: self.max_byte_string_length,
            max_array_length: self.max_array_length,
            ..Default::default()
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct Performance {
    /// Stamp requests with the server's time as seen in OpenSecureChannel, for servers that
    /// reject requests from a client whose clock is off.
    pub ignore_clock_skew: bool,
    /// Items per CreateMonitoredItems request when subscriptions are created again after a
    /// new session
    pub recreate_monitored_items_chunk: usize,
    /// Requests that may await a response at once
    pub max_inflight_messages: usize,
}

/// Configuration of a client, usually loaded from a YAML file.
///
/// Durations are serialized the way serde writes a `Duration`. Endpoints and user tokens are
/// keyed by id, endpoints refer to their user token by that id.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Name presented to the server in CreateSession
    pub application_name: String,
    pub application_uri: String,
    pub product_uri: String,
    /// Locales asked for in ActivateSession, most preferred first
    pub preferred_locales: Vec<String>,
    /// Key into `endpoints` of the endpoint to connect to when none is named
    pub default_endpoint: String,
    pub user_tokens: BTreeMap<String, ClientUserToken>,
    pub endpoints: BTreeMap<String, ClientEndpoint>,
    pub decoding_options: DecodingOptions,
    /// Reconnect attempts before the event loop gives up, -1 for no limit
    pub session_retry_limit: i32,
    /// Delay before the first reconnect attempt, doubling with each failure
    pub session_retry_initial: Duration,
    /// Longest delay between reconnect attempts
    pub session_retry_max: Duration,
    /// How often the server state is read to keep the session alive
    pub keep_alive_interval: Duration,
    pub connect_timeout: Duration,
    /// How long the server has to answer the Hello
    pub acknowledge_timeout: Duration,
    pub request_timeout: Duration,
    /// Publish requests are parked on the server, so they get their own timeout
    pub publish_timeout: Duration,
    /// Publish requests kept outstanding at once
    pub max_inflight_publish: usize,
    /// Session timeout asked for in CreateSession, in milliseconds
    pub session_timeout: u32,
    /// Security token lifetime asked for in OpenSecureChannel, in milliseconds
    pub channel_lifetime: u32,
    pub performance: Performance,
    pub session_name: String,
}

impl ClientConfig {
    /// What is wrong with the configuration. Empty when it can be used.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.application_name.is_empty() {
            problems.push("application name is empty".to_string());
        }
        if self.application_uri.is_empty() {
            problems.push("application uri is empty".to_string());
        }

        for (id, token) in &self.user_tokens {
            if id.is_empty() || id == ANONYMOUS_USER_TOKEN_ID {
                problems.push(format!("user token id \"{}\" is reserved", id));
            }
            if !token.is_valid() {
                problems.push(format!("user token {} has no user name", id));
            }
        }

        if self.endpoints.is_empty() {
            warn!("No endpoints are configured");
        }
        if !self.default_endpoint.is_empty() && !self.endpoints.contains_key(&self.default_endpoint)
        {
            problems.push(format!(
                "default endpoint {} is not configured",
                self.default_endpoint
            ));
        }
        for (id, endpoint) in &self.endpoints {
            if id.is_empty() {
                problems.push("an endpoint has an empty id".to_string());
            }
            // Connections are unsecured
            if endpoint.security_policy() != SecurityPolicy::None {
                problems.push(format!(
                    "endpoint {} has unsupported security policy {}",
                    id, endpoint.security_policy
                ));
            }
            if endpoint.security_mode() != MessageSecurityMode::None {
                problems.push(format!(
                    "endpoint {} has unsupported security mode {}",
                    id, endpoint.security_mode
                ));
            }
            if endpoint.user_token_id != ANONYMOUS_USER_TOKEN_ID
                && !self.user_tokens.contains_key(&endpoint.user_token_id)
            {
                problems.push(format!(
                    "endpoint {} refers to unknown user token {}",
                    id, endpoint.user_token_id
                ));
            }
        }

        if self.session_retry_limit < -1 {
            problems.push(format!(
                "session retry limit {} must be -1, 0 or positive",
                self.session_retry_limit
            ));
        }
        if self.max_inflight_publish == 0 {
            problems.push("no publish request may be in flight".to_string());
        }
        if self.performance.max_inflight_messages == 0 {
            problems.push("no request may be in flight".to_string());
        }
        problems
    }
}

impl Config for ClientConfig {
    fn is_valid(&self) -> bool {
        let problems = self.problems();
        for problem in &problems {
            error!("Client configuration is invalid, {}", problem);
        }
        problems.is_empty()
    }

    fn application_name(&self) -> UAString {
        UAString::from(&self.application_name)
    }

    fn application_uri(&self) -> UAString {
        UAString::from(&self.application_uri)
    }

    fn product_uri(&self) -> UAString {
        UAString::from(&self.product_uri)
    }

    fn application_type(&self) -> ApplicationType {
        ApplicationType::Client
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl ClientConfig {
    pub fn new(application_name: impl Into<String>, application_uri: impl Into<String>) -> Self {
        ClientConfig {
            application_name: application_name.into(),
            application_uri: application_uri.into(),
            product_uri: String::new(),
            preferred_locales: Vec::new(),
            default_endpoint: String::new(),
            user_tokens: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            session_retry_limit: SessionRetryPolicy::DEFAULT_RETRY_LIMIT as i32,
            session_retry_initial: Duration::from_millis(
                SessionRetryPolicy::DEFAULT_INITIAL_SLEEP_MS,
            ),
            session_retry_max: Duration::from_millis(SessionRetryPolicy::DEFAULT_MAX_SLEEP_MS),
            keep_alive_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            acknowledge_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(60),
            max_inflight_publish: 2,
            session_timeout: 60_000,
            channel_lifetime: 3_600_000,
            decoding_options: DecodingOptions::default(),
            performance: Performance {
                ignore_clock_skew: false,
                recreate_monitored_items_chunk: 1000,
                max_inflight_messages: 20,
            },
            session_name: "Rust OPC UA Client".into(),
        }
    }

    /// The retry policy described by the retry settings.
    pub fn session_retry_policy(&self) -> SessionRetryPolicy {
        SessionRetryPolicy::from_limit(
            self.session_retry_limit,
            self.session_retry_initial,
            self.session_retry_max,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempdir::TempDir;

    use super::*;

    fn sample_config() -> ClientConfig {
        let mut config = ClientConfig::new("Sample client", "urn:SampleClient");
        config.user_tokens.insert(
            "sample_user".to_string(),
            ClientUserToken::user_pass("sample1", "sample1pwd"),
        );
        let mut endpoint = ClientEndpoint::new("opc.tcp://127.0.0.1:4855/");
        endpoint.user_token_id = "sample_user".into();
        config.endpoints.insert("sample".to_string(), endpoint);
        config.default_endpoint = "sample".into();
        config.keep_alive_interval = Duration::from_millis(2500);
        config
    }

    #[test]
    fn default_timings() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.acknowledge_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.publish_timeout, Duration::from_secs(60));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(10));
        assert_eq!(config.max_inflight_publish, 2);
        assert_eq!(config.channel_lifetime, 3_600_000);
    }

    #[test]
    fn sample_is_valid() {
        assert!(sample_config().is_valid());
        // No name or uri
        assert!(!ClientConfig::default().is_valid());
    }

    #[test]
    fn invalid_endpoints() {
        let mut config = sample_config();
        config.default_endpoint = "missing".into();
        assert!(!config.is_valid());

        let mut config = sample_config();
        let mut endpoint = ClientEndpoint::new("opc.tcp://127.0.0.1:4855/");
        endpoint.security_policy = "Basic256Sha256".into();
        config.endpoints.insert("secure".into(), endpoint);
        assert!(!config.is_valid());

        let mut config = sample_config();
        let mut endpoint = ClientEndpoint::new("opc.tcp://127.0.0.1:4855/");
        endpoint.user_token_id = "nobody".into();
        config.endpoints.insert("nobody".into(), endpoint);
        assert!(!config.is_valid());
    }

    #[test]
    fn problems_are_listed() {
        let mut config = sample_config();
        config.application_uri.clear();
        config.session_retry_limit = -2;
        let problems = config.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("application uri"));
        assert!(problems[1].contains("retry limit"));
    }

    #[test]
    fn reserved_user_token_id() {
        let mut config = sample_config();
        config.user_tokens.insert(
            ANONYMOUS_USER_TOKEN_ID.to_string(),
            ClientUserToken::user_pass("x", "y"),
        );
        assert!(!config.is_valid());
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new("client_config").unwrap();
        let mut path = PathBuf::from(dir.path());
        path.push("client.conf");

        let config = sample_config();
        config.save(&path).unwrap();
        let loaded = ClientConfig::load::<ClientConfig>(&path).unwrap();
        assert_eq!(config, loaded);
        assert_eq!(loaded.keep_alive_interval, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_config_not_saved() {
        let dir = TempDir::new("client_config").unwrap();
        let mut path = PathBuf::from(dir.path());
        path.push("client.conf");
        assert!(ClientConfig::default().save(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn retry_policy() {
        let mut config = sample_config();
        config.session_retry_limit = -1;
        assert_eq!(config.session_retry_policy().retry_limit(), None);
        config.session_retry_limit = 3;
        assert_eq!(config.session_retry_policy().retry_limit(), Some(3));
    }
}
