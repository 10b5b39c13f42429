// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The session layer: the session state machine, its event loop, the services that need an
//! open session and the listeners notified of faults and activity.

mod attributes;
mod client;
mod connect;
mod event_loop;
mod initializer;
mod listeners;
mod services;
mod session;

use crate::{
    core::supported_message::SupportedMessage,
    types::{
        ByteString, EndpointDescription, NodeId, ResponseHeader, StatusCode, UAString,
        UserTokenPolicy,
    },
};

use super::IdentityToken;

pub use attributes::SessionAttributes;
pub use client::Client;
pub use connect::SessionConnectMode;
pub use event_loop::{SessionActivity, SessionEventLoop, SessionPollResult};
pub use initializer::{NamespaceTableInitializer, SessionInitializer};
pub use listeners::{ListenerHandle, ServiceFaultListener, SessionActivityListener};
pub use services::subscriptions::{
    event_loop::SubscriptionActivity, DataChangeCallback, EventCallback, MonitoredItem,
    OnSubscriptionNotification, Subscription, SubscriptionCallbacks,
};
pub use session::{Session, SessionState};

macro_rules! session_warn {
    ($session: expr, $($arg:tt)*) =>  {
        warn!("{} {}", $session.session_id(), format!($($arg)*))
    }
}
pub(crate) use session_warn;

macro_rules! session_error {
    ($session: expr, $($arg:tt)*) =>  {
        error!("{} {}", $session.session_id(), format!($($arg)*))
    }
}
pub(crate) use session_error;

macro_rules! session_debug {
    ($session: expr, $($arg:tt)*) =>  {
        debug!("{} {}", $session.session_id(), format!($($arg)*))
    }
}
pub(crate) use session_debug;

macro_rules! session_trace {
    ($session: expr, $($arg:tt)*) =>  {
        trace!("{} {}", $session.session_id(), format!($($arg)*))
    }
}
pub(crate) use session_trace;

/// Takes the response out of `$variant` and checks its service result. A fault or a response
/// of any other kind returns the matching error from the enclosing function.
macro_rules! expect_response {
    ($response: expr, $variant: ident) => {
        match $response {
            $crate::core::supported_message::SupportedMessage::$variant(response) => {
                $crate::client::session::process_service_result(&response.response_header)?;
                response
            }
            other => return Err($crate::client::session::process_unexpected_response(other)),
        }
    };
}
pub(crate) use expect_response;

/// Everything the client needs to connect a session: the endpoint, who to authenticate as and
/// the locales to ask for.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The endpoint
    pub endpoint: EndpointDescription,
    /// User identity token
    pub user_identity_token: IdentityToken,
    /// Preferred language locales
    pub preferred_locales: Vec<String>,
}

impl From<EndpointDescription> for ConnectionInfo {
    fn from(value: EndpointDescription) -> Self {
        Self {
            endpoint: value,
            user_identity_token: IdentityToken::Anonymous,
            preferred_locales: Vec::new(),
        }
    }
}

impl From<(EndpointDescription, IdentityToken)> for ConnectionInfo {
    fn from(value: (EndpointDescription, IdentityToken)) -> Self {
        Self {
            endpoint: value.0,
            user_identity_token: value.1,
            preferred_locales: Vec::new(),
        }
    }
}

/// The session as the server created it. A new value replaces the old one whenever the
/// session is recreated.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Server assigned session id
    pub session_id: NodeId,
    /// Token sent in the header of every request on this session
    pub authentication_token: NodeId,
    /// Name the session was created with
    pub session_name: UAString,
    /// Session timeout in milliseconds, as revised by the server
    pub revised_session_timeout: f64,
    /// Largest request the server accepts, 0 for no limit
    pub max_request_message_size: u32,
    pub server_certificate: ByteString,
    pub server_nonce: ByteString,
    /// Identity token policies the server offers for this endpoint
    pub user_token_policies: Vec<UserTokenPolicy>,
}

/// Process the service result, i.e. where the request "succeeded" but the response
/// contains a failure status code.
pub(crate) fn process_service_result(response_header: &ResponseHeader) -> Result<(), StatusCode> {
    if response_header.service_result.is_bad() {
        info!(
            "Received a bad service result {} from the request",
            response_header.service_result
        );
        Err(response_header.service_result)
    } else {
        Ok(())
    }
}

pub(crate) fn process_unexpected_response(response: SupportedMessage) -> StatusCode {
    match response {
        SupportedMessage::ServiceFault(service_fault) => {
            error!(
                "Received a service fault of {} for the request",
                service_fault.response_header.service_result
            );
            service_fault.response_header.service_result
        }
        _ => {
            error!("Received an unexpected response to the request");
            StatusCode::BadUnknownResponse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseSessionResponse, RequestHeader, ServiceFault};

    #[test]
    fn service_result() {
        let mut header = ResponseHeader::new_good(&RequestHeader::dummy());
        assert!(process_service_result(&header).is_ok());
        header.service_result = StatusCode::BadNodeIdUnknown;
        assert_eq!(
            process_service_result(&header),
            Err(StatusCode::BadNodeIdUnknown)
        );
    }

    #[test]
    fn unexpected_response() {
        let fault = ServiceFault::new(&RequestHeader::dummy(), StatusCode::BadSessionClosed);
        assert_eq!(
            process_unexpected_response(fault.into()),
            StatusCode::BadSessionClosed
        );
        let response = CloseSessionResponse {
            response_header: ResponseHeader::new_good(&RequestHeader::dummy()),
        };
        assert_eq!(
            process_unexpected_response(response.into()),
            StatusCode::BadUnknownResponse
        );
    }
}
