// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use opcua_client::{
    client::{Client, ClientBuilder, IdentityToken, Session, SessionState},
    types::{DataValue, DateTime, MonitoredItemNotification, NotificationMessage, StatusCode},
};
use tokio::task::JoinHandle;

mod mock;

pub use mock::{endpoint, MockConnector, MockServer, DENIED, HOLD, SESSION_FAULT, UNKNOWN};

pub fn client(connector: Arc<MockConnector>) -> Client {
    ClientBuilder::new()
        .application_name("integration client")
        .application_uri("urn:integration:client")
        .session_retry_limit(3)
        .session_retry_initial(Duration::from_millis(50))
        .request_timeout(Duration::from_secs(5))
        .publish_timeout(Duration::from_secs(30))
        .connector(connector)
        .client()
        .unwrap()
}

/// Start a server and a session against it with its event loop running.
pub fn session(gate_closed: bool) -> (MockServer, Arc<Session>, JoinHandle<StatusCode>) {
    opcua_client::console_logging::init_with_default("warn");
    let (server, connector) = MockServer::start(gate_closed);
    let client = client(connector);
    let (session, event_loop) = client
        .new_session_from_endpoint(endpoint(), IdentityToken::Anonymous)
        .unwrap();
    (server, session, event_loop.spawn())
}

/// Start a server and wait until a session against it is active.
pub async fn active_session() -> (MockServer, Arc<Session>, JoinHandle<StatusCode>) {
    let (server, session, handle) = session(false);
    tokio::time::timeout(Duration::from_secs(5), session.wait_for_connection())
        .await
        .expect("session did not become active");
    (server, session, handle)
}

pub async fn wait_for_state(session: &Session, state: SessionState) {
    let mut rx = session.state_receiver();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for the session state")
        .unwrap();
}

/// Wait until `f` holds, checking every 10ms. Panics after 5 seconds.
pub async fn eventually(what: &str, f: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !f() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A data change notification with one double value for each client handle.
pub fn data_change(sequence_number: u32, values: &[(u32, f64)]) -> NotificationMessage {
    NotificationMessage::data_change(
        sequence_number,
        DateTime::now(),
        values
            .iter()
            .map(|(client_handle, value)| MonitoredItemNotification {
                client_handle: *client_handle,
                value: DataValue::new_now(*value),
            })
            .collect(),
        Vec::new(),
    )
}
