// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use opcua_client::{
    client::{
        IdentityToken, ServiceFaultListener, SessionActivityListener, SessionInfo, SessionState,
    },
    core::supported_message::SupportedMessage,
    types::{
        Identifier, NodeId, ReadValueId, ServiceFault, StatusCode, TimestampsToReturn,
        VariableId,
    },
};

mod utils;

use utils::*;

fn read_of(name: &'static str) -> impl Fn(&SupportedMessage) -> bool {
    move |m: &SupportedMessage| match m {
        SupportedMessage::ReadRequest(r) => r.nodes_to_read.iter().flatten().any(|n| {
            matches!(&n.node_id.identifier, Identifier::String(s) if s.as_ref() == name)
        }),
        _ => false,
    }
}

fn is_create_session(m: &SupportedMessage) -> bool {
    matches!(m, SupportedMessage::CreateSessionRequest(_))
}

fn is_activate_session(m: &SupportedMessage) -> bool {
    matches!(m, SupportedMessage::ActivateSessionRequest(_))
}

#[tokio::test]
async fn requests_wait_for_active_session() {
    let (server, session, _handle) = session(true);

    let reader = session.clone();
    let read = tokio::spawn(async move {
        reader
            .read(
                &[ReadValueId::from(NodeId::new(2, "v1"))],
                TimestampsToReturn::Both,
                0.0,
            )
            .await
    });

    server
        .wait_for("create session", |r| r.iter().any(is_create_session))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!read.is_finished());
    assert_eq!(server.count(read_of("v1")), 0);
    assert_ne!(session.state(), SessionState::Active);

    server.open_gate();
    let values = read.await.unwrap().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(server.count(read_of("v1")), 1);
    assert_eq!(session.state(), SessionState::Active);
}

#[tokio::test]
async fn concurrent_waiters_share_one_session() {
    let (server, session, _handle) = session(true);

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.wait_for_active().await })
        })
        .collect();

    server
        .wait_for("create session", |r| r.iter().any(is_create_session))
        .await;
    server.open_gate();

    let mut session_ids = Vec::new();
    for waiter in waiters {
        let info = waiter.await.unwrap().unwrap();
        session_ids.push(info.session_id.clone());
    }
    assert!(session_ids.iter().all(|id| *id == session_ids[0]));
    assert_eq!(server.count(is_create_session), 1);
    assert_eq!(server.count(is_activate_session), 1);
}

#[tokio::test]
async fn namespace_table_is_read_on_activation() {
    let (_server, session, _handle) = active_session().await;
    let namespaces = session.namespace_table().unwrap();
    assert_eq!(namespaces.index_of("urn:mock:server"), Some(1));
}

#[tokio::test]
async fn disconnect_fails_pending_requests() {
    let (server, session, handle) = active_session().await;

    let reads: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .read(
                        &[ReadValueId::from(NodeId::new(2, HOLD))],
                        TimestampsToReturn::Both,
                        0.0,
                    )
                    .await
            })
        })
        .collect();
    server
        .wait_for("held reads", |r| {
            r.iter().filter(|m| read_of(HOLD)(*m)).count() == 3
        })
        .await;

    session.disconnect().await.unwrap();

    for read in reads {
        assert_eq!(read.await.unwrap(), Err(StatusCode::BadConnectionClosed));
    }
    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(
        server.count(|m| matches!(m, SupportedMessage::CloseSessionRequest(_))),
        1
    );
    assert_eq!(handle.await.unwrap(), StatusCode::Good);

    // A closed session stays closed
    assert!(!session.wait_for_connection().await);
}

struct PanickingListener;

impl ServiceFaultListener for PanickingListener {
    fn on_service_fault(&self, _fault: &ServiceFault) {
        panic!("listener failure");
    }
}

#[tokio::test]
async fn fault_listeners_called_in_order() {
    let (_server, session, _handle) = active_session().await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let first = calls.clone();
    session.add_fault_listener(move |fault: &ServiceFault| {
        first
            .lock()
            .unwrap()
            .push(("first", fault.response_header.service_result));
    });
    session.add_fault_listener(PanickingListener);
    let last = calls.clone();
    let handle = session.add_fault_listener(move |fault: &ServiceFault| {
        last.lock()
            .unwrap()
            .push(("last", fault.response_header.service_result));
    });

    for (name, status) in [
        (DENIED, StatusCode::BadUserAccessDenied),
        (UNKNOWN, StatusCode::BadNodeIdUnknown),
    ] {
        let result = session
            .read(
                &[ReadValueId::from(NodeId::new(2, name))],
                TimestampsToReturn::Both,
                0.0,
            )
            .await;
        assert_eq!(result, Err(status));
    }

    eventually("fault listeners", || calls.lock().unwrap().len() == 4).await;
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            ("first", StatusCode::BadUserAccessDenied),
            ("last", StatusCode::BadUserAccessDenied),
            ("first", StatusCode::BadNodeIdUnknown),
            ("last", StatusCode::BadNodeIdUnknown),
        ]
    );

    assert!(session.remove_listener(handle));
    assert!(!session.remove_listener(handle));
}

struct ActivityRecorder(Arc<Mutex<Vec<String>>>);

impl SessionActivityListener for ActivityRecorder {
    fn on_session_active(&self, session: &SessionInfo) {
        self.0
            .lock()
            .unwrap()
            .push(format!("active {}", session.session_id));
    }

    fn on_session_inactive(&self, session: &SessionInfo) {
        self.0
            .lock()
            .unwrap()
            .push(format!("inactive {}", session.session_id));
    }
}

#[tokio::test]
async fn activity_listener_sees_each_transition_once() {
    let (server, session, _handle) = session(true);
    let events = Arc::new(Mutex::new(Vec::new()));
    session.add_activity_listener(ActivityRecorder(events.clone()));

    server.open_gate();
    let info = session.wait_for_active().await.unwrap();
    session.disconnect().await.unwrap();

    eventually("inactive event", || events.lock().unwrap().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            format!("active {}", info.session_id),
            format!("inactive {}", info.session_id),
        ]
    );
}

#[tokio::test]
async fn session_fault_creates_new_session() {
    let (server, session, _handle) = active_session().await;
    let old_session = session.server_session_id().unwrap();

    let result = session
        .read(
            &[ReadValueId::from(NodeId::new(2, SESSION_FAULT))],
            TimestampsToReturn::Both,
            0.0,
        )
        .await;
    assert_eq!(result, Err(StatusCode::BadSessionIdInvalid));

    server
        .wait_for("second session", |r| {
            r.iter().filter(|m| is_activate_session(m)).count() == 2
        })
        .await;
    wait_for_state(&session, SessionState::Active).await;
    let new_session = session.server_session_id().unwrap();
    assert_ne!(old_session, new_session);

    // Requests work on the new session
    let values = session
        .read(
            &[ReadValueId::from(VariableId::Server_ServerStatus_State)],
            TimestampsToReturn::Both,
            0.0,
        )
        .await
        .unwrap();
    assert_eq!(values[0].value.as_ref().and_then(|v| v.as_i32()), Some(0));
}

#[tokio::test]
async fn reconnect_reactivates_session() {
    let (server, session, _handle) = active_session().await;
    let session_id = session.server_session_id().unwrap();

    server.drop_connection(StatusCode::BadConnectionClosed);
    server
        .wait_for("reactivation", |r| {
            r.iter().filter(|m| is_activate_session(m)).count() == 2
        })
        .await;
    wait_for_state(&session, SessionState::Active).await;

    assert_eq!(server.count(is_create_session), 1);
    assert_eq!(session.server_session_id(), Some(session_id));
}

#[tokio::test]
async fn reconnect_creates_session_the_server_forgot() {
    let (server, session, _handle) = active_session().await;
    let session_id = session.server_session_id().unwrap();

    server.forget_sessions();
    server.drop_connection(StatusCode::BadConnectionClosed);
    server
        .wait_for("new session", |r| {
            r.iter().filter(|m| is_create_session(m)).count() == 2
        })
        .await;
    wait_for_state(&session, SessionState::Active).await;

    assert_ne!(session.server_session_id(), Some(session_id));
}

#[tokio::test]
async fn event_loop_gives_up_after_retry_limit() {
    let (server, connector) = MockServer::start(false);
    server.refuse_connections(true);
    let (session, event_loop) = client(connector)
        .new_session_from_endpoint(endpoint(), IdentityToken::Anonymous)
        .unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), event_loop.run())
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BadCommunicationError);
    assert_eq!(session.state(), SessionState::Inactive);
}
