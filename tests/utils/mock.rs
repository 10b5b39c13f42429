// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! An in-process server. It replaces the TCP transport with channels so tests can script what
//! the server does, and records every request the client sends.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use opcua_client::{
    client::transport::{
        Connector, OutgoingMessage, Transport, TransportConfiguration, TransportPollResult,
        TransportState,
    },
    core::{comms::secure_channel::SecureChannel, supported_message::SupportedMessage},
    crypto::SECURITY_POLICY_NONE_URI,
    sync::{Mutex, RwLock},
    types::{
        ActivateSessionResponse, ByteString, ChannelSecurityToken, CloseSessionResponse,
        CreateMonitoredItemsResponse, CreateSessionResponse, CreateSubscriptionResponse,
        DataValue, DateTime, DeleteMonitoredItemsResponse, DeleteSubscriptionsResponse,
        EndpointDescription, Identifier, ModifyMonitoredItemsResponse,
        ModifySubscriptionResponse, MonitoredItemCreateResult, MonitoredItemModifyResult,
        NodeId, NotificationMessage, OpenSecureChannelResponse, PublishResponse, ReadRequest,
        ReadResponse, RepublishResponse, RequestHeader, ResponseHeader, ServiceFault,
        SetMonitoringModeResponse, SetPublishingModeResponse, SetTriggeringResponse, StatusCode,
        TransferResult, TransferSubscriptionsResponse, UAString, UserTokenPolicy, UserTokenType,
        VariableId,
    },
};

/// Node ids in namespace 2 the server treats specially when they are read.
pub const HOLD: &str = "hold";
pub const DENIED: &str = "denied";
pub const UNKNOWN: &str = "unknown";
pub const SESSION_FAULT: &str = "session_fault";

enum Reply {
    Response(u32, SupportedMessage),
    Close(StatusCode),
}

/// The server end of one connection.
struct MockConnection {
    requests: mpsc::UnboundedReceiver<(u32, SupportedMessage)>,
    replies: mpsc::UnboundedSender<Reply>,
}

struct MockTransport {
    state: TransportState,
    to_server: mpsc::UnboundedSender<(u32, SupportedMessage)>,
    from_server: mpsc::UnboundedReceiver<Reply>,
    closed: Option<StatusCode>,
}

impl MockTransport {
    async fn close(&mut self, status: StatusCode) -> TransportPollResult {
        let status = self.state.close(status).await;
        self.closed = Some(status);
        TransportPollResult::Closed(status)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn poll(&mut self) -> TransportPollResult {
        if let Some(status) = self.closed {
            return TransportPollResult::Closed(status);
        }
        tokio::select! {
            outgoing = self.state.wait_for_outgoing_message() => {
                match outgoing {
                    None => self.close(StatusCode::Good).await,
                    Some((SupportedMessage::CloseSecureChannelRequest(_), _)) => {
                        self.close(StatusCode::Good).await
                    }
                    Some((request, request_id)) => {
                        if self.to_server.send((request_id, request)).is_err() {
                            self.close(StatusCode::BadConnectionClosed).await
                        } else {
                            TransportPollResult::OutgoingMessageSent
                        }
                    }
                }
            }
            reply = self.from_server.recv() => {
                match reply {
                    Some(Reply::Response(request_id, response)) => {
                        self.state.complete_request(request_id, Ok(response));
                        TransportPollResult::IncomingMessage
                    }
                    Some(Reply::Close(status)) => self.close(status).await,
                    None => self.close(StatusCode::BadConnectionClosed).await,
                }
            }
        }
    }
}

/// Hands every new connection to the mock server.
pub struct MockConnector {
    connections: mpsc::UnboundedSender<MockConnection>,
    refuse: Arc<AtomicBool>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        _endpoint_url: &str,
    ) -> Result<Box<dyn Transport>, StatusCode> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(StatusCode::BadCommunicationError);
        }
        let (to_server, requests) = mpsc::unbounded_channel();
        let (replies, from_server) = mpsc::unbounded_channel();
        self.connections
            .send(MockConnection { requests, replies })
            .map_err(|_| StatusCode::BadCommunicationError)?;
        Ok(Box::new(MockTransport {
            state: TransportState::new(
                secure_channel,
                outgoing_recv,
                config.max_pending_incoming,
                config.max_inflight,
            ),
            to_server,
            from_server,
            closed: None,
        }))
    }
}

enum Control {
    Notify(u32, NotificationMessage),
    Retain(u32, NotificationMessage),
    OpenGate,
    Drop(StatusCode),
    FaultStalePublishes,
}

#[derive(Default)]
struct ServerState {
    requests: Vec<SupportedMessage>,
    gate_closed: bool,
    fail_transfers: bool,
    /// Authentication tokens of the live sessions
    sessions: HashSet<NodeId>,
    last_id: u32,
    deferred: Vec<(u32, SupportedMessage)>,
    publish_requests: VecDeque<(u32, RequestHeader)>,
    notifications: VecDeque<(u32, NotificationMessage)>,
    retained: HashMap<(u32, u32), NotificationMessage>,
}

fn respond(request_id: u32, response: impl Into<SupportedMessage>) -> Vec<Reply> {
    vec![Reply::Response(request_id, response.into())]
}

fn fault(request_id: u32, header: &RequestHeader, status: StatusCode) -> Vec<Reply> {
    respond(request_id, ServiceFault::new(header, status))
}

fn good<T>(items: &Option<Vec<T>>) -> Option<Vec<StatusCode>> {
    Some(vec![StatusCode::Good; items.as_ref().map_or(0, |i| i.len())])
}

impl ServerState {
    fn next_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }

    fn handle(&mut self, request_id: u32, request: SupportedMessage) -> Vec<Reply> {
        self.requests.push(request.clone());

        if let SupportedMessage::OpenSecureChannelRequest(r) = &request {
            return respond(
                request_id,
                OpenSecureChannelResponse {
                    response_header: ResponseHeader::new_good(&r.request_header),
                    server_protocol_version: 0,
                    security_token: ChannelSecurityToken {
                        channel_id: 1,
                        token_id: self.next_id(),
                        created_at: DateTime::now(),
                        revised_lifetime: r.requested_lifetime,
                    },
                    server_nonce: ByteString::null(),
                },
            );
        }
        if let SupportedMessage::CreateSessionRequest(r) = &request {
            if self.gate_closed {
                self.deferred.push((request_id, request));
                return Vec::new();
            }
            return self.create_session(request_id, &r.request_header);
        }

        let Some(header) = request.request_header().cloned() else {
            return Vec::new();
        };
        if !self.sessions.contains(&header.authentication_token) {
            return fault(request_id, &header, StatusCode::BadSessionIdInvalid);
        }

        match request {
            SupportedMessage::ActivateSessionRequest(_) => respond(
                request_id,
                ActivateSessionResponse {
                    response_header: ResponseHeader::new_good(&header),
                    server_nonce: ByteString::null(),
                    results: None,
                    diagnostic_infos: None,
                },
            ),
            SupportedMessage::CloseSessionRequest(_) => {
                self.sessions.remove(&header.authentication_token);
                respond(
                    request_id,
                    CloseSessionResponse {
                        response_header: ResponseHeader::new_good(&header),
                    },
                )
            }
            SupportedMessage::ReadRequest(r) => self.read(request_id, &header, &r),
            SupportedMessage::CreateSubscriptionRequest(r) => {
                let subscription_id = self.next_id();
                respond(
                    request_id,
                    CreateSubscriptionResponse {
                        response_header: ResponseHeader::new_good(&header),
                        subscription_id,
                        revised_publishing_interval: r.requested_publishing_interval,
                        revised_lifetime_count: r.requested_lifetime_count,
                        revised_max_keep_alive_count: r.requested_max_keep_alive_count,
                    },
                )
            }
            SupportedMessage::ModifySubscriptionRequest(r) => respond(
                request_id,
                ModifySubscriptionResponse {
                    response_header: ResponseHeader::new_good(&header),
                    revised_publishing_interval: r.requested_publishing_interval,
                    revised_lifetime_count: r.requested_lifetime_count,
                    revised_max_keep_alive_count: r.requested_max_keep_alive_count,
                },
            ),
            SupportedMessage::SetPublishingModeRequest(r) => respond(
                request_id,
                SetPublishingModeResponse {
                    response_header: ResponseHeader::new_good(&header),
                    results: good(&r.subscription_ids),
                    diagnostic_infos: None,
                },
            ),
            SupportedMessage::DeleteSubscriptionsRequest(r) => respond(
                request_id,
                DeleteSubscriptionsResponse {
                    response_header: ResponseHeader::new_good(&header),
                    results: good(&r.subscription_ids),
                    diagnostic_infos: None,
                },
            ),
            SupportedMessage::TransferSubscriptionsRequest(r) => {
                let status_code = if self.fail_transfers {
                    StatusCode::BadSubscriptionIdInvalid
                } else {
                    StatusCode::Good
                };
                let results = r
                    .subscription_ids
                    .iter()
                    .flatten()
                    .map(|_| TransferResult {
                        status_code,
                        available_sequence_numbers: None,
                    })
                    .collect();
                respond(
                    request_id,
                    TransferSubscriptionsResponse {
                        response_header: ResponseHeader::new_good(&header),
                        results: Some(results),
                        diagnostic_infos: None,
                    },
                )
            }
            SupportedMessage::CreateMonitoredItemsRequest(r) => {
                let results = r
                    .items_to_create
                    .iter()
                    .flatten()
                    .map(|item| MonitoredItemCreateResult {
                        status_code: StatusCode::Good,
                        monitored_item_id: self.next_id(),
                        revised_sampling_interval: item.requested_parameters.sampling_interval,
                        revised_queue_size: item.requested_parameters.queue_size,
                        filter_result: Default::default(),
                    })
                    .collect();
                respond(
                    request_id,
                    CreateMonitoredItemsResponse {
                        response_header: ResponseHeader::new_good(&header),
                        results: Some(results),
                        diagnostic_infos: None,
                    },
                )
            }
            SupportedMessage::ModifyMonitoredItemsRequest(r) => {
                let results = r
                    .items_to_modify
                    .iter()
                    .flatten()
                    .map(|item| MonitoredItemModifyResult {
                        status_code: StatusCode::Good,
                        revised_sampling_interval: item.requested_parameters.sampling_interval,
                        revised_queue_size: item.requested_parameters.queue_size,
                        filter_result: Default::default(),
                    })
                    .collect();
                respond(
                    request_id,
                    ModifyMonitoredItemsResponse {
                        response_header: ResponseHeader::new_good(&header),
                        results: Some(results),
                        diagnostic_infos: None,
                    },
                )
            }
            SupportedMessage::SetMonitoringModeRequest(r) => respond(
                request_id,
                SetMonitoringModeResponse {
                    response_header: ResponseHeader::new_good(&header),
                    results: good(&r.monitored_item_ids),
                    diagnostic_infos: None,
                },
            ),
            SupportedMessage::SetTriggeringRequest(r) => respond(
                request_id,
                SetTriggeringResponse {
                    response_header: ResponseHeader::new_good(&header),
                    add_results: good(&r.links_to_add),
                    add_diagnostic_infos: None,
                    remove_results: good(&r.links_to_remove),
                    remove_diagnostic_infos: None,
                },
            ),
            SupportedMessage::DeleteMonitoredItemsRequest(r) => respond(
                request_id,
                DeleteMonitoredItemsResponse {
                    response_header: ResponseHeader::new_good(&header),
                    results: good(&r.monitored_item_ids),
                    diagnostic_infos: None,
                },
            ),
            SupportedMessage::PublishRequest(_) => {
                self.publish_requests.push_back((request_id, header));
                self.flush_publish()
            }
            SupportedMessage::RepublishRequest(r) => {
                match self
                    .retained
                    .get(&(r.subscription_id, r.retransmit_sequence_number))
                {
                    Some(message) => respond(
                        request_id,
                        RepublishResponse {
                            response_header: ResponseHeader::new_good(&header),
                            notification_message: message.clone(),
                        },
                    ),
                    None => fault(request_id, &header, StatusCode::BadMessageNotAvailable),
                }
            }
            _ => fault(request_id, &header, StatusCode::BadServiceUnsupported),
        }
    }

    fn create_session(&mut self, request_id: u32, header: &RequestHeader) -> Vec<Reply> {
        let id = self.next_id();
        let authentication_token = NodeId::new(0, format!("token-{id}"));
        self.sessions.insert(authentication_token.clone());
        respond(
            request_id,
            CreateSessionResponse {
                response_header: ResponseHeader::new_good(header),
                session_id: NodeId::new(1, id),
                authentication_token,
                revised_session_timeout: 60000f64,
                server_nonce: ByteString::null(),
                server_certificate: ByteString::null(),
                server_endpoints: Some(vec![endpoint()]),
                server_software_certificates: None,
                server_signature: Default::default(),
                max_request_message_size: 0,
            },
        )
    }

    fn read(&mut self, request_id: u32, header: &RequestHeader, request: &ReadRequest) -> Vec<Reply> {
        let mut results = Vec::new();
        for node in request.nodes_to_read.iter().flatten() {
            let node_id = &node.node_id;
            if *node_id == NodeId::from(VariableId::Server_NamespaceArray) {
                results.push(DataValue::new_now(vec![
                    UAString::from("http://opcfoundation.org/UA/"),
                    UAString::from("urn:mock:server"),
                ]));
            } else if *node_id == NodeId::from(VariableId::Server_ServerStatus_State) {
                results.push(DataValue::new_now(0i32));
            } else if let Identifier::String(name) = &node_id.identifier {
                match name.as_ref() {
                    HOLD => return Vec::new(),
                    DENIED => return fault(request_id, header, StatusCode::BadUserAccessDenied),
                    UNKNOWN => return fault(request_id, header, StatusCode::BadNodeIdUnknown),
                    SESSION_FAULT => {
                        self.sessions.clear();
                        return fault(request_id, header, StatusCode::BadSessionIdInvalid);
                    }
                    _ => results.push(DataValue::new_now(1.5f64)),
                }
            } else {
                results.push(DataValue::new_now(1.5f64));
            }
        }
        respond(
            request_id,
            ReadResponse {
                response_header: ResponseHeader::new_good(header),
                results: Some(results),
                diagnostic_infos: None,
            },
        )
    }

    fn fault_stale_publish_requests(&mut self) -> Vec<Reply> {
        let (live, stale): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.publish_requests)
            .into_iter()
            .partition(|(_, header)| self.sessions.contains(&header.authentication_token));
        self.publish_requests = live;
        stale
            .into_iter()
            .flat_map(|(request_id, header)| {
                fault(request_id, &header, StatusCode::BadSessionIdInvalid)
            })
            .collect()
    }

    fn flush_publish(&mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        while !self.publish_requests.is_empty() && !self.notifications.is_empty() {
            let (Some((request_id, header)), Some((subscription_id, message))) = (
                self.publish_requests.pop_front(),
                self.notifications.pop_front(),
            ) else {
                break;
            };
            replies.extend(respond(
                request_id,
                PublishResponse {
                    response_header: ResponseHeader::new_good(&header),
                    subscription_id,
                    available_sequence_numbers: None,
                    more_notifications: false,
                    notification_message: message,
                    results: None,
                    diagnostic_infos: None,
                },
            ));
        }
        replies
    }

    fn control(&mut self, control: Control) -> Vec<Reply> {
        match control {
            Control::Notify(subscription_id, message) => {
                self.retained
                    .insert((subscription_id, message.sequence_number), message.clone());
                self.notifications.push_back((subscription_id, message));
                self.flush_publish()
            }
            Control::Retain(subscription_id, message) => {
                self.retained
                    .insert((subscription_id, message.sequence_number), message);
                Vec::new()
            }
            Control::OpenGate => {
                self.gate_closed = false;
                let deferred = std::mem::take(&mut self.deferred);
                deferred
                    .into_iter()
                    .flat_map(|(request_id, request)| match request.request_header() {
                        Some(header) => {
                            let header = header.clone();
                            self.create_session(request_id, &header)
                        }
                        None => Vec::new(),
                    })
                    .collect()
            }
            Control::Drop(status) => {
                self.publish_requests.clear();
                vec![Reply::Close(status)]
            }
            Control::FaultStalePublishes => self.fault_stale_publish_requests(),
        }
    }
}

/// The endpoint the mock server offers.
pub fn endpoint() -> EndpointDescription {
    EndpointDescription {
        endpoint_url: "opc.tcp://mock:4840/".into(),
        security_policy_uri: SECURITY_POLICY_NONE_URI.into(),
        user_identity_tokens: Some(vec![UserTokenPolicy {
            policy_id: "anonymous".into(),
            token_type: UserTokenType::Anonymous,
            issued_token_type: UAString::null(),
            issuer_endpoint_url: UAString::null(),
            security_policy_uri: UAString::null(),
        }]),
        ..Default::default()
    }
}

/// Handle for scripting the server and inspecting what it received.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
    control: mpsc::UnboundedSender<Control>,
    refuse: Arc<AtomicBool>,
}

impl MockServer {
    /// Start the server. While `gate_closed` is set, CreateSession requests get no response
    /// until [`MockServer::open_gate`] is called.
    pub fn start(gate_closed: bool) -> (MockServer, Arc<MockConnector>) {
        let state = Arc::new(Mutex::new(ServerState {
            gate_closed,
            ..Default::default()
        }));
        let refuse = Arc::new(AtomicBool::new(false));
        let (connections_send, connections) = mpsc::unbounded_channel();
        let (control, control_recv) = mpsc::unbounded_channel();
        tokio::spawn(run(state.clone(), connections, control_recv));
        (
            MockServer {
                state,
                control,
                refuse: refuse.clone(),
            },
            Arc::new(MockConnector {
                connections: connections_send,
                refuse,
            }),
        )
    }

    /// Send a notification message on the next publish response.
    pub fn notify(&self, subscription_id: u32, message: NotificationMessage) {
        let _ = self.control.send(Control::Notify(subscription_id, message));
    }

    /// Keep a notification message for republishing without sending it.
    pub fn retain(&self, subscription_id: u32, message: NotificationMessage) {
        let _ = self.control.send(Control::Retain(subscription_id, message));
    }

    pub fn open_gate(&self) {
        let _ = self.control.send(Control::OpenGate);
    }

    /// Drop the current connection with the status.
    pub fn drop_connection(&self, status: StatusCode) {
        let _ = self.control.send(Control::Drop(status));
    }

    /// Number of publish requests held for sessions that are gone.
    pub fn stale_publishes(&self) -> usize {
        let state = self.state.lock();
        state
            .publish_requests
            .iter()
            .filter(|(_, header)| !state.sessions.contains(&header.authentication_token))
            .count()
    }

    /// Answer the publish requests held for sessions that are gone with `BadSessionIdInvalid`.
    pub fn fault_stale_publishes(&self) {
        let _ = self.control.send(Control::FaultStalePublishes);
    }

    /// Refuse new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.state.lock().fail_transfers = fail;
    }

    /// Forget every session, as a server restart would.
    pub fn forget_sessions(&self) {
        self.state.lock().sessions.clear();
    }

    pub fn requests(&self) -> Vec<SupportedMessage> {
        self.state.lock().requests.clone()
    }

    /// Number of requests received that match the predicate.
    pub fn count(&self, f: impl Fn(&SupportedMessage) -> bool) -> usize {
        self.state.lock().requests.iter().filter(|r| f(r)).count()
    }

    /// Wait until the requests received satisfy the predicate. Panics after 5 seconds.
    pub async fn wait_for(&self, what: &str, f: impl Fn(&[SupportedMessage]) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if f(&self.state.lock().requests) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("Timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn run(
    state: Arc<Mutex<ServerState>>,
    mut connections: mpsc::UnboundedReceiver<MockConnection>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut current: Option<MockConnection> = None;
    loop {
        let next_request = async {
            match current.as_mut() {
                Some(c) => c.requests.recv().await,
                None => futures::future::pending().await,
            }
        };
        let replies = tokio::select! {
            connection = connections.recv() => {
                let Some(connection) = connection else { break };
                let mut state = state.lock();
                state.publish_requests.clear();
                state.deferred.clear();
                current = Some(connection);
                Vec::new()
            }
            c = control.recv() => {
                let Some(c) = c else { break };
                state.lock().control(c)
            }
            request = next_request => {
                match request {
                    Some((request_id, request)) => state.lock().handle(request_id, request),
                    None => {
                        current = None;
                        Vec::new()
                    }
                }
            }
        };
        if let Some(connection) = current.as_ref() {
            for reply in replies {
                let _ = connection.replies.send(reply);
            }
        }
    }
}
