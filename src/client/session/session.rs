// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::{
    client::{
        retry::SessionRetryPolicy,
        transport::{AsyncSecureChannel, Connector, TransportConfiguration},
        ClientConfig,
    },
    core::supported_message::SupportedMessage,
    sync::{Mutex, RwLock},
    types::{
        ApplicationDescription, DecodingOptions, NamespaceTable, NodeId, RequestHeader,
        ServiceFault, StatusCode, UAString,
    },
};

use super::{
    initializer::{NamespaceTableInitializer, SessionInitializer},
    listeners::{
        Dispatch, ListenerHandle, Listeners, ServiceFaultListener, SessionActivityListener,
    },
    services::subscriptions::state::SubscriptionState,
    session_debug, session_warn, ConnectionInfo, SessionAttributes, SessionEventLoop, SessionInfo,
};

/// The lifecycle of a session. Service calls are only sent while the session is `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and no attempt to make one.
    Inactive,
    /// Waiting to (re)create the session, possibly backing off after a failed attempt.
    CreatingWait,
    /// CreateSession has been sent.
    Creating,
    /// ActivateSession has been sent for a new session.
    Activating,
    /// Reactivating an existing session on a new channel, or moving its subscriptions over.
    Transferring,
    /// Running session initializers.
    Initializing,
    /// The session is usable.
    Active,
    /// The session is being closed.
    Closing,
}

lazy_static! {
    static ref NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);
}

tokio::task_local! {
    /// Set while the session is being established or closed. Requests made in this scope are
    /// sent regardless of the session state.
    static BYPASS_GATE: ();
}

/// An OPC-UA session. This session provides methods for all supported services that require an open session.
///
/// The session does nothing unless its [`SessionEventLoop`] is polled. Service calls made before
/// the session is active wait for it to become active, for up to the request timeout.
pub struct Session {
    pub(super) channel: AsyncSecureChannel,
    pub(super) state_watch_rx: tokio::sync::watch::Receiver<SessionState>,
    pub(super) state_watch_tx: tokio::sync::watch::Sender<SessionState>,
    pub(super) auth_token: Arc<ArcSwap<NodeId>>,
    pub(super) internal_session_id: AtomicU32,
    pub(super) session_info: ArcSwapOption<SessionInfo>,
    pub(super) connection_info: ConnectionInfo,
    pub(super) session_name: UAString,
    pub(super) application_description: ApplicationDescription,
    pub(super) request_timeout: Duration,
    pub(super) publish_timeout: Duration,
    pub(super) recreate_monitored_items_chunk: usize,
    pub(super) session_timeout: f64,
    pub(super) max_inflight_publish: usize,
    pub(super) subscription_state: Mutex<SubscriptionState>,
    pub(super) trigger_publish_tx: tokio::sync::watch::Sender<Instant>,
    pub(super) recreate_session: tokio::sync::Notify,
    pub(super) event_loop_running: AtomicBool,
    pub(super) listeners: Listeners,
    initializers: RwLock<Vec<Arc<dyn SessionInitializer>>>,
    attributes: SessionAttributes,
    closed: AtomicBool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        connection_info: ConnectionInfo,
        session_name: UAString,
        application_description: ApplicationDescription,
        session_retry_policy: SessionRetryPolicy,
        decoding_options: DecodingOptions,
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> (Arc<Self>, SessionEventLoop) {
        let auth_token: Arc<ArcSwap<NodeId>> = Default::default();
        let (state_watch_tx, state_watch_rx) =
            tokio::sync::watch::channel(SessionState::Inactive);
        let (trigger_publish_tx, trigger_publish_rx) = tokio::sync::watch::channel(Instant::now());

        let session = Arc::new(Session {
            channel: AsyncSecureChannel::new(
                connection_info.endpoint.clone(),
                decoding_options,
                config.performance.ignore_clock_skew,
                auth_token.clone(),
                TransportConfiguration {
                    max_pending_incoming: 5,
                    max_inflight: config.performance.max_inflight_messages,
                    send_buffer_size: config.decoding_options.max_chunk_size,
                    recv_buffer_size: config.decoding_options.max_incoming_chunk_size,
                    max_message_size: config.decoding_options.max_message_size,
                    max_chunk_count: config.decoding_options.max_chunk_count,
                    connect_timeout: config.connect_timeout,
                    acknowledge_timeout: config.acknowledge_timeout,
                },
                connector,
                config.channel_lifetime,
                config.request_timeout,
            ),
            internal_session_id: AtomicU32::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)),
            state_watch_rx,
            state_watch_tx,
            auth_token,
            session_info: ArcSwapOption::empty(),
            connection_info,
            session_name,
            application_description,
            request_timeout: config.request_timeout,
            session_timeout: config.session_timeout as f64,
            publish_timeout: config.publish_timeout,
            max_inflight_publish: config.max_inflight_publish.max(1),
            recreate_monitored_items_chunk: config.performance.recreate_monitored_items_chunk.max(1),
            subscription_state: Mutex::new(SubscriptionState::new()),
            trigger_publish_tx,
            recreate_session: tokio::sync::Notify::new(),
            event_loop_running: AtomicBool::new(false),
            listeners: Listeners::new(),
            initializers: RwLock::new(vec![Arc::new(NamespaceTableInitializer)]),
            attributes: SessionAttributes::default(),
            closed: AtomicBool::new(false),
        });

        (
            session.clone(),
            SessionEventLoop::new(
                session,
                session_retry_policy,
                trigger_publish_rx,
                config.keep_alive_interval,
            ),
        )
    }

    /// Send a message and wait for response, using the default configured timeout.
    pub(super) async fn send(
        &self,
        request: impl Into<SupportedMessage>,
    ) -> Result<SupportedMessage, StatusCode> {
        self.send_with_timeout(request, self.request_timeout).await
    }

    /// Send a message once the session is active and wait for the response. Faults in the
    /// response are passed on to the fault listeners before the response is returned.
    pub(super) async fn send_with_timeout(
        &self,
        request: impl Into<SupportedMessage>,
        timeout: Duration,
    ) -> Result<SupportedMessage, StatusCode> {
        let mut request = request.into();
        self.wait_until_sendable().await?;

        // The session may have been recreated while the request waited
        let sent_with = self.auth_token.load_full();
        if let Some(header) = request.request_header_mut() {
            header.authentication_token = NodeId::clone(&sent_with);
        }

        let response = self.channel.send(request, timeout).await?;
        self.process_response_fault(&response, &sent_with);
        Ok(response)
    }

    /// Create a request header with the default timeout.
    pub(super) fn make_request_header(&self) -> RequestHeader {
        self.channel.make_request_header(self.request_timeout)
    }

    /// Run `fut` with requests bypassing the wait for an active session.
    pub(super) async fn bypass_gate<F: std::future::Future>(fut: F) -> F::Output {
        BYPASS_GATE.scope((), fut).await
    }

    async fn wait_until_sendable(&self) -> Result<(), StatusCode> {
        if BYPASS_GATE.try_with(|_| ()).is_ok() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(StatusCode::BadSessionClosed);
        }

        let mut rx = self.state_watch_rx.clone();
        let res = tokio::time::timeout(
            self.request_timeout,
            rx.wait_for(|s| *s == SessionState::Active || self.is_closed()),
        )
        .await
        .map(|r| r.is_ok());

        match res {
            Err(_) => {
                session_debug!(self, "Timed out waiting for the session to become active");
                Err(StatusCode::BadTimeout)
            }
            Ok(false) => Err(StatusCode::BadSessionClosed),
            Ok(true) if self.is_closed() => Err(StatusCode::BadSessionClosed),
            Ok(true) => Ok(()),
        }
    }

    /// Passes a fault on to the listeners. A session fault drives the session to be created
    /// again, unless the request was made on a session that has been replaced since.
    fn process_response_fault(&self, response: &SupportedMessage, sent_with: &NodeId) {
        let fault = match response {
            SupportedMessage::ServiceFault(fault) => Some(fault.as_ref().clone()),
            response => response
                .response_header()
                .filter(|h| h.service_result.is_bad())
                .map(|h| ServiceFault {
                    response_header: h.clone(),
                }),
        };
        let Some(fault) = fault else {
            return;
        };

        let status = fault.response_header.service_result;
        self.listeners.dispatch(Dispatch::ServiceFault(fault));

        if !status.is_session_fault() || self.state() != SessionState::Active {
            return;
        }
        if **self.auth_token.load() != *sent_with {
            session_debug!(
                self,
                "Ignoring {} for a request made on a previous session",
                status
            );
            return;
        }
        session_warn!(self, "Server reported {}, recreating the session", status);
        self.set_state(SessionState::CreatingWait);
        self.recreate_session.notify_one();
    }

    /// Move to a new state. Activity listeners are queued a notification for every transition
    /// into and out of `Active`. Once the session is closed only `Closing` and `Inactive` are
    /// accepted.
    pub(super) fn set_state(&self, state: SessionState) {
        let closed = self.is_closed();
        self.state_watch_tx.send_if_modified(|current| {
            if *current == state
                || closed && !matches!(state, SessionState::Closing | SessionState::Inactive)
            {
                return false;
            }
            let old = std::mem::replace(current, state);
            session_debug!(self, "Session state {:?} -> {:?}", old, state);

            if let Some(info) = self.session_info.load_full() {
                if state == SessionState::Active {
                    self.listeners.dispatch(Dispatch::SessionActive(info));
                } else if old == SessionState::Active {
                    self.listeners.dispatch(Dispatch::SessionInactive(info));
                }
            }
            true
        });
    }

    /// Store a newly created session, replacing the previous one.
    pub(super) fn set_session_info(&self, info: SessionInfo) {
        self.auth_token
            .store(Arc::new(info.authentication_token.clone()));
        self.session_info.store(Some(Arc::new(info)));
    }

    /// Forget the server side session, so the next connection creates a new one.
    pub(crate) fn reset(&self) {
        self.session_info.store(None);
        self.auth_token.store(Arc::new(NodeId::null()));
        self.attributes.clear();
        self.internal_session_id.store(
            NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub(super) fn initializers(&self) -> Vec<Arc<dyn SessionInitializer>> {
        trace_read_lock!(self.initializers).clone()
    }

    /// Wait until the session is closed. Returns immediately if it already is.
    pub(super) async fn wait_for_close(&self) {
        let mut rx = self.state_watch_rx.clone();
        let _ = rx.wait_for(|_| self.is_closed()).await;
    }

    /// The internal ID of the session, used to keep track of multiple sessions in the same program.
    pub fn session_id(&self) -> u32 {
        self.internal_session_id.load(Ordering::Relaxed)
    }

    /// The id the server assigned to the current session, if there is one.
    pub fn server_session_id(&self) -> Option<NodeId> {
        self.session_info.load().as_ref().map(|i| i.session_id.clone())
    }

    /// The current server side session, if there is one.
    pub fn session_info(&self) -> Option<Arc<SessionInfo>> {
        self.session_info.load_full()
    }

    /// The current state of the session.
    pub fn state(&self) -> SessionState {
        *self.state_watch_rx.borrow()
    }

    /// A receiver observing every state change of the session.
    pub fn state_receiver(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.state_watch_rx.clone()
    }

    /// Wait for the session to become active, for up to the request timeout, and return it.
    /// Any number of callers may wait at once; they all share the connection attempt made by the
    /// event loop and receive the same session.
    pub async fn wait_for_active(&self) -> Result<Arc<SessionInfo>, StatusCode> {
        self.wait_until_sendable().await?;
        self.session_info
            .load_full()
            .ok_or(StatusCode::BadSessionClosed)
    }

    /// Convenience method to wait for a connection to the server, without a timeout. Returns
    /// false if the session is closed instead.
    ///
    /// You should also monitor the session event loop. If it ends, this method will never return.
    pub async fn wait_for_connection(&self) -> bool {
        let mut rx = self.state_watch_rx.clone();
        let changed = rx
            .wait_for(|s| *s == SessionState::Active || self.is_closed())
            .await
            .is_ok();
        changed && !self.is_closed()
    }

    /// Values attached to the session, such as the [`NamespaceTable`] of the server.
    pub fn attributes(&self) -> &SessionAttributes {
        &self.attributes
    }

    /// The namespace table read from the server when the session was activated.
    pub fn namespace_table(&self) -> Option<Arc<NamespaceTable>> {
        self.attributes.get::<NamespaceTable>()
    }

    /// Register a listener for service faults. Faults are delivered in the order they were
    /// received.
    pub fn add_fault_listener(&self, listener: impl ServiceFaultListener + 'static) -> ListenerHandle {
        self.listeners.add_fault_listener(Arc::new(listener))
    }

    /// Register a listener for the session becoming active or inactive.
    pub fn add_activity_listener(
        &self,
        listener: impl SessionActivityListener + 'static,
    ) -> ListenerHandle {
        self.listeners.add_activity_listener(Arc::new(listener))
    }

    /// Remove a fault or activity listener. Returns false if it was not registered.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    /// Add an initializer to run whenever the session becomes active. It applies from the next
    /// activation on.
    pub fn add_initializer(&self, initializer: impl SessionInitializer + 'static) {
        let mut initializers = trace_write_lock!(self.initializers);
        initializers.push(Arc::new(initializer));
    }

    /// Disconnect from the server and wait until disconnected. The session is closed on the
    /// server if possible, the channel is closed and every pending request fails with
    /// `BadConnectionClosed`. A closed session cannot be reopened.
    pub async fn disconnect(&self) -> Result<(), StatusCode> {
        self.closed.store(true, Ordering::Relaxed);
        self.set_state(SessionState::Closing);

        if self.channel.is_connected() && self.session_info.load().is_some() {
            if let Err(e) = Self::bypass_gate(self.close_session()).await {
                session_debug!(self, "CloseSession failed, ignoring: {}", e);
            }
        }
        self.channel.close_channel().await;

        if self.event_loop_running.load(Ordering::Relaxed) {
            let mut rx = self.state_watch_rx.clone();
            let wait = rx.wait_for(|s| *s == SessionState::Inactive);
            if tokio::time::timeout(self.request_timeout, wait).await.is_err() {
                session_warn!(self, "Event loop did not stop in time, forcing the session inactive");
                self.set_state(SessionState::Inactive);
            }
        } else {
            self.set_state(SessionState::Inactive);
        }

        Ok(())
    }
}
