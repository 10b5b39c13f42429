// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{future::Future, sync::Arc};

use tokio::{pin, select};

use crate::{
    client::transport::{SecureChannelEventLoop, TransportPollResult},
    types::{NodeId, StatusCode},
};

use super::{session::SessionState, session_debug, session_warn, Session};

/// This struct manages the task of connecting to the server.
/// It will only make a single attempt, so whatever is calling it is responsible for retries.
pub(super) struct SessionConnector {
    inner: Arc<Session>,
}

/// When the session connects to the server, this describes
/// how that happened, whether a new session was created, or an old session was reactivated.
#[derive(Debug, Clone)]
pub enum SessionConnectMode {
    /// A new session was created with session ID given by the inner [`NodeId`]
    NewSession(NodeId),
    /// An old session was reactivated with session ID given by the inner [`NodeId`]
    ReactivatedSession(NodeId),
    /// A new session with session ID given by the inner [`NodeId`] replaced the previous one,
    /// and the subscriptions of the previous session were moved to it.
    TransferredSession(NodeId),
}

/// Poll the channel until `fut` completes. Requests made by `fut` are only sent while the
/// channel is polled.
async fn drive<T>(
    event_loop: &mut SecureChannelEventLoop,
    fut: impl Future<Output = Result<T, StatusCode>>,
) -> Result<T, StatusCode> {
    pin!(fut);
    loop {
        select! {
            r = event_loop.poll() => {
                if let TransportPollResult::Closed(c) = r {
                    return Err(if c.is_good() { StatusCode::BadConnectionClosed } else { c });
                }
            },
            r = &mut fut => return r,
        }
    }
}

impl SessionConnector {
    pub fn new(session: Arc<Session>) -> Self {
        Self { inner: session }
    }

    /// Open a channel, then create or reactivate the session on it.
    pub async fn try_connect(
        &self,
    ) -> Result<(SecureChannelEventLoop, SessionConnectMode), StatusCode> {
        Session::bypass_gate(self.connect_and_activate()).await
    }

    /// Create a new session on a channel that is still open, after the server rejected the
    /// current one.
    pub async fn recreate(
        &self,
        event_loop: &mut SecureChannelEventLoop,
    ) -> Result<SessionConnectMode, StatusCode> {
        self.inner.reset();
        Session::bypass_gate(drive(event_loop, self.ensure_and_activate_session())).await
    }

    async fn connect_and_activate(
        &self,
    ) -> Result<(SecureChannelEventLoop, SessionConnectMode), StatusCode> {
        let mut event_loop = self.inner.channel.connect_no_retry().await?;

        let res = drive(&mut event_loop, self.ensure_and_activate_session()).await;

        match res {
            Ok(mode) => Ok((event_loop, mode)),
            Err(e) => {
                self.inner.channel.close_channel().await;

                loop {
                    if matches!(event_loop.poll().await, TransportPollResult::Closed(_)) {
                        break;
                    }
                }

                Err(e)
            }
        }
    }

    async fn ensure_and_activate_session(&self) -> Result<SessionConnectMode, StatusCode> {
        let session = &self.inner;

        let mode = match session.session_info() {
            Some(info) => {
                session.set_state(SessionState::Transferring);
                match session.activate_session().await {
                    Ok(()) => SessionConnectMode::ReactivatedSession(info.session_id.clone()),
                    Err(status_code) => {
                        info!(
                            "{} Session activation failed on reconnect, error = {}, creating a new session",
                            session.session_id(),
                            status_code
                        );
                        session.reset();
                        self.create_and_activate().await?
                    }
                }
            }
            None => self.create_and_activate().await?,
        };

        session.set_state(SessionState::Initializing);
        for initializer in session.initializers() {
            if let Err(e) = initializer.initialize(session).await {
                session_warn!(
                    session,
                    "Session initializer {} failed: {}",
                    initializer.name(),
                    e
                );
            }
        }

        Ok(mode)
    }

    /// Create and activate a new session, taking over the subscriptions of the previous one
    /// if there are any.
    async fn create_and_activate(&self) -> Result<SessionConnectMode, StatusCode> {
        let session = &self.inner;

        session.set_state(SessionState::Creating);
        let info = session.create_session().await?;
        let session_id = info.session_id.clone();
        session.set_session_info(info);

        session.set_state(SessionState::Activating);
        session.activate_session().await?;

        if session.has_subscriptions() {
            session.set_state(SessionState::Transferring);
            session.transfer_subscriptions_from_old_session().await;
            session_debug!(session, "Subscriptions moved to session {}", session_id);
            Ok(SessionConnectMode::TransferredSession(session_id))
        } else {
            Ok(SessionConnectMode::NewSession(session_id))
        }
    }
}
