// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};

use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::sync::watch;

use crate::{
    client::{
        retry::{ExponentialBackoff, SessionRetryPolicy},
        session::{session_debug, session_error, session_warn},
        transport::{SecureChannelEventLoop, TransportPollResult},
    },
    types::{ReadValueId, StatusCode, TimestampsToReturn, VariableId},
};

use super::{
    connect::{SessionConnectMode, SessionConnector},
    services::subscriptions::event_loop::{SubscriptionActivity, SubscriptionEventLoop},
    session::SessionState,
    Session,
};

/// Events yielded by [`SessionEventLoop::enter`]. Applications can watch these for
/// disconnects, reconnects and failed keep alives.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionPollResult {
    /// Traffic on the transport.
    Transport(TransportPollResult),
    /// The connection dropped with this status.
    ConnectionLost(StatusCode),
    /// An attempt to connect or to recreate the session failed.
    ReconnectFailed(StatusCode),
    /// A session is active again, how it got there is in the [`SessionConnectMode`].
    Reconnected(SessionConnectMode),
    /// Keep alive outcome.
    SessionActivity(SessionActivity),
    /// Publish and subscription bookkeeping.
    Subscription(SubscriptionActivity),
    /// A connection attempt is starting.
    BeginConnect,
}

/// The streams that run while a session is up.
struct Running {
    channel: SecureChannelEventLoop,
    keep_alive: BoxStream<'static, SessionActivity>,
    subscriptions: BoxStream<'static, SubscriptionActivity>,
}

enum LoopState {
    Idle,
    Connecting {
        connector: SessionConnector,
        backoff: ExponentialBackoff,
        next_attempt: Instant,
    },
    Running(Running),
}

/// `None` ends the stream, an error ends it with a failure.
type Step = Result<Option<(SessionPollResult, LoopState)>, StatusCode>;

/// Drives the session. Nothing is sent or received unless this is polled, either through
/// [`run`](Self::run), [`spawn`](Self::spawn) or the stream from [`enter`](Self::enter).
///
/// A lost connection is reestablished following the retry policy and a session the server no
/// longer knows is created again.
#[must_use = "The session event loop must be started for the session to work"]
pub struct SessionEventLoop {
    inner: Arc<Session>,
    trigger_publish_recv: watch::Receiver<Instant>,
    retry: SessionRetryPolicy,
    keep_alive_interval: Duration,
}

impl Drop for SessionEventLoop {
    fn drop(&mut self) {
        self.inner.event_loop_running.store(false, Ordering::Relaxed);
        self.inner.set_state(SessionState::Inactive);
    }
}

impl SessionEventLoop {
    pub(crate) fn new(
        inner: Arc<Session>,
        retry: SessionRetryPolicy,
        trigger_publish_recv: watch::Receiver<Instant>,
        keep_alive_interval: Duration,
    ) -> Self {
        Self {
            inner,
            retry,
            trigger_publish_recv,
            keep_alive_interval,
        }
    }

    /// Polls the event loop until the session is disconnected, returning `Good`, or until
    /// reconnecting is given up, returning the last error.
    pub async fn run(self) -> StatusCode {
        let stream = self.enter();
        tokio::pin!(stream);
        loop {
            match stream.try_next().await {
                Ok(Some(_)) => {}
                Ok(None) => return StatusCode::Good,
                Err(e) => return e,
            }
        }
    }

    /// [`run`](Self::run) on a new tokio task.
    pub fn spawn(self) -> tokio::task::JoinHandle<StatusCode> {
        tokio::task::spawn(self.run())
    }

    /// Starts the event loop. The stream ends with `None` after a disconnect and with an
    /// error once the retry policy gives up.
    pub fn enter(self) -> impl Stream<Item = Result<SessionPollResult, StatusCode>> {
        futures::stream::try_unfold((self, LoopState::Idle), |(slf, state)| async move {
            let step = match state {
                LoopState::Idle => slf.begin_connect(),
                LoopState::Connecting {
                    connector,
                    backoff,
                    next_attempt,
                } => slf.try_connect(connector, backoff, next_attempt).await,
                LoopState::Running(running) => slf.poll_running(running).await,
            }?;
            Ok(step.map(|(event, state)| (event, (slf, state))))
        })
    }

    fn stop(&self) -> Step {
        self.inner.set_state(SessionState::Inactive);
        Ok(None)
    }

    fn begin_connect(&self) -> Step {
        self.inner.listeners.start();
        self.inner.event_loop_running.store(true, Ordering::Relaxed);
        if self.inner.is_closed() {
            return self.stop();
        }
        self.inner.set_state(SessionState::CreatingWait);
        Ok(Some((
            SessionPollResult::BeginConnect,
            LoopState::Connecting {
                connector: SessionConnector::new(self.inner.clone()),
                backoff: self.retry.new_backoff(),
                next_attempt: Instant::now(),
            },
        )))
    }

    async fn try_connect(
        &self,
        connector: SessionConnector,
        mut backoff: ExponentialBackoff,
        next_attempt: Instant,
    ) -> Step {
        let attempt = async {
            tokio::time::sleep_until(next_attempt.into()).await;
            connector.try_connect().await
        };
        let result = tokio::select! {
            r = attempt => r,
            _ = self.inner.wait_for_close() => return self.stop(),
        };

        match result {
            Ok((channel, mode)) => {
                self.inner.set_state(SessionState::Active);
                Ok(Some((
                    SessionPollResult::Reconnected(mode),
                    LoopState::Running(self.running(channel)),
                )))
            }
            Err(_) if self.inner.is_closed() => self.stop(),
            Err(e) => {
                session_warn!(self.inner, "Connecting failed: {e}");
                let Some(delay) = backoff.next() else {
                    self.inner.set_state(SessionState::Inactive);
                    return Err(e);
                };
                self.inner.set_state(SessionState::CreatingWait);
                Ok(Some((
                    SessionPollResult::ReconnectFailed(e),
                    LoopState::Connecting {
                        connector,
                        backoff,
                        next_attempt: Instant::now() + delay,
                    },
                )))
            }
        }
    }

    fn running(&self, channel: SecureChannelEventLoop) -> Running {
        Running {
            channel,
            keep_alive: KeepAlive::new(self.inner.clone(), self.keep_alive_interval)
                .into_stream()
                .boxed(),
            subscriptions: SubscriptionEventLoop::new(
                self.inner.clone(),
                self.trigger_publish_recv.clone(),
            )
            .run()
            .boxed(),
        }
    }

    async fn poll_running(&self, mut running: Running) -> Step {
        let event = tokio::select! {
            r = running.channel.poll() => {
                let TransportPollResult::Closed(code) = r else {
                    return Ok(Some((SessionPollResult::Transport(r), LoopState::Running(running))));
                };
                if code.is_good() || self.inner.is_closed() {
                    session_debug!(self.inner, "Transport closed: {code}");
                    return self.stop();
                }
                session_warn!(self.inner, "Connection lost: {code}");
                self.inner.set_state(SessionState::CreatingWait);
                return Ok(Some((SessionPollResult::ConnectionLost(code), LoopState::Idle)));
            }
            _ = self.inner.recreate_session.notified() => {
                return self.recreate(running).await;
            }
            r = running.keep_alive.next() => r.map(SessionPollResult::SessionActivity),
            r = running.subscriptions.next() => r.map(SessionPollResult::Subscription),
        };

        // Both activity streams are endless
        let Some(event) = event else {
            session_error!(self.inner, "Session activity stream ended");
            return Err(StatusCode::BadUnexpectedError);
        };
        Ok(Some((event, LoopState::Running(running))))
    }

    /// The server dropped the session but the channel is still open. Create and activate a new
    /// session on it, or tear the channel down and start over.
    async fn recreate(&self, mut running: Running) -> Step {
        let connector = SessionConnector::new(self.inner.clone());
        match connector.recreate(&mut running.channel).await {
            Ok(mode) => {
                self.inner.set_state(SessionState::Active);
                Ok(Some((
                    SessionPollResult::Reconnected(mode),
                    LoopState::Running(running),
                )))
            }
            Err(e) => {
                session_warn!(self.inner, "Session could not be created again: {e}");
                self.inner.channel.close_channel().await;
                while !matches!(running.channel.poll().await, TransportPollResult::Closed(_)) {}
                self.inner.set_state(SessionState::CreatingWait);
                Ok(Some((SessionPollResult::ReconnectFailed(e), LoopState::Idle)))
            }
        }
    }
}

/// Outcome of a keep alive.
#[derive(Debug, Clone)]
pub enum SessionActivity {
    /// The server answered and reports that it is running.
    KeepAliveSucceeded,
    /// The read failed or the server is in some state other than running.
    KeepAliveFailed(StatusCode),
}

/// Reads the server state every keep alive interval.
struct KeepAlive {
    session: Arc<Session>,
    interval: tokio::time::Interval,
}

impl KeepAlive {
    fn new(session: Arc<Session>, period: Duration) -> Self {
        // The session was only just activated, so skip the immediate first tick
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        Self { session, interval }
    }

    async fn check(&self) -> SessionActivity {
        let results = self
            .session
            .read(
                &[ReadValueId::from(VariableId::Server_ServerStatus_State)],
                TimestampsToReturn::Server,
                1f64,
            )
            .await;
        let state = match results {
            Ok(values) => values
                .into_iter()
                .next()
                .and_then(|dv| dv.value)
                .and_then(|v| v.as_i32()),
            Err(e) => {
                session_warn!(self.session, "Keep alive failed: {e}");
                return SessionActivity::KeepAliveFailed(e);
            }
        };

        match state {
            // ServerState::Running
            Some(0) => SessionActivity::KeepAliveSucceeded,
            Some(s) => {
                session_warn!(self.session, "Server is not running, state {s}");
                SessionActivity::KeepAliveFailed(StatusCode::BadServerHalted)
            }
            None => SessionActivity::KeepAliveFailed(StatusCode::BadUnknownResponse),
        }
    }

    fn into_stream(self) -> impl Stream<Item = SessionActivity> {
        futures::stream::unfold(self, |mut keep_alive| async move {
            keep_alive.interval.tick().await;
            let activity = keep_alive.check().await;
            Some((activity, keep_alive))
        })
    }
}
