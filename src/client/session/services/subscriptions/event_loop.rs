// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{
    future::{BoxFuture, Either},
    stream::FuturesUnordered,
    FutureExt, Stream, StreamExt,
};
use tokio::sync::watch;

use crate::{
    client::session::{session_debug, session_error, session_warn, Session},
    types::{PublishResponse, StatusCode},
};

/// Pause before publishing again after a failure other than a timeout.
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(1);

type PendingPublish = BoxFuture<'static, Result<Box<PublishResponse>, StatusCode>>;

/// Outcome of a publish request.
#[derive(Debug)]
pub enum SubscriptionActivity {
    /// The response was handled and its notifications delivered.
    Publish,
    /// The request failed or timed out. Another is sent, possibly after a pause.
    PublishFailed(StatusCode),
}

/// Keeps publish requests outstanding while the session has subscriptions.
///
/// Responses are handled one at a time in the order they arrive, so notifications reach
/// consumers in sequence order.
pub struct SubscriptionEventLoop {
    session: Arc<Session>,
    /// Bumped when a subscription is created, which may end an idle spell
    trigger_publish_recv: watch::Receiver<Instant>,
    max_inflight_publish: usize,
    last_trigger: Instant,
    /// No new publish requests before this time
    retry_at: Option<Instant>,
}

impl SubscriptionEventLoop {
    pub fn new(session: Arc<Session>, trigger_publish_recv: watch::Receiver<Instant>) -> Self {
        let last_trigger = *trigger_publish_recv.borrow();
        Self {
            max_inflight_publish: session.max_inflight_publish,
            last_trigger,
            trigger_publish_recv,
            session,
            retry_at: None,
        }
    }

    /// The loop as a stream reporting the outcome of every publish request.
    pub fn run(self) -> impl Stream<Item = SubscriptionActivity> {
        futures::stream::unfold(
            (self, FuturesUnordered::new()),
            |(mut slf, mut inflight)| async move {
                let activity = slf.next_activity(&mut inflight).await;
                Some((activity, (slf, inflight)))
            },
        )
    }

    fn top_up(&mut self, inflight: &mut FuturesUnordered<PendingPublish>) {
        if self.retry_at.is_some_and(|t| t <= Instant::now()) {
            self.retry_at = None;
        }
        if self.retry_at.is_some() || !self.session.has_subscriptions() {
            return;
        }
        while inflight.len() < self.max_inflight_publish {
            let session = self.session.clone();
            inflight.push(async move { session.publish().await }.boxed());
        }
    }

    async fn next_activity(
        &mut self,
        inflight: &mut FuturesUnordered<PendingPublish>,
    ) -> SubscriptionActivity {
        let mut trigger = self.trigger_publish_recv.clone();
        loop {
            self.top_up(inflight);

            let retry = match self.retry_at {
                Some(t) => Either::Left(tokio::time::sleep_until(t.into())),
                None => Either::Right(futures::future::pending::<()>()),
            };
            // An empty FuturesUnordered yields None at once rather than waiting
            let response = if inflight.is_empty() {
                Either::Left(futures::future::pending())
            } else {
                Either::Right(inflight.next())
            };
            let last_trigger = self.last_trigger;
            // The watch guard must not outlive the branch, the stream has to stay `Send`
            let triggered = async {
                trigger
                    .wait_for(|t| *t > last_trigger)
                    .await
                    .map(|t| *t)
            };

            tokio::select! {
                t = triggered => {
                    if let Ok(t) = t {
                        self.last_trigger = t;
                    }
                }
                _ = retry => {}
                response = response => match response {
                    Some(Ok(response)) => {
                        self.session.handle_publish_response(response).await;
                        return SubscriptionActivity::Publish;
                    }
                    Some(Err(e)) => {
                        self.on_publish_error(e, inflight.len());
                        return SubscriptionActivity::PublishFailed(e);
                    }
                    None => return SubscriptionActivity::PublishFailed(StatusCode::BadInvalidState),
                },
            }
        }
    }

    fn on_publish_error(&mut self, status: StatusCode, inflight: usize) {
        match status {
            StatusCode::BadTimeout => {
                session_debug!(self.session, "Publish request timed out");
            }
            StatusCode::BadTooManyPublishRequests => {
                // The server holds as many as are still outstanding
                self.max_inflight_publish = inflight.max(1);
                session_debug!(
                    self.session,
                    "Server has too many publish requests, keeping {} outstanding",
                    self.max_inflight_publish
                );
                if inflight == 0 {
                    self.retry_at = Some(Instant::now() + PUBLISH_RETRY_DELAY);
                }
            }
            StatusCode::BadNoSubscription | StatusCode::BadSubscriptionIdInvalid => {
                // Subscriptions may be being created again
                session_warn!(self.session, "Server has no subscriptions to publish for");
                self.retry_at = Some(Instant::now() + PUBLISH_RETRY_DELAY);
            }
            status => {
                session_error!(self.session, "Publish request failed: {}", status);
                self.retry_at = Some(Instant::now() + PUBLISH_RETRY_DELAY);
            }
        }
    }
}
