// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::mpsc;

use crate::{
    sync::{Mutex, RwLock},
    types::ServiceFault,
};

use super::SessionInfo;

/// Notified of every service fault returned by the server, and of every response carrying a
/// bad service result.
pub trait ServiceFaultListener: Send + Sync {
    fn on_service_fault(&self, fault: &ServiceFault);
}

impl<F> ServiceFaultListener for F
where
    F: Fn(&ServiceFault) + Send + Sync,
{
    fn on_service_fault(&self, fault: &ServiceFault) {
        self(fault)
    }
}

/// Notified when the session becomes active, and when it stops being active. Calls alternate,
/// starting with `on_session_active`.
pub trait SessionActivityListener: Send + Sync {
    fn on_session_active(&self, _session: &SessionInfo) {}

    fn on_session_inactive(&self, _session: &SessionInfo) {}
}

/// Identifies a registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct Registry<T: ?Sized> {
    entries: RwLock<Vec<(ListenerHandle, Arc<T>)>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    fn add(&self, handle: ListenerHandle, listener: Arc<T>) {
        let mut entries = trace_write_lock!(self.entries);
        entries.push((handle, listener));
    }

    fn remove(&self, handle: ListenerHandle) -> bool {
        let mut entries = trace_write_lock!(self.entries);
        let len = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != len
    }

    /// The listeners at this moment. Delivery works on the snapshot so listeners can be added
    /// or removed from inside a callback.
    fn snapshot(&self) -> Vec<Arc<T>> {
        let entries = trace_read_lock!(self.entries);
        entries.iter().map(|(_, l)| l.clone()).collect()
    }
}

/// A unit of work for the dispatcher task.
pub(crate) enum Dispatch {
    ServiceFault(ServiceFault),
    SessionActive(Arc<SessionInfo>),
    SessionInactive(Arc<SessionInfo>),
    /// Subscription consumer callbacks
    Job(Box<dyn FnOnce() + Send>),
}

#[derive(Default)]
struct Registries {
    faults: Registry<dyn ServiceFaultListener>,
    activity: Registry<dyn SessionActivityListener>,
}

impl Registries {
    fn deliver(&self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::ServiceFault(fault) => {
                for listener in self.faults.snapshot() {
                    isolate("service fault listener", || {
                        listener.on_service_fault(&fault)
                    });
                }
            }
            Dispatch::SessionActive(info) => {
                for listener in self.activity.snapshot() {
                    isolate("session activity listener", || {
                        listener.on_session_active(&info)
                    });
                }
            }
            Dispatch::SessionInactive(info) => {
                for listener in self.activity.snapshot() {
                    isolate("session activity listener", || {
                        listener.on_session_inactive(&info)
                    });
                }
            }
            Dispatch::Job(job) => isolate("subscription callback", job),
        }
    }
}

pub(crate) fn isolate(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("A {} panicked", what);
    }
}

/// The listener registries of a session and the ordered queue feeding them. Everything queued
/// is delivered in order by a single task, never on the task doing the I/O.
pub(crate) struct Listeners {
    registries: Arc<Registries>,
    next_handle: AtomicU64,
    queue: mpsc::UnboundedSender<Dispatch>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,
}

impl Listeners {
    pub fn new() -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            registries: Arc::default(),
            next_handle: AtomicU64::new(1),
            queue,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    fn next_handle(&self) -> ListenerHandle {
        ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_fault_listener(&self, listener: Arc<dyn ServiceFaultListener>) -> ListenerHandle {
        let handle = self.next_handle();
        self.registries.faults.add(handle, listener);
        handle
    }

    pub fn add_activity_listener(
        &self,
        listener: Arc<dyn SessionActivityListener>,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.registries.activity.add(handle, listener);
        handle
    }

    /// Remove a listener of either kind. Returns false if it was not registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        self.registries.faults.remove(handle) || self.registries.activity.remove(handle)
    }

    pub fn dispatch(&self, dispatch: Dispatch) {
        // Only fails once the dispatcher is gone, i.e. the runtime is shutting down
        if self.queue.send(dispatch).is_err() {
            debug!("Dispatcher has stopped, dropping notification");
        }
    }

    /// Spawn the task that delivers queued notifications. Only the first call spawns anything;
    /// the task ends once the session is dropped.
    pub fn start(&self) {
        let receiver = {
            let mut receiver = trace_lock!(self.receiver);
            receiver.take()
        };
        if let Some(mut receiver) = receiver {
            let registries = self.registries.clone();
            tokio::task::spawn(async move {
                while let Some(dispatch) = receiver.recv().await {
                    registries.deliver(dispatch);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::{NodeId, RequestHeader, StatusCode};

    fn fault(status: StatusCode) -> Dispatch {
        Dispatch::ServiceFault(ServiceFault::new(&RequestHeader::dummy(), status))
    }

    fn info() -> Arc<SessionInfo> {
        Arc::new(SessionInfo {
            session_id: NodeId::new(1, 100),
            authentication_token: NodeId::new(1, 101),
            session_name: "test".into(),
            revised_session_timeout: 1000.0,
            max_request_message_size: 0,
            server_certificate: Default::default(),
            server_nonce: Default::default(),
            user_token_policies: Vec::new(),
        })
    }

    async fn recv_all(
        recv: &mut mpsc::UnboundedReceiver<StatusCode>,
        count: usize,
    ) -> Vec<StatusCode> {
        let mut received = Vec::new();
        while received.len() < count {
            let status = tokio::time::timeout(Duration::from_secs(2), recv.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(status);
        }
        received
    }

    #[tokio::test]
    async fn faults_in_order_despite_panics() {
        let listeners = Listeners::new();
        listeners.add_fault_listener(Arc::new(|_: &ServiceFault| panic!("bad listener")));
        let (send, mut recv) = mpsc::unbounded_channel();
        listeners.add_fault_listener(Arc::new(move |f: &ServiceFault| {
            let _ = send.send(f.response_header.service_result);
        }));
        listeners.start();

        listeners.dispatch(fault(StatusCode::BadNodeIdUnknown));
        listeners.dispatch(fault(StatusCode::BadTimeout));
        listeners.dispatch(fault(StatusCode::BadSessionClosed));

        assert_eq!(
            recv_all(&mut recv, 3).await,
            vec![
                StatusCode::BadNodeIdUnknown,
                StatusCode::BadTimeout,
                StatusCode::BadSessionClosed
            ]
        );
    }

    #[tokio::test]
    async fn removed_listener_is_not_called() {
        let listeners = Listeners::new();
        let (removed_send, mut removed_recv) = mpsc::unbounded_channel();
        let removed = listeners.add_fault_listener(Arc::new(move |f: &ServiceFault| {
            let _ = removed_send.send(f.response_header.service_result);
        }));
        let (send, mut recv) = mpsc::unbounded_channel();
        listeners.add_fault_listener(Arc::new(move |f: &ServiceFault| {
            let _ = send.send(f.response_header.service_result);
        }));
        assert!(listeners.remove(removed));
        assert!(!listeners.remove(removed));
        listeners.start();

        listeners.dispatch(fault(StatusCode::BadTimeout));
        assert_eq!(recv_all(&mut recv, 1).await, vec![StatusCode::BadTimeout]);
        assert!(removed_recv.try_recv().is_err());
    }

    struct Activity(mpsc::UnboundedSender<bool>);

    impl SessionActivityListener for Activity {
        fn on_session_active(&self, session: &SessionInfo) {
            assert_eq!(session.session_id, NodeId::new(1, 100));
            let _ = self.0.send(true);
        }

        fn on_session_inactive(&self, _session: &SessionInfo) {
            let _ = self.0.send(false);
        }
    }

    #[tokio::test]
    async fn activity_and_jobs_share_the_queue() {
        let listeners = Listeners::new();
        let (send, mut recv) = mpsc::unbounded_channel();
        listeners.add_activity_listener(Arc::new(Activity(send.clone())));

        listeners.dispatch(Dispatch::SessionActive(info()));
        listeners.dispatch(Dispatch::Job(Box::new(|| panic!("bad callback"))));
        let job_send = send.clone();
        listeners.dispatch(Dispatch::Job(Box::new(move || {
            let _ = job_send.send(true);
        })));
        listeners.dispatch(Dispatch::SessionInactive(info()));
        // Queued before the task starts, delivered once it does
        listeners.start();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(
                tokio::time::timeout(Duration::from_secs(2), recv.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(received, vec![true, true, false]);
    }
}
