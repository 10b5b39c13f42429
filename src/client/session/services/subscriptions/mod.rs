// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

pub mod event_loop;
mod service;
pub mod state;

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use crate::{
    client::session::listeners::isolate,
    core::handle::Handle,
    sync::Mutex,
    types::{
        DataValue, DecodingOptions, ExtensionObject, MonitoredItemCreateRequest, MonitoringMode,
        MonitoringParameters, NotificationMessage, ReadValueId, StatusChangeNotification,
        StatusCode, TimestampsToReturn, Variant,
    },
};

/// A set of callbacks for notifications on a subscription.
/// You may implement this on your own struct, or simply use [SubscriptionCallbacks]
/// for a simple collection of closures.
///
/// Callbacks run on the dispatcher task of the session, one notification at a time and in the
/// order the server sent them.
pub trait OnSubscriptionNotification: Send + Sync {
    /// Called when a subscription changes state on the server.
    fn on_subscription_status_change(&mut self, _notification: StatusChangeNotification) {}

    /// Called for each data value change.
    fn on_data_value(&mut self, _notification: DataValue, _item: &MonitoredItem) {}

    /// Called for each received event.
    fn on_event(&mut self, _event_fields: Option<Vec<Variant>>, _item: &MonitoredItem) {}

    /// Called when notification messages the server skipped could not be republished, so
    /// their notifications are lost. The lost messages are `count` consecutive sequence numbers
    /// from `first_sequence_number`, which may wrap from `u32::MAX` to 1.
    fn on_data_lost(
        &mut self,
        _subscription_id: u32,
        _first_sequence_number: u32,
        _count: u32,
        _status: StatusCode,
    ) {
    }

    /// Called after others events, when message is fully handled.
    fn on_packet_handled(&mut self) {}
}

/// A consumer shared between the subscription and the dispatcher task.
pub(crate) type SharedCallback = Arc<Mutex<Box<dyn OnSubscriptionNotification>>>;

pub(crate) fn shared_callback(callback: impl OnSubscriptionNotification + 'static) -> SharedCallback {
    Arc::new(Mutex::new(Box::new(callback)))
}

type StatusChangeFn = Box<dyn FnMut(StatusChangeNotification) + Send + Sync>;
type DataValueFn = Box<dyn FnMut(DataValue, &MonitoredItem) + Send + Sync>;
type EventFn = Box<dyn FnMut(Option<Vec<Variant>>, &MonitoredItem) + Send + Sync>;

/// A convenient wrapper around a set of callback functions that implements [OnSubscriptionNotification]
pub struct SubscriptionCallbacks {
    status_change: StatusChangeFn,
    data_value: DataValueFn,
    event: EventFn,
}

impl SubscriptionCallbacks {
    /// Create a new subscription callback wrapper.
    ///
    /// # Arguments
    ///
    /// * `status_change` - Called when a subscription changes state on the server.
    /// * `data_value` - Called for each received data value.
    /// * `event` - Called for each received event.
    pub fn new(
        status_change: impl FnMut(StatusChangeNotification) + Send + Sync + 'static,
        data_value: impl FnMut(DataValue, &MonitoredItem) + Send + Sync + 'static,
        event: impl FnMut(Option<Vec<Variant>>, &MonitoredItem) + Send + Sync + 'static,
    ) -> Self {
        Self {
            status_change: Box::new(status_change),
            data_value: Box::new(data_value),
            event: Box::new(event),
        }
    }
}

impl OnSubscriptionNotification for SubscriptionCallbacks {
    fn on_subscription_status_change(&mut self, notification: StatusChangeNotification) {
        (self.status_change)(notification);
    }

    fn on_data_value(&mut self, notification: DataValue, item: &MonitoredItem) {
        (self.data_value)(notification, item);
    }

    fn on_event(&mut self, event_fields: Option<Vec<Variant>>, item: &MonitoredItem) {
        (self.event)(event_fields, item);
    }
}

/// A wrapper around a data change callback that implements [OnSubscriptionNotification]
pub struct DataChangeCallback {
    data_value: DataValueFn,
}

impl DataChangeCallback {
    /// Create a new data change callback wrapper.
    ///
    /// # Arguments
    ///
    /// * `data_value` - Called for each received data value.
    pub fn new(data_value: impl FnMut(DataValue, &MonitoredItem) + Send + Sync + 'static) -> Self {
        Self {
            data_value: Box::new(data_value),
        }
    }
}

impl OnSubscriptionNotification for DataChangeCallback {
    fn on_data_value(&mut self, notification: DataValue, item: &MonitoredItem) {
        (self.data_value)(notification, item);
    }
}

/// A wrapper around an event callback that implements [OnSubscriptionNotification]
pub struct EventCallback {
    event: EventFn,
}

impl EventCallback {
    /// Create a new event callback wrapper.
    ///
    /// # Arguments
    ///
    /// * `event` - Called for each received event.
    pub fn new(
        event: impl FnMut(Option<Vec<Variant>>, &MonitoredItem) + Send + Sync + 'static,
    ) -> Self {
        Self {
            event: Box::new(event),
        }
    }
}

impl OnSubscriptionNotification for EventCallback {
    fn on_event(&mut self, event_fields: Option<Vec<Variant>>, item: &MonitoredItem) {
        (self.event)(event_fields, item);
    }
}

/// A monitored item as the client knows it. Callbacks receive a snapshot taken when the
/// notification was routed.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct MonitoredItem {
    /// Server assigned id, changes when the item is recreated
    id: u32,
    /// Unique within the subscription for its lifetime
    client_handle: u32,
    item_to_monitor: ReadValueId,
    queue_size: u32,
    monitoring_mode: MonitoringMode,
    sampling_interval: f64,
    /// Client handles of the items this item triggers
    triggered_items: BTreeSet<u32>,
    discard_oldest: bool,
    filter: ExtensionObject,
    filter_result: ExtensionObject,
    last_value: Option<DataValue>,
    #[derivative(Debug = "ignore")]
    consumer: Option<SharedCallback>,
}

impl MonitoredItem {
    pub(crate) fn new(
        id: u32,
        request: &MonitoredItemCreateRequest,
        sampling_interval: f64,
        queue_size: u32,
        filter_result: ExtensionObject,
        consumer: Option<SharedCallback>,
    ) -> Self {
        MonitoredItem {
            id,
            client_handle: request.requested_parameters.client_handle,
            item_to_monitor: request.item_to_monitor.clone(),
            queue_size,
            monitoring_mode: request.monitoring_mode,
            sampling_interval,
            triggered_items: BTreeSet::new(),
            discard_oldest: request.requested_parameters.discard_oldest,
            filter: request.requested_parameters.filter.clone(),
            filter_result,
            last_value: None,
            consumer,
        }
    }

    /// Server assigned ID of the monitored item.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Client assigned handle for the monitored item.
    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    /// Attribute and node ID for the item the monitored item receives notifications for.
    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    /// Sampling interval, as revised by the server.
    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    /// Queue size on the server, as revised by the server.
    pub fn queue_size(&self) -> u32 {
        self.queue_size
    }

    /// Whether the oldest values are discarded on queue overflow on the server.
    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    /// The filter requested for the item.
    pub fn filter(&self) -> &ExtensionObject {
        &self.filter
    }

    /// The filter result returned by the server.
    pub fn filter_result(&self) -> &ExtensionObject {
        &self.filter_result
    }

    /// Client handles of the items triggered by this item.
    pub fn triggered_items(&self) -> &BTreeSet<u32> {
        &self.triggered_items
    }

    /// The most recent value received for the item.
    pub fn last_value(&self) -> Option<&DataValue> {
        self.last_value.as_ref()
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    pub(crate) fn consumer(&self) -> Option<&SharedCallback> {
        self.consumer.as_ref()
    }

    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub(crate) fn set_sampling_interval(&mut self, value: f64) {
        self.sampling_interval = value;
    }

    pub(crate) fn set_queue_size(&mut self, value: u32) {
        self.queue_size = value;
    }

    pub(crate) fn set_filter(&mut self, filter: ExtensionObject, filter_result: ExtensionObject) {
        self.filter = filter;
        self.filter_result = filter_result;
    }

    pub(crate) fn set_monitoring_mode(&mut self, monitoring_mode: MonitoringMode) {
        self.monitoring_mode = monitoring_mode;
    }

    pub(crate) fn set_triggering(&mut self, links_to_add: &[u32], links_to_remove: &[u32]) {
        links_to_remove.iter().for_each(|i| {
            self.triggered_items.remove(i);
        });
        links_to_add.iter().for_each(|i| {
            self.triggered_items.insert(*i);
        });
    }

    /// The request that creates this item again, keeping its client handle.
    pub(crate) fn to_create_request(&self) -> MonitoredItemCreateRequest {
        MonitoredItemCreateRequest::new(
            self.item_to_monitor.clone(),
            self.monitoring_mode,
            MonitoringParameters {
                client_handle: self.client_handle,
                sampling_interval: self.sampling_interval,
                filter: self.filter.clone(),
                queue_size: self.queue_size,
                discard_oldest: self.discard_oldest,
            },
        )
    }
}

/// Where a sequence number falls relative to the last one seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SequenceCheck {
    /// The expected number, or the first one seen.
    InOrder,
    /// `count` numbers from `first` were skipped.
    Gap { first: u32, count: u32 },
    /// Numbering went backwards, the server restarted it.
    Restart,
}

/// Sequence numbers wrap from `u32::MAX` to 1, 0 is never used.
pub(crate) fn next_sequence_number(n: u32) -> u32 {
    if n == u32::MAX {
        1
    } else {
        n + 1
    }
}

/// How many steps forward `to` is from `from`, counting the wrap from `u32::MAX` to 1.
fn sequence_distance(from: u32, to: u32) -> u32 {
    let space = u64::from(u32::MAX);
    let from = u64::from(from.max(1) - 1);
    let to = u64::from(to.max(1) - 1);
    ((to + space - from) % space) as u32
}

/// The sequence number `steps` after `n`.
pub(crate) fn advance_sequence_number(n: u32, steps: u32) -> u32 {
    let space = u64::from(u32::MAX);
    ((u64::from(n.max(1) - 1) + u64::from(steps)) % space) as u32 + 1
}

/// `count` consecutive sequence numbers starting at `first`.
pub(crate) fn sequence_numbers(first: u32, count: u32) -> impl Iterator<Item = u32> {
    std::iter::successors(Some(first), |n| Some(next_sequence_number(*n))).take(count as usize)
}

/// A number up to half the sequence space ahead of the expected one is a gap, anything else
/// went backwards.
pub(crate) fn check_sequence(last: Option<u32>, next: u32) -> SequenceCheck {
    let Some(last) = last else {
        return SequenceCheck::InOrder;
    };
    let expected = next_sequence_number(last);
    match sequence_distance(expected, next) {
        0 => SequenceCheck::InOrder,
        count if count <= u32::MAX / 2 => SequenceCheck::Gap {
            first: expected,
            count,
        },
        _ => SequenceCheck::Restart,
    }
}

enum Delivery {
    DataValue(SharedCallback, DataValue, MonitoredItem),
    Event(SharedCallback, Option<Vec<Variant>>, MonitoredItem),
    StatusChange(StatusChangeNotification),
}

/// A subscription as the client knows it.
pub struct Subscription {
    /// Subscription id, supplied by server
    subscription_id: u32,
    /// Publishing interval, revised by server
    publishing_interval: Duration,
    /// Lifetime count, revised by server
    lifetime_count: u32,
    /// Max keep alive count, revised by server
    max_keep_alive_count: u32,
    max_notifications_per_publish: u32,
    publishing_enabled: bool,
    priority: u8,
    /// Used when items are created again after a reconnect
    timestamps_to_return: TimestampsToReturn,

    /// Monitored items keyed by client handle
    monitored_items: HashMap<u32, MonitoredItem>,
    /// Server assigned id to client handle
    server_ids: HashMap<u32, u32>,
    client_handles: Handle,

    /// Sequence number of the last message handled
    last_sequence_number: Option<u32>,

    callback: SharedCallback,
}

impl Subscription {
    /// Creates a new subscription using the supplied parameters and callback.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        subscription_id: u32,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
        publishing_enabled: bool,
        callback: SharedCallback,
    ) -> Subscription {
        Subscription {
            subscription_id,
            publishing_interval,
            lifetime_count,
            max_keep_alive_count,
            max_notifications_per_publish,
            publishing_enabled,
            priority,
            timestamps_to_return: TimestampsToReturn::Both,
            monitored_items: HashMap::new(),
            server_ids: HashMap::new(),
            client_handles: Handle::new(1),
            last_sequence_number: None,
            callback,
        }
    }

    /// Monitored items keyed by client handle.
    pub fn monitored_items(&self) -> &HashMap<u32, MonitoredItem> {
        &self.monitored_items
    }

    /// Find a monitored item by its server assigned id.
    pub fn monitored_item(&self, monitored_item_id: u32) -> Option<&MonitoredItem> {
        self.server_ids
            .get(&monitored_item_id)
            .and_then(|h| self.monitored_items.get(h))
    }

    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    pub fn publishing_interval(&self) -> Duration {
        self.publishing_interval
    }

    pub fn lifetime_count(&self) -> u32 {
        self.lifetime_count
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn max_keep_alive_count(&self) -> u32 {
        self.max_keep_alive_count
    }

    pub fn max_notifications_per_publish(&self) -> u32 {
        self.max_notifications_per_publish
    }

    pub fn publishing_enabled(&self) -> bool {
        self.publishing_enabled
    }

    /// Sequence number of the last notification message handled.
    pub fn last_sequence_number(&self) -> Option<u32> {
        self.last_sequence_number
    }

    pub(crate) fn callback(&self) -> &SharedCallback {
        &self.callback
    }

    pub(crate) fn timestamps_to_return(&self) -> TimestampsToReturn {
        self.timestamps_to_return
    }

    pub(crate) fn set_subscription_id(&mut self, subscription_id: u32) {
        self.subscription_id = subscription_id;
    }

    pub(crate) fn set_publishing_interval(&mut self, publishing_interval: Duration) {
        self.publishing_interval = publishing_interval;
    }

    pub(crate) fn set_lifetime_count(&mut self, lifetime_count: u32) {
        self.lifetime_count = lifetime_count;
    }

    pub(crate) fn set_max_keep_alive_count(&mut self, max_keep_alive_count: u32) {
        self.max_keep_alive_count = max_keep_alive_count;
    }

    pub(crate) fn set_max_notifications_per_publish(&mut self, max_notifications_per_publish: u32) {
        self.max_notifications_per_publish = max_notifications_per_publish;
    }

    pub(crate) fn set_publishing_enabled(&mut self, publishing_enabled: bool) {
        self.publishing_enabled = publishing_enabled;
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub(crate) fn set_last_sequence_number(&mut self, sequence_number: Option<u32>) {
        self.last_sequence_number = sequence_number;
    }

    /// Allocate a client handle that no item of this subscription has had before.
    pub(crate) fn next_client_handle(&mut self) -> u32 {
        loop {
            let handle = self.client_handles.next();
            // Only after wrapping could a handle still be in use
            if !self.monitored_items.contains_key(&handle) {
                return handle;
            }
        }
    }

    pub(crate) fn client_handle(&self, monitored_item_id: u32) -> Option<u32> {
        self.server_ids.get(&monitored_item_id).copied()
    }

    pub(crate) fn insert_monitored_item(
        &mut self,
        item: MonitoredItem,
        timestamps_to_return: TimestampsToReturn,
    ) {
        self.timestamps_to_return = timestamps_to_return;
        self.server_ids.insert(item.id, item.client_handle);
        self.monitored_items.insert(item.client_handle, item);
    }

    pub(crate) fn monitored_item_mut(&mut self, monitored_item_id: u32) -> Option<&mut MonitoredItem> {
        let handle = self.server_ids.get(&monitored_item_id)?;
        self.monitored_items.get_mut(handle)
    }

    pub(crate) fn delete_monitored_item(&mut self, monitored_item_id: u32) -> Option<MonitoredItem> {
        let handle = self.server_ids.remove(&monitored_item_id)?;
        let item = self.monitored_items.remove(&handle)?;
        // Links to the deleted item go with it
        for other in self.monitored_items.values_mut() {
            other.triggered_items.remove(&handle);
        }
        Some(item)
    }

    /// Take all items out of the subscription, to create them again.
    pub(crate) fn take_monitored_items(&mut self) -> Vec<MonitoredItem> {
        self.server_ids.clear();
        let mut items: Vec<_> = self.monitored_items.drain().map(|(_, v)| v).collect();
        items.sort_by_key(|i| i.client_handle);
        items
    }

    /// Put back items taken with `take_monitored_items`, dropping links to items that are gone.
    pub(crate) fn restore_monitored_items(&mut self, items: Vec<MonitoredItem>) {
        for item in items {
            self.server_ids.insert(item.id, item.client_handle);
            self.monitored_items.insert(item.client_handle, item);
        }
        let handles: BTreeSet<u32> = self.monitored_items.keys().copied().collect();
        for item in self.monitored_items.values_mut() {
            item.triggered_items.retain(|h| handles.contains(h));
        }
    }

    pub(crate) fn set_triggering(
        &mut self,
        triggering_item_id: u32,
        links_to_add: &[u32],
        links_to_remove: &[u32],
    ) {
        let to_handles = |ids: &[u32]| -> Vec<u32> {
            ids.iter()
                .filter_map(|id| self.server_ids.get(id).copied())
                .collect()
        };
        let add = to_handles(links_to_add);
        let remove = to_handles(links_to_remove);
        if let Some(item) = self.monitored_item_mut(triggering_item_id) {
            item.set_triggering(&add, &remove);
        }
    }

    /// Route the notifications of a message to the consumers of their items, updating the
    /// latest value of each item. The returned job calls the consumers and must run on the
    /// dispatcher task. Notifications for unknown client handles are dropped.
    pub(crate) fn on_notification(
        &mut self,
        message: &NotificationMessage,
        decoding_options: &DecodingOptions,
    ) -> Option<Box<dyn FnOnce() + Send>> {
        let notifications = message.notifications(decoding_options)?;
        let mut deliveries = Vec::new();

        for notification in notifications
            .data_changes
            .into_iter()
            .flat_map(|n| n.monitored_items.unwrap_or_default())
        {
            let Some(item) = self.monitored_items.get_mut(&notification.client_handle) else {
                trace!(
                    "Dropping data change for unknown client handle {}",
                    notification.client_handle
                );
                continue;
            };
            item.last_value = Some(notification.value.clone());
            let consumer = item.consumer.clone().unwrap_or_else(|| self.callback.clone());
            deliveries.push(Delivery::DataValue(consumer, notification.value, item.clone()));
        }

        for event in notifications
            .events
            .into_iter()
            .flat_map(|n| n.events.unwrap_or_default())
        {
            let Some(item) = self.monitored_items.get(&event.client_handle) else {
                trace!(
                    "Dropping event for unknown client handle {}",
                    event.client_handle
                );
                continue;
            };
            let consumer = item.consumer.clone().unwrap_or_else(|| self.callback.clone());
            deliveries.push(Delivery::Event(consumer, event.event_fields, item.clone()));
        }

        deliveries.extend(
            notifications
                .status_changes
                .into_iter()
                .map(Delivery::StatusChange),
        );

        let callback = self.callback.clone();
        Some(Box::new(move || {
            for delivery in deliveries {
                match delivery {
                    Delivery::DataValue(consumer, value, item) => {
                        isolate("data change consumer", || {
                            trace_lock!(consumer).on_data_value(value, &item)
                        });
                    }
                    Delivery::Event(consumer, fields, item) => {
                        isolate("event consumer", || {
                            trace_lock!(consumer).on_event(fields, &item)
                        });
                    }
                    Delivery::StatusChange(status) => {
                        isolate("status change consumer", || {
                            trace_lock!(callback).on_subscription_status_change(status)
                        });
                    }
                }
            }
            trace_lock!(callback).on_packet_handled();
        }))
    }

    /// A job telling the consumers of the subscription that messages are lost.
    pub(crate) fn on_data_lost(
        &self,
        first_sequence_number: u32,
        count: u32,
        status: StatusCode,
    ) -> Box<dyn FnOnce() + Send> {
        let subscription_id = self.subscription_id;
        let mut consumers = vec![self.callback.clone()];
        for item in self.monitored_items.values() {
            if let Some(c) = &item.consumer {
                if !consumers.iter().any(|o| Arc::ptr_eq(o, c)) {
                    consumers.push(c.clone());
                }
            }
        }
        Box::new(move || {
            for consumer in consumers {
                isolate("data lost consumer", || {
                    trace_lock!(consumer).on_data_lost(
                        subscription_id,
                        first_sequence_number,
                        count,
                        status,
                    )
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;
    use crate::types::{DateTime, MonitoredItemNotification, NodeId};

    #[test]
    fn sequence_numbers() {
        assert_eq!(check_sequence(None, 17), SequenceCheck::InOrder);
        assert_eq!(check_sequence(Some(4), 5), SequenceCheck::InOrder);
        assert_eq!(
            check_sequence(Some(5), 7),
            SequenceCheck::Gap { first: 6, count: 1 }
        );
        assert_eq!(
            check_sequence(Some(1), 4),
            SequenceCheck::Gap { first: 2, count: 2 }
        );
        assert_eq!(check_sequence(Some(5), 5), SequenceCheck::Restart);
        assert_eq!(check_sequence(Some(5), 1), SequenceCheck::Restart);
        // Wraps past zero
        assert_eq!(check_sequence(Some(u32::MAX), 1), SequenceCheck::InOrder);
        assert_eq!(
            check_sequence(Some(u32::MAX), 3),
            SequenceCheck::Gap { first: 1, count: 2 }
        );
        // u32::MAX itself went missing across the wrap
        assert_eq!(
            check_sequence(Some(u32::MAX - 1), 1),
            SequenceCheck::Gap {
                first: u32::MAX,
                count: 1
            }
        );
        assert_eq!(
            check_sequence(Some(u32::MAX - 2), 2),
            SequenceCheck::Gap {
                first: u32::MAX - 1,
                count: 3
            }
        );
        assert_eq!(
            super::sequence_numbers(u32::MAX - 1, 3).collect::<Vec<_>>(),
            vec![u32::MAX - 1, u32::MAX, 1]
        );
        assert_eq!(advance_sequence_number(u32::MAX - 1, 2), 1);
        assert_eq!(advance_sequence_number(6, 10), 16);
        // A keep-alive with N leaves L at N - 1
        assert_eq!(check_sequence(Some(0), 1), SequenceCheck::InOrder);
    }

    fn subscription(callback: SharedCallback) -> Subscription {
        Subscription::new(1, Duration::from_secs(1), 30, 10, 0, 0, true, callback)
    }

    fn add_item(sub: &mut Subscription, id: u32, consumer: Option<SharedCallback>) -> u32 {
        let handle = sub.next_client_handle();
        let mut request = MonitoredItemCreateRequest::from(NodeId::new(2, id));
        request.requested_parameters.client_handle = handle;
        let item = MonitoredItem::new(id, &request, 100.0, 1, ExtensionObject::null(), consumer);
        sub.insert_monitored_item(item, TimestampsToReturn::Both);
        handle
    }

    fn counter(count: Arc<AtomicU32>) -> SharedCallback {
        shared_callback(DataChangeCallback::new(move |_, _| {
            count.fetch_add(1, Ordering::Relaxed);
        }))
    }

    fn values(handles: &[u32]) -> NotificationMessage {
        NotificationMessage::data_change(
            1,
            DateTime::now(),
            handles
                .iter()
                .map(|h| MonitoredItemNotification {
                    client_handle: *h,
                    value: DataValue::new_now(*h as i32),
                })
                .collect(),
            Vec::new(),
        )
    }

    #[test]
    fn routes_by_client_handle() {
        let default = Arc::new(AtomicU32::new(0));
        let counts: Vec<_> = (0..3).map(|_| Arc::new(AtomicU32::new(0))).collect();
        let mut sub = subscription(counter(default.clone()));
        let handles: Vec<_> = counts
            .iter()
            .enumerate()
            .map(|(i, c)| add_item(&mut sub, 100 + i as u32, Some(counter(c.clone()))))
            .collect();
        assert_eq!(handles, vec![1, 2, 3]);

        let job = sub
            .on_notification(&values(&[2, 99]), &DecodingOptions::default())
            .unwrap();
        job();
        assert_eq!(counts[0].load(Ordering::Relaxed), 0);
        assert_eq!(counts[1].load(Ordering::Relaxed), 1);
        assert_eq!(counts[2].load(Ordering::Relaxed), 0);
        assert_eq!(default.load(Ordering::Relaxed), 0);
        assert_eq!(
            sub.monitored_items()[&2].last_value().unwrap().value,
            Some(Variant::Int32(2))
        );
    }

    #[test]
    fn items_without_consumer_use_the_subscription_callback() {
        let default = Arc::new(AtomicU32::new(0));
        let mut sub = subscription(counter(default.clone()));
        let handle = add_item(&mut sub, 5, None);
        sub.on_notification(&values(&[handle]), &DecodingOptions::default())
            .unwrap()();
        assert_eq!(default.load(Ordering::Relaxed), 1);
        assert!(sub
            .on_notification(
                &NotificationMessage::keep_alive(2, DateTime::now()),
                &DecodingOptions::default()
            )
            .is_none());
    }

    #[test]
    fn client_handles_are_not_reused() {
        let mut sub = subscription(counter(Arc::default()));
        let first = add_item(&mut sub, 10, None);
        let second = add_item(&mut sub, 11, None);
        assert!(sub.delete_monitored_item(10).is_some());
        let third = add_item(&mut sub, 12, None);
        assert_eq!((first, second, third), (1, 2, 3));
        assert!(sub.monitored_item(10).is_none());
        assert_eq!(sub.monitored_item(12).unwrap().client_handle(), 3);
    }

    #[test]
    fn triggering_links_follow_deletes() {
        let mut sub = subscription(counter(Arc::default()));
        let a = add_item(&mut sub, 10, None);
        let b = add_item(&mut sub, 11, None);
        sub.set_triggering(10, &[11, 99], &[]);
        assert_eq!(
            sub.monitored_items()[&a].triggered_items().iter().copied().collect::<Vec<_>>(),
            vec![b]
        );
        sub.delete_monitored_item(11);
        assert!(sub.monitored_items()[&a].triggered_items().is_empty());
    }

    #[test]
    fn data_lost_reaches_each_consumer_once() {
        let lost = Arc::new(AtomicU32::new(0));
        struct Lost(Arc<AtomicU32>);
        impl OnSubscriptionNotification for Lost {
            fn on_data_lost(
                &mut self,
                subscription_id: u32,
                first_sequence_number: u32,
                count: u32,
                status: StatusCode,
            ) {
                assert_eq!((subscription_id, first_sequence_number, count), (1, 6, 1));
                assert_eq!(status, StatusCode::BadMessageNotAvailable);
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let shared = shared_callback(Lost(lost.clone()));
        let mut sub = subscription(shared.clone());
        add_item(&mut sub, 1, Some(shared));
        add_item(&mut sub, 2, Some(shared_callback(Lost(lost.clone()))));
        sub.on_data_lost(6, 1, StatusCode::BadMessageNotAvailable)();
        assert_eq!(lost.load(Ordering::Relaxed), 2);
    }
}
