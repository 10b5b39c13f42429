// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{collections::HashMap, time::Duration};

use crate::types::{
    DecodingOptions, MonitoringMode, NotificationMessage, StatusCode, SubscriptionAcknowledgement,
    TimestampsToReturn,
};

use super::{check_sequence, MonitoredItem, SequenceCheck, Subscription};

/// A job for the dispatcher task.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// State containing all known subscriptions in the session, and the acknowledgements to send
/// with the next publish request.
pub struct SubscriptionState {
    subscriptions: HashMap<u32, Subscription>,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
}

impl SubscriptionState {
    /// Create a new, empty subscription state.
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            acknowledgements: Vec::new(),
        }
    }

    pub(crate) fn take_acknowledgements(&mut self) -> Vec<SubscriptionAcknowledgement> {
        std::mem::take(&mut self.acknowledgements)
    }

    fn add_acknowledgement(&mut self, subscription_id: u32, sequence_number: u32) {
        self.acknowledgements.push(SubscriptionAcknowledgement {
            subscription_id,
            sequence_number,
        })
    }

    /// Put back acknowledgements of a publish request that failed. Those of subscriptions
    /// deleted in the meantime are dropped.
    pub(crate) fn re_queue_acknowledgements(&mut self, acks: Vec<SubscriptionAcknowledgement>) {
        let subscriptions = &self.subscriptions;
        self.acknowledgements.extend(
            acks.into_iter()
                .filter(|a| subscriptions.contains_key(&a.subscription_id)),
        );
    }

    /// List of subscription IDs.
    pub fn subscription_ids(&self) -> Option<Vec<u32>> {
        if self.subscriptions.is_empty() {
            None
        } else {
            Some(self.subscriptions.keys().cloned().collect())
        }
    }

    /// Check if the subscription ID is known.
    pub fn subscription_exists(&self, subscription_id: u32) -> bool {
        self.subscriptions.contains_key(&subscription_id)
    }

    /// Get a reference to a subscription by ID.
    pub fn get(&self, subscription_id: u32) -> Option<&Subscription> {
        self.subscriptions.get(&subscription_id)
    }

    pub(crate) fn get_mut(&mut self, subscription_id: u32) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(&subscription_id)
    }

    /// Get the number of subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Get the number of subscriptions that have publishing enabled.
    pub fn len_active(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.publishing_enabled())
            .count()
    }

    pub(crate) fn add_subscription(&mut self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.subscription_id(), subscription);
    }

    pub(crate) fn modify_subscription(
        &mut self,
        subscription_id: u32,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
    ) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.set_publishing_interval(publishing_interval);
            subscription.set_lifetime_count(lifetime_count);
            subscription.set_max_keep_alive_count(max_keep_alive_count);
            subscription.set_max_notifications_per_publish(max_notifications_per_publish);
            subscription.set_priority(priority);
        }
    }

    pub(crate) fn delete_subscription(&mut self, subscription_id: u32) -> Option<Subscription> {
        self.acknowledgements
            .retain(|a| a.subscription_id != subscription_id);
        self.subscriptions.remove(&subscription_id)
    }

    /// Store a subscription under the id the server gave it when it was created again. Its
    /// numbering starts over.
    pub(crate) fn replace_subscription_id(&mut self, old_id: u32, new_id: u32) {
        if let Some(mut subscription) = self.delete_subscription(old_id) {
            subscription.set_subscription_id(new_id);
            subscription.set_last_sequence_number(None);
            self.subscriptions.insert(new_id, subscription);
        }
    }

    pub(crate) fn set_publishing_mode(
        &mut self,
        subscription_ids: &[u32],
        publishing_enabled: bool,
    ) {
        subscription_ids.iter().for_each(|subscription_id| {
            if let Some(subscription) = self.subscriptions.get_mut(subscription_id) {
                subscription.set_publishing_enabled(publishing_enabled);
            }
        });
    }

    pub(crate) fn next_client_handle(&mut self, subscription_id: u32) -> Option<u32> {
        self.subscriptions
            .get_mut(&subscription_id)
            .map(|s| s.next_client_handle())
    }

    pub(crate) fn insert_monitored_items(
        &mut self,
        subscription_id: u32,
        items: Vec<MonitoredItem>,
        timestamps_to_return: TimestampsToReturn,
    ) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            for item in items {
                subscription.insert_monitored_item(item, timestamps_to_return);
            }
        }
    }

    pub(crate) fn delete_monitored_items(&mut self, subscription_id: u32, items_to_delete: &[u32]) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            for id in items_to_delete {
                subscription.delete_monitored_item(*id);
            }
        }
    }

    pub(crate) fn set_triggering(
        &mut self,
        subscription_id: u32,
        triggering_item_id: u32,
        links_to_add: &[u32],
        links_to_remove: &[u32],
    ) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.set_triggering(triggering_item_id, links_to_add, links_to_remove);
        }
    }

    pub(crate) fn set_monitoring_mode(
        &mut self,
        subscription_id: u32,
        monitored_item_ids: &[u32],
        monitoring_mode: MonitoringMode,
    ) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            for id in monitored_item_ids {
                if let Some(item) = subscription.monitored_item_mut(*id) {
                    item.set_monitoring_mode(monitoring_mode);
                }
            }
        }
    }

    /// Where `sequence_number` falls for the subscription, or `None` if the subscription is
    /// not known.
    pub(crate) fn check_sequence(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Option<SequenceCheck> {
        self.subscriptions
            .get(&subscription_id)
            .map(|s| check_sequence(s.last_sequence_number(), sequence_number))
    }

    /// A keep-alive carries the sequence number of the next message with data.
    pub(crate) fn handle_keep_alive(&mut self, subscription_id: u32, sequence_number: u32) {
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.set_last_sequence_number(Some(sequence_number.saturating_sub(1)));
        }
    }

    /// Record a notification message and acknowledge it. Returns the job delivering its
    /// notifications to consumers.
    ///
    /// `advance` is false for republished messages, which fill a gap before the last
    /// sequence number.
    pub(crate) fn handle_notification(
        &mut self,
        subscription_id: u32,
        message: &NotificationMessage,
        decoding_options: &DecodingOptions,
        advance: bool,
    ) -> Option<Job> {
        let subscription = self.subscriptions.get_mut(&subscription_id)?;
        if advance {
            subscription.set_last_sequence_number(Some(message.sequence_number));
        }
        let job = subscription.on_notification(message, decoding_options);
        if !message.is_keep_alive() {
            self.add_acknowledgement(subscription_id, message.sequence_number);
        }
        job
    }

    pub(crate) fn data_lost(
        &self,
        subscription_id: u32,
        first_sequence_number: u32,
        count: u32,
        status: StatusCode,
    ) -> Option<Job> {
        self.subscriptions
            .get(&subscription_id)
            .map(|s| s.on_data_lost(first_sequence_number, count, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::session::services::subscriptions::{shared_callback, DataChangeCallback},
        types::{DataValue, DateTime, MonitoredItemNotification},
    };

    fn state_with(ids: &[u32]) -> SubscriptionState {
        let mut state = SubscriptionState::new();
        for id in ids {
            state.add_subscription(Subscription::new(
                *id,
                Duration::from_millis(500),
                60,
                20,
                0,
                0,
                true,
                shared_callback(DataChangeCallback::new(|_, _| {})),
            ));
        }
        state
    }

    fn data(sequence_number: u32) -> NotificationMessage {
        NotificationMessage::data_change(
            sequence_number,
            DateTime::now(),
            vec![MonitoredItemNotification {
                client_handle: 1,
                value: DataValue::new_now(1.5f64),
            }],
            Vec::new(),
        )
    }

    #[test]
    fn notifications_are_acknowledged() {
        let mut state = state_with(&[3]);
        let options = DecodingOptions::default();
        assert!(state.handle_notification(3, &data(1), &options, true).is_some());
        state.handle_keep_alive(3, 2);
        assert!(state.handle_notification(3, &data(2), &options, true).is_some());
        assert_eq!(state.get(3).unwrap().last_sequence_number(), Some(2));

        let acks = state.take_acknowledgements();
        assert_eq!(
            acks.iter().map(|a| a.sequence_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(state.take_acknowledgements().is_empty());

        state.re_queue_acknowledgements(acks);
        assert_eq!(state.take_acknowledgements().len(), 2);
    }

    #[test]
    fn keep_alive_and_gaps() {
        let mut state = state_with(&[3]);
        assert_eq!(state.check_sequence(3, 5), Some(SequenceCheck::InOrder));
        assert_eq!(state.check_sequence(4, 5), None);
        state.handle_keep_alive(3, 5);
        assert_eq!(state.check_sequence(3, 5), Some(SequenceCheck::InOrder));
        assert_eq!(state.check_sequence(3, 7), Some(SequenceCheck::Gap { first: 5, count: 2 }));

        // Republished messages do not move the last sequence number
        state.handle_notification(3, &data(6), &DecodingOptions::default(), false);
        assert_eq!(state.get(3).unwrap().last_sequence_number(), Some(4));
    }

    #[test]
    fn deleted_subscriptions_drop_acknowledgements() {
        let mut state = state_with(&[1, 2]);
        let options = DecodingOptions::default();
        state.handle_notification(1, &data(1), &options, true);
        state.handle_notification(2, &data(1), &options, true);
        assert!(state.delete_subscription(1).is_some());
        let acks = state.take_acknowledgements();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].subscription_id, 2);

        state.delete_subscription(2);
        state.re_queue_acknowledgements(acks);
        assert!(state.take_acknowledgements().is_empty());
        assert!(state.is_empty());
    }

    #[test]
    fn publishing_mode_and_new_ids() {
        let mut state = state_with(&[1, 2]);
        state.set_publishing_mode(&[2], false);
        assert_eq!(state.len_active(), 1);

        state.handle_notification(1, &data(9), &DecodingOptions::default(), true);
        state.replace_subscription_id(1, 11);
        assert!(!state.subscription_exists(1));
        let sub = state.get(11).unwrap();
        assert_eq!(sub.subscription_id(), 11);
        assert_eq!(sub.last_sequence_number(), None);
        assert!(state.take_acknowledgements().is_empty());
    }
}
