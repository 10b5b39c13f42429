// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Subscription and monitored item services. The local subscription state only changes for
//! the operations the server reports as good.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    client::session::{
        expect_response, listeners::Dispatch, process_unexpected_response, session_debug,
        session_error, session_trace, session_warn, Session,
    },
    core::supported_message::SupportedMessage,
    sync::Mutex,
    types::{
        CreateMonitoredItemsRequest, CreateSubscriptionRequest, CreateSubscriptionResponse,
        DeleteMonitoredItemsRequest, DeleteSubscriptionsRequest, ModifyMonitoredItemsRequest,
        ModifySubscriptionRequest, MonitoredItemCreateRequest, MonitoredItemCreateResult,
        MonitoredItemModifyRequest, MonitoredItemModifyResult, MonitoringMode, NotificationMessage,
        PublishRequest, PublishResponse, RepublishRequest, SetMonitoringModeRequest,
        SetPublishingModeRequest, SetTriggeringRequest, StatusCode, SubscriptionAcknowledgement,
        TimestampsToReturn,
        TransferResult, TransferSubscriptionsRequest,
    },
};

use super::{
    advance_sequence_number, sequence_numbers, shared_callback, state::SubscriptionState,
    MonitoredItem, OnSubscriptionNotification, SequenceCheck, SharedCallback, Subscription,
};

/// Republish requests sent for one gap. Older missing messages are reported lost unasked.
const MAX_REPUBLISH_PER_GAP: u32 = 16;

/// Revised publishing intervals are in milliseconds and may be negative or fractional.
fn interval_from_millis(millis: f64) -> Duration {
    Duration::from_millis(millis.max(0.0).floor() as u64)
}

/// The ids whose operation the server reports as good. `results` is parallel to `ids`.
fn accepted(ids: &[u32], results: &[StatusCode]) -> Vec<u32> {
    ids.iter()
        .zip(results)
        .filter(|(_, status)| status.is_good())
        .map(|(id, _)| *id)
        .collect()
}

/// Revisable parameters of a subscription, in the order the services take them.
struct SubscriptionParameters {
    publishing_interval: Duration,
    lifetime_count: u32,
    max_keep_alive_count: u32,
    max_notifications_per_publish: u32,
    priority: u8,
    publishing_enabled: bool,
}

impl SubscriptionParameters {
    fn of(subscription: &Subscription) -> Self {
        Self {
            publishing_interval: subscription.publishing_interval(),
            lifetime_count: subscription.lifetime_count(),
            max_keep_alive_count: subscription.max_keep_alive_count(),
            max_notifications_per_publish: subscription.max_notifications_per_publish(),
            priority: subscription.priority(),
            publishing_enabled: subscription.publishing_enabled(),
        }
    }
}

/// Acknowledgements carried by a publish request. Unless the server accepted the request they
/// go back into the queue when this is dropped.
struct InflightAcknowledgements<'a> {
    subscription_state: &'a Mutex<SubscriptionState>,
    acks: Vec<SubscriptionAcknowledgement>,
}

impl<'a> InflightAcknowledgements<'a> {
    fn take(subscription_state: &'a Mutex<SubscriptionState>) -> Self {
        let acks = trace_lock!(subscription_state).take_acknowledgements();
        Self {
            subscription_state,
            acks,
        }
    }

    fn delivered(mut self) {
        self.acks.clear();
    }
}

impl Drop for InflightAcknowledgements<'_> {
    fn drop(&mut self) {
        if !self.acks.is_empty() {
            let acks = std::mem::take(&mut self.acks);
            trace_lock!(self.subscription_state).re_queue_acknowledgements(acks);
        }
    }
}

impl Session {
    async fn send_create_subscription(
        &self,
        params: &SubscriptionParameters,
    ) -> Result<Box<CreateSubscriptionResponse>, StatusCode> {
        let request = CreateSubscriptionRequest {
            request_header: self.make_request_header(),
            requested_publishing_interval: params.publishing_interval.as_millis() as f64,
            requested_lifetime_count: params.lifetime_count,
            requested_max_keep_alive_count: params.max_keep_alive_count,
            max_notifications_per_publish: params.max_notifications_per_publish,
            publishing_enabled: params.publishing_enabled,
            priority: params.priority,
        };
        Ok(expect_response!(self.send(request).await?, CreateSubscriptionResponse))
    }

    /// Creates a subscription on the server and registers it locally with the values the
    /// server revised. Returns the subscription id.
    ///
    /// A publishing interval of 0 asks for the fastest the server supports. The lifetime count
    /// should be at least three times the keep alive count. `max_notifications_per_publish` of
    /// 0 means no limit. `callback` receives the notifications of items without a consumer of
    /// their own.
    ///
    /// See OPC UA Part 4 - Services 5.13.2.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_subscription(
        &self,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
        publishing_enabled: bool,
        callback: impl OnSubscriptionNotification + 'static,
    ) -> Result<u32, StatusCode> {
        let response = self
            .send_create_subscription(&SubscriptionParameters {
                publishing_interval,
                lifetime_count,
                max_keep_alive_count,
                max_notifications_per_publish,
                priority,
                publishing_enabled,
            })
            .await?;
        let subscription_id = response.subscription_id;

        trace_lock!(self.subscription_state).add_subscription(Subscription::new(
            subscription_id,
            interval_from_millis(response.revised_publishing_interval),
            response.revised_lifetime_count,
            response.revised_max_keep_alive_count,
            max_notifications_per_publish,
            priority,
            publishing_enabled,
            shared_callback(callback),
        ));
        // The publish loop may be idle for want of subscriptions
        let _ = self.trigger_publish_tx.send(Instant::now());

        session_debug!(self, "Created subscription {}", subscription_id);
        Ok(subscription_id)
    }

    /// Fails unless the id names one of this session's subscriptions. Id 0 is never valid.
    fn check_subscription(&self, operation: &str, subscription_id: u32) -> Result<(), StatusCode> {
        if subscription_id == 0 {
            session_error!(self, "{}, subscription id 0 is invalid", operation);
            return Err(StatusCode::BadInvalidArgument);
        }
        if trace_lock!(self.subscription_state).subscription_exists(subscription_id) {
            Ok(())
        } else {
            session_error!(self, "{}, no subscription {}", operation, subscription_id);
            Err(StatusCode::BadSubscriptionIdInvalid)
        }
    }

    /// Changes the parameters of a subscription. The values the server revised are stored on
    /// the subscription. See [`Session::create_subscription`] for the arguments.
    ///
    /// See OPC UA Part 4 - Services 5.13.3.
    pub async fn modify_subscription(
        &self,
        subscription_id: u32,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
    ) -> Result<(), StatusCode> {
        self.check_subscription("modify_subscription", subscription_id)?;

        let request = ModifySubscriptionRequest {
            request_header: self.make_request_header(),
            subscription_id,
            requested_publishing_interval: publishing_interval.as_millis() as f64,
            requested_lifetime_count: lifetime_count,
            requested_max_keep_alive_count: max_keep_alive_count,
            max_notifications_per_publish,
            priority,
        };
        let response = expect_response!(self.send(request).await?, ModifySubscriptionResponse);
        trace_lock!(self.subscription_state).modify_subscription(
            subscription_id,
            interval_from_millis(response.revised_publishing_interval),
            response.revised_lifetime_count,
            response.revised_max_keep_alive_count,
            max_notifications_per_publish,
            priority,
        );
        session_debug!(self, "Modified subscription {}", subscription_id);
        Ok(())
    }

    /// Enables or disables publishing on subscriptions. Returns a status for each id.
    ///
    /// See OPC UA Part 4 - Services 5.13.4.
    pub async fn set_publishing_mode(
        &self,
        subscription_ids: &[u32],
        publishing_enabled: bool,
    ) -> Result<Vec<StatusCode>, StatusCode> {
        if subscription_ids.is_empty() {
            session_error!(self, "set_publishing_mode, no subscription ids");
            return Err(StatusCode::BadNothingToDo);
        }
        session_debug!(
            self,
            "Publishing enabled = {} for {:?}",
            publishing_enabled,
            subscription_ids
        );

        let request = SetPublishingModeRequest {
            request_header: self.make_request_header(),
            publishing_enabled,
            subscription_ids: Some(subscription_ids.to_vec()),
        };
        let response = expect_response!(self.send(request).await?, SetPublishingModeResponse);
        let results = response.results.unwrap_or_default();
        trace_lock!(self.subscription_state)
            .set_publishing_mode(&accepted(subscription_ids, &results), publishing_enabled);
        Ok(results)
    }

    /// Transfers subscriptions of another session to this one. With `send_initial_values` the
    /// first publish response of each carries the current value of every item.
    ///
    /// Only the server side changes, the subscriptions are not registered locally. After a
    /// session has been recreated the session transfers its own subscriptions without help.
    ///
    /// See OPC UA Part 4 - Services 5.13.7.
    pub async fn transfer_subscriptions(
        &self,
        subscription_ids: &[u32],
        send_initial_values: bool,
    ) -> Result<Vec<TransferResult>, StatusCode> {
        if subscription_ids.is_empty() {
            session_error!(self, "transfer_subscriptions, no subscription ids");
            return Err(StatusCode::BadNothingToDo);
        }

        let request = TransferSubscriptionsRequest {
            request_header: self.make_request_header(),
            subscription_ids: Some(subscription_ids.to_vec()),
            send_initial_values,
        };
        let response = expect_response!(self.send(request).await?, TransferSubscriptionsResponse);
        Ok(response.results.unwrap_or_default())
    }

    /// Deletes one subscription and returns the server's status for it.
    pub async fn delete_subscription(
        &self,
        subscription_id: u32,
    ) -> Result<StatusCode, StatusCode> {
        self.check_subscription("delete_subscription", subscription_id)?;
        let results = self.delete_subscriptions(&[subscription_id]).await?;
        Ok(results
            .first()
            .copied()
            .unwrap_or(StatusCode::BadUnknownResponse))
    }

    /// Deletes subscriptions, returning a status for each id. Those deleted on the server are
    /// dropped locally along with their monitored items.
    ///
    /// See OPC UA Part 4 - Services 5.13.8.
    pub async fn delete_subscriptions(
        &self,
        subscription_ids: &[u32],
    ) -> Result<Vec<StatusCode>, StatusCode> {
        if subscription_ids.is_empty() {
            session_trace!(self, "delete_subscriptions, nothing to delete");
            return Err(StatusCode::BadNothingToDo);
        }

        let request = DeleteSubscriptionsRequest {
            request_header: self.make_request_header(),
            subscription_ids: Some(subscription_ids.to_vec()),
        };
        let response = expect_response!(self.send(request).await?, DeleteSubscriptionsResponse);
        let results = response.results.unwrap_or_default();
        {
            let mut subscription_state = trace_lock!(self.subscription_state);
            for id in accepted(subscription_ids, &results) {
                let _ = subscription_state.delete_subscription(id);
            }
        }
        Ok(results)
    }

    async fn create_monitored_items_inner(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        mut items: Vec<(MonitoredItemCreateRequest, Option<SharedCallback>)>,
    ) -> Result<Vec<MonitoredItemCreateResult>, StatusCode> {
        self.check_subscription("create_monitored_items", subscription_id)?;
        if items.is_empty() {
            session_error!(self, "create_monitored_items, no items");
            return Err(StatusCode::BadNothingToDo);
        }

        {
            let mut subscription_state = trace_lock!(self.subscription_state);
            for (request, _) in items.iter_mut() {
                let parameters = &mut request.requested_parameters;
                if parameters.client_handle == 0 {
                    parameters.client_handle = subscription_state
                        .next_client_handle(subscription_id)
                        .ok_or(StatusCode::BadSubscriptionIdInvalid)?;
                }
            }
        }

        let request = CreateMonitoredItemsRequest {
            request_header: self.make_request_header(),
            subscription_id,
            timestamps_to_return,
            items_to_create: Some(items.iter().map(|(r, _)| r.clone()).collect()),
        };
        let response = expect_response!(self.send(request).await?, CreateMonitoredItemsResponse);
        let results = response.results.unwrap_or_default();

        let created: Vec<MonitoredItem> = items
            .into_iter()
            .zip(&results)
            .filter(|(_, result)| result.status_code.is_good())
            .map(|((request, consumer), result)| {
                MonitoredItem::new(
                    result.monitored_item_id,
                    &request,
                    result.revised_sampling_interval,
                    result.revised_queue_size,
                    result.filter_result.clone(),
                    consumer,
                )
            })
            .collect();
        session_debug!(
            self,
            "Subscription {} has {} of {} new items",
            subscription_id,
            created.len(),
            results.len()
        );
        trace_lock!(self.subscription_state).insert_monitored_items(
            subscription_id,
            created,
            timestamps_to_return,
        );
        Ok(results)
    }

    /// Creates monitored items on a subscription. The results are in the order of
    /// `items_to_create`.
    ///
    /// An item requesting client handle 0 gets one that no other item of the subscription has
    /// had. Notifications of these items go to the callback of the subscription.
    ///
    /// See OPC UA Part 4 - Services 5.12.2.
    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: Vec<MonitoredItemCreateRequest>,
    ) -> Result<Vec<MonitoredItemCreateResult>, StatusCode> {
        let items = items_to_create.into_iter().map(|r| (r, None)).collect();
        self.create_monitored_items_inner(subscription_id, timestamps_to_return, items)
            .await
    }

    /// Like [`Session::create_monitored_items`], with a consumer of its own for each item.
    pub async fn create_monitored_items_with_consumers(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: Vec<(MonitoredItemCreateRequest, Box<dyn OnSubscriptionNotification>)>,
    ) -> Result<Vec<MonitoredItemCreateResult>, StatusCode> {
        let items = items_to_create
            .into_iter()
            .map(|(r, c)| (r, Some(Arc::new(Mutex::new(c)) as SharedCallback)))
            .collect();
        self.create_monitored_items_inner(subscription_id, timestamps_to_return, items)
            .await
    }

    /// Changes the sampling interval, queue size and filter of monitored items. Items the
    /// server modified take the revised values.
    ///
    /// See OPC UA Part 4 - Services 5.12.3.
    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_modify: &[MonitoredItemModifyRequest],
    ) -> Result<Vec<MonitoredItemModifyResult>, StatusCode> {
        self.check_subscription("modify_monitored_items", subscription_id)?;
        if items_to_modify.is_empty() {
            session_error!(self, "modify_monitored_items, no items");
            return Err(StatusCode::BadNothingToDo);
        }

        let request = ModifyMonitoredItemsRequest {
            request_header: self.make_request_header(),
            subscription_id,
            timestamps_to_return,
            items_to_modify: Some(items_to_modify.to_vec()),
        };
        let response = expect_response!(self.send(request).await?, ModifyMonitoredItemsResponse);
        let results = response.results.unwrap_or_default();

        let mut subscription_state = trace_lock!(self.subscription_state);
        if let Some(subscription) = subscription_state.get_mut(subscription_id) {
            let modified = items_to_modify
                .iter()
                .zip(&results)
                .filter(|(_, result)| result.status_code.is_good());
            for (request, result) in modified {
                let Some(item) = subscription.monitored_item_mut(request.monitored_item_id) else {
                    continue;
                };
                item.set_sampling_interval(result.revised_sampling_interval);
                item.set_queue_size(result.revised_queue_size);
                item.set_filter(
                    request.requested_parameters.filter.clone(),
                    result.filter_result.clone(),
                );
            }
        }
        Ok(results)
    }

    /// Sets the monitoring mode of monitored items, returning a status for each.
    ///
    /// See OPC UA Part 4 - Services 5.12.4.
    pub async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        monitoring_mode: MonitoringMode,
        monitored_item_ids: &[u32],
    ) -> Result<Vec<StatusCode>, StatusCode> {
        self.check_subscription("set_monitoring_mode", subscription_id)?;
        if monitored_item_ids.is_empty() {
            session_error!(self, "set_monitoring_mode, no items");
            return Err(StatusCode::BadNothingToDo);
        }

        let request = SetMonitoringModeRequest {
            request_header: self.make_request_header(),
            subscription_id,
            monitoring_mode,
            monitored_item_ids: Some(monitored_item_ids.to_vec()),
        };
        let response = expect_response!(self.send(request).await?, SetMonitoringModeResponse);
        let results = response.results.unwrap_or_default();
        trace_lock!(self.subscription_state).set_monitoring_mode(
            subscription_id,
            &accepted(monitored_item_ids, &results),
            monitoring_mode,
        );
        Ok(results)
    }

    /// Adds and removes the items that report along with `triggering_item_id`. Removals are
    /// processed before additions. Returns the results for the additions and the removals.
    ///
    /// See OPC UA Part 4 - Services 5.12.5.
    pub async fn set_triggering(
        &self,
        subscription_id: u32,
        triggering_item_id: u32,
        links_to_add: &[u32],
        links_to_remove: &[u32],
    ) -> Result<(Option<Vec<StatusCode>>, Option<Vec<StatusCode>>), StatusCode> {
        self.check_subscription("set_triggering", subscription_id)?;
        if links_to_add.is_empty() && links_to_remove.is_empty() {
            session_error!(self, "set_triggering, no links to add or remove");
            return Err(StatusCode::BadNothingToDo);
        }

        let non_empty = |links: &[u32]| (!links.is_empty()).then(|| links.to_vec());
        let request = SetTriggeringRequest {
            request_header: self.make_request_header(),
            subscription_id,
            triggering_item_id,
            links_to_add: non_empty(links_to_add),
            links_to_remove: non_empty(links_to_remove),
        };
        let response = expect_response!(self.send(request).await?, SetTriggeringResponse);
        let added = accepted(links_to_add, response.add_results.as_deref().unwrap_or_default());
        let removed = accepted(
            links_to_remove,
            response.remove_results.as_deref().unwrap_or_default(),
        );
        trace_lock!(self.subscription_state).set_triggering(
            subscription_id,
            triggering_item_id,
            &added,
            &removed,
        );
        Ok((response.add_results, response.remove_results))
    }

    /// Deletes monitored items from a subscription, returning a status for each.
    ///
    /// See OPC UA Part 4 - Services 5.12.6.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        items_to_delete: &[u32],
    ) -> Result<Vec<StatusCode>, StatusCode> {
        self.check_subscription("delete_monitored_items", subscription_id)?;
        if items_to_delete.is_empty() {
            session_error!(self, "delete_monitored_items, no items");
            return Err(StatusCode::BadNothingToDo);
        }

        let request = DeleteMonitoredItemsRequest {
            request_header: self.make_request_header(),
            subscription_id,
            monitored_item_ids: Some(items_to_delete.to_vec()),
        };
        let response = expect_response!(self.send(request).await?, DeleteMonitoredItemsResponse);
        let results = response.results.unwrap_or_default();
        trace_lock!(self.subscription_state)
            .delete_monitored_items(subscription_id, &accepted(items_to_delete, &results));
        Ok(results)
    }

    pub(crate) fn has_subscriptions(&self) -> bool {
        let subscription_state = trace_lock!(self.subscription_state);
        !subscription_state.is_empty()
    }

    /// The ids of the subscriptions of the session. A subscription that had to be created again
    /// after the session was recreated is listed under its new id.
    pub fn subscription_ids(&self) -> Vec<u32> {
        let subscription_state = trace_lock!(self.subscription_state);
        subscription_state.subscription_ids().unwrap_or_default()
    }

    /// Inspect a subscription. `f` runs with the subscription state locked, so it must not call
    /// back into the session.
    pub fn with_subscription<T>(
        &self,
        subscription_id: u32,
        f: impl FnOnce(&Subscription) -> T,
    ) -> Option<T> {
        let subscription_state = trace_lock!(self.subscription_state);
        subscription_state.get(subscription_id).map(f)
    }

    /// Send a publish request carrying the pending acknowledgements, and wait for the
    /// response. The acknowledgements are queued again unless the server accepted the request,
    /// which covers a request dropped before it was answered.
    pub(crate) async fn publish(&self) -> Result<Box<PublishResponse>, StatusCode> {
        let acks = InflightAcknowledgements::take(&self.subscription_state);

        if log_enabled!(log::Level::Debug) && !acks.acks.is_empty() {
            let sequence_nrs: Vec<u32> = acks.acks.iter().map(|ack| ack.sequence_number).collect();
            session_debug!(
                self,
                "publish is acknowledging sequence nrs {:?}",
                sequence_nrs
            );
        }

        let request = PublishRequest {
            request_header: self.channel.make_request_header(self.publish_timeout),
            subscription_acknowledgements: (!acks.acks.is_empty()).then(|| acks.acks.clone()),
        };

        match self.send_with_timeout(request, self.publish_timeout).await {
            Ok(SupportedMessage::PublishResponse(r)) if r.response_header.service_result.is_good() => {
                session_trace!(self, "PublishResponse for subscription {}", r.subscription_id);
                for (ack, status) in acks.acks.iter().zip(r.results.iter().flatten()) {
                    if status.is_bad() {
                        session_debug!(
                            self,
                            "Acknowledgement of {} for subscription {} failed: {}",
                            ack.sequence_number,
                            ack.subscription_id,
                            status
                        );
                    }
                }
                acks.delivered();
                Ok(r)
            }
            Ok(SupportedMessage::PublishResponse(r)) => Err(r.response_header.service_result),
            Ok(SupportedMessage::ServiceFault(f)) => Err(f.response_header.service_result),
            Ok(r) => {
                session_error!(self, "publish failed {:?}", r);
                Err(process_unexpected_response(r))
            }
            Err(e) => Err(e),
        }
    }

    /// Asks the server for a notification message again. Fails with `BadMessageNotAvailable`
    /// once the server no longer holds it.
    ///
    /// See OPC UA Part 4 - Services 5.13.6.
    pub async fn republish(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage, StatusCode> {
        let request = RepublishRequest {
            request_header: self.make_request_header(),
            subscription_id,
            retransmit_sequence_number: sequence_number,
        };
        let response = expect_response!(self.send(request).await?, RepublishResponse);
        session_debug!(
            self,
            "Republished {} of subscription {}",
            sequence_number,
            subscription_id
        );
        Ok(response.notification_message)
    }

    /// Hand the notifications of a message to the dispatcher task.
    fn dispatch_notification(&self, subscription_id: u32, message: &NotificationMessage, advance: bool) {
        let decoding_options = self.channel.decoding_options();
        let job = {
            let mut subscription_state = trace_lock!(self.subscription_state);
            subscription_state.handle_notification(
                subscription_id,
                message,
                &decoding_options,
                advance,
            )
        };
        if let Some(job) = job {
            self.listeners.dispatch(Dispatch::Job(job));
        }
    }

    fn report_data_lost(
        &self,
        subscription_id: u32,
        first_sequence_number: u32,
        count: u32,
        status: StatusCode,
    ) {
        let job = {
            let subscription_state = trace_lock!(self.subscription_state);
            subscription_state.data_lost(subscription_id, first_sequence_number, count, status)
        };
        if let Some(job) = job {
            self.listeners.dispatch(Dispatch::Job(job));
        }
    }

    /// Process one publish response. Messages the server skipped are republished and
    /// delivered first, in order. Those that cannot be republished are reported as lost.
    pub(crate) async fn handle_publish_response(&self, response: Box<PublishResponse>) {
        let PublishResponse {
            subscription_id,
            notification_message: message,
            ..
        } = *response;

        let check = {
            let subscription_state = trace_lock!(self.subscription_state);
            subscription_state.check_sequence(subscription_id, message.sequence_number)
        };
        let Some(check) = check else {
            session_debug!(
                self,
                "Ignoring publish response for unknown subscription {}",
                subscription_id
            );
            return;
        };

        match check {
            SequenceCheck::InOrder => {}
            SequenceCheck::Restart => {
                session_debug!(
                    self,
                    "Subscription {} restarted numbering at {}",
                    subscription_id,
                    message.sequence_number
                );
            }
            SequenceCheck::Gap { first, count } => {
                session_warn!(
                    self,
                    "Subscription {} skipped {} sequence number(s) from {}, republishing",
                    subscription_id,
                    count,
                    first
                );
                // Only the most recent messages are asked for, the server is the most likely
                // to still hold those
                let unrequested = count.saturating_sub(MAX_REPUBLISH_PER_GAP);
                if unrequested > 0 {
                    session_warn!(
                        self,
                        "{} notification(s) of subscription {} from {} are not republished",
                        unrequested,
                        subscription_id,
                        first
                    );
                    self.report_data_lost(
                        subscription_id,
                        first,
                        unrequested,
                        StatusCode::BadTooManyOperations,
                    );
                }
                let first_requested = advance_sequence_number(first, unrequested);
                for sequence_number in sequence_numbers(first_requested, count - unrequested) {
                    match self.republish(subscription_id, sequence_number).await {
                        Ok(republished) => {
                            self.dispatch_notification(subscription_id, &republished, false)
                        }
                        Err(status) => {
                            session_warn!(
                                self,
                                "Notification {} of subscription {} is lost: {}",
                                sequence_number,
                                subscription_id,
                                status
                            );
                            self.report_data_lost(subscription_id, sequence_number, 1, status);
                        }
                    }
                }
            }
        }

        if message.is_keep_alive() {
            let mut subscription_state = trace_lock!(self.subscription_state);
            subscription_state.handle_keep_alive(subscription_id, message.sequence_number);
        } else {
            self.dispatch_notification(subscription_id, &message, true);
        }
    }

    /// Move the subscriptions of the previous session onto the current one. Those the server
    /// cannot transfer are created again, keeping their items, client handles and consumers.
    pub(crate) async fn transfer_subscriptions_from_old_session(&self) {
        let subscription_ids = {
            let subscription_state = trace_lock!(self.subscription_state);
            subscription_state.subscription_ids()
        };
        let Some(subscription_ids) = subscription_ids else {
            return;
        };

        let mut to_recreate = subscription_ids.clone();
        match self.transfer_subscriptions(&subscription_ids, true).await {
            Ok(results) => {
                session_debug!(self, "transfer_results = {:?}", results);
                to_recreate = subscription_ids
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !results.get(*i).is_some_and(|r| r.status_code.is_good()))
                    .map(|(_, id)| *id)
                    .collect();
            }
            Err(e) => {
                session_debug!(self, "transfer_subscriptions failed: {}", e);
            }
        }

        if !to_recreate.is_empty() {
            session_warn!(
                self,
                "{} of {} subscriptions could not be transferred and are created again",
                to_recreate.len(),
                subscription_ids.len()
            );
        }

        for subscription_id in to_recreate {
            if let Err(e) = self.recreate_subscription(subscription_id).await {
                session_warn!(
                    self,
                    "Could not create subscription {} again: {}",
                    subscription_id,
                    e
                );
            }
        }
    }

    async fn recreate_subscription(&self, old_id: u32) -> Result<(), StatusCode> {
        let params = {
            let subscription_state = trace_lock!(self.subscription_state);
            subscription_state.get(old_id).map(SubscriptionParameters::of)
        };
        let Some(params) = params else {
            session_warn!(self, "Subscription {} removed while reconnecting", old_id);
            return Ok(());
        };

        let response = match self.send_create_subscription(&params).await {
            Ok(r) => r,
            Err(e) => {
                // Without a server side subscription the local one would never publish
                let _ = trace_lock!(self.subscription_state).delete_subscription(old_id);
                return Err(e);
            }
        };
        let new_id = response.subscription_id;

        let (items, timestamps_to_return) = {
            let mut subscription_state = trace_lock!(self.subscription_state);
            subscription_state.replace_subscription_id(old_id, new_id);
            subscription_state.modify_subscription(
                new_id,
                interval_from_millis(response.revised_publishing_interval),
                response.revised_lifetime_count,
                response.revised_max_keep_alive_count,
                params.max_notifications_per_publish,
                params.priority,
            );
            match subscription_state.get_mut(new_id) {
                Some(s) => (s.take_monitored_items(), s.timestamps_to_return()),
                None => return Ok(()),
            }
        };
        session_debug!(
            self,
            "Subscription {} is now {}, creating {} items",
            old_id,
            new_id,
            items.len()
        );

        let mut recreated = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.recreate_monitored_items_chunk) {
            let request = CreateMonitoredItemsRequest {
                request_header: self.make_request_header(),
                subscription_id: new_id,
                timestamps_to_return,
                items_to_create: Some(chunk.iter().map(|i| i.to_create_request()).collect()),
            };
            let results = match self.send(request).await {
                Ok(SupportedMessage::CreateMonitoredItemsResponse(r))
                    if r.response_header.service_result.is_good() =>
                {
                    r.results.unwrap_or_default()
                }
                Ok(r) => {
                    session_warn!(self, "Could not create monitored items again: {:?}", r);
                    continue;
                }
                Err(e) => {
                    session_warn!(self, "Could not create monitored items again: {}", e);
                    continue;
                }
            };
            for (item, result) in chunk.iter().zip(results.iter()) {
                if result.status_code.is_good() {
                    let mut item = item.clone();
                    item.set_id(result.monitored_item_id);
                    item.set_sampling_interval(result.revised_sampling_interval);
                    item.set_queue_size(result.revised_queue_size);
                    recreated.push(item);
                } else {
                    session_warn!(
                        self,
                        "Monitored item {} could not be created again: {}",
                        item.client_handle(),
                        result.status_code
                    );
                }
            }
        }

        // Triggering links are by server id, which changed with the items
        let links: Vec<(u32, Vec<u32>)> = {
            let mut subscription_state = trace_lock!(self.subscription_state);
            let Some(subscription) = subscription_state.get_mut(new_id) else {
                return Ok(());
            };
            subscription.restore_monitored_items(recreated);
            subscription
                .monitored_items()
                .values()
                .filter(|i| !i.triggered_items().is_empty())
                .map(|i| {
                    let targets = i
                        .triggered_items()
                        .iter()
                        .filter_map(|h| subscription.monitored_items().get(h).map(|t| t.id()))
                        .collect();
                    (i.id(), targets)
                })
                .collect()
        };
        for (triggering_item_id, links_to_add) in links {
            if let Err(e) = self
                .set_triggering(new_id, triggering_item_id, &links_to_add, &[])
                .await
            {
                session_warn!(self, "Could not restore triggering links: {}", e);
            }
        }

        let _ = self.trigger_publish_tx.send(Instant::now());
        Ok(())
    }
}
