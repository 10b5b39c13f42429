// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Helpers for building and unpacking `NotificationMessage`.

use crate::types::{
    basic_types::DiagnosticInfo,
    date_time::DateTime,
    encoding::DecodingOptions,
    extension_object::ExtensionObject,
    node_ids::ObjectId,
    service_types::{
        DataChangeNotification, EventFieldList, EventNotificationList, MonitoredItemNotification,
        NotificationMessage, StatusChangeNotification,
    },
    status_code::StatusCode,
};

/// The decoded notification data of a single notification message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notifications {
    pub data_changes: Vec<DataChangeNotification>,
    pub events: Vec<EventNotificationList>,
    pub status_changes: Vec<StatusChangeNotification>,
}

impl Notifications {
    pub fn is_empty(&self) -> bool {
        self.data_changes.is_empty() && self.events.is_empty() && self.status_changes.is_empty()
    }
}

impl NotificationMessage {
    /// Create a notification message which contains data changes and / or events. Notification
    /// data holds up to 2 elements, one for data and one for events.
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTime,
        data_change_notifications: Vec<MonitoredItemNotification>,
        event_notifications: Vec<EventFieldList>,
    ) -> NotificationMessage {
        let mut notification_data = Vec::with_capacity(2);
        if !data_change_notifications.is_empty() {
            let data_change_notification = DataChangeNotification {
                monitored_items: Some(data_change_notifications),
                diagnostic_infos: None,
            };
            notification_data.push(ExtensionObject::from_encodable(
                ObjectId::DataChangeNotification_Encoding_DefaultBinary,
                &data_change_notification,
            ));
        }
        if !event_notifications.is_empty() {
            let event_notification_list = EventNotificationList {
                events: Some(event_notifications),
            };
            notification_data.push(ExtensionObject::from_encodable(
                ObjectId::EventNotificationList_Encoding_DefaultBinary,
                &event_notification_list,
            ));
        }
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: if notification_data.is_empty() {
                None
            } else {
                Some(notification_data)
            },
        }
    }

    /// Create a status change notification message
    pub fn status_change(
        sequence_number: u32,
        publish_time: DateTime,
        status: StatusCode,
    ) -> NotificationMessage {
        let status_change_notification = StatusChangeNotification {
            status,
            diagnostic_info: DiagnosticInfo::null(),
        };
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(vec![ExtensionObject::from_encodable(
                ObjectId::StatusChangeNotification_Encoding_DefaultBinary,
                &status_change_notification,
            )]),
        }
    }

    /// Create a keep-alive notification message
    pub fn keep_alive(sequence_number: u32, publish_time: DateTime) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }

    /// A message with no notification data is a keep-alive.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map(|d| d.is_empty())
            .unwrap_or(true)
    }

    fn process_notification(
        n: &ExtensionObject,
        decoding_options: &DecodingOptions,
        notifications: &mut Notifications,
    ) {
        match n.object_id() {
            Ok(ObjectId::DataChangeNotification_Encoding_DefaultBinary) => {
                match n.decode_inner::<DataChangeNotification>(decoding_options) {
                    Ok(v) => notifications.data_changes.push(v),
                    Err(err) => error!("Cannot decode data change notification, {}", err),
                }
            }
            Ok(ObjectId::EventNotificationList_Encoding_DefaultBinary) => {
                match n.decode_inner::<EventNotificationList>(decoding_options) {
                    Ok(v) => notifications.events.push(v),
                    Err(err) => error!("Cannot decode event notification list, {}", err),
                }
            }
            Ok(ObjectId::StatusChangeNotification_Encoding_DefaultBinary) => {
                match n.decode_inner::<StatusChangeNotification>(decoding_options) {
                    Ok(v) => notifications.status_changes.push(v),
                    Err(err) => error!("Cannot decode status change notification, {}", err),
                }
            }
            _ => {
                debug!("Ignoring a notification of type {:?}", n.node_id);
            }
        }
    }

    /// Extract notifications from the message. Unrecognized or unparseable notifications are
    /// ignored. Returns `None` if nothing could be extracted.
    pub fn notifications(&self, decoding_options: &DecodingOptions) -> Option<Notifications> {
        let notification_data = self.notification_data.as_ref()?;
        let mut notifications = Notifications::default();
        notification_data.iter().for_each(|n| {
            Self::process_notification(n, decoding_options, &mut notifications);
        });
        if notifications.is_empty() {
            None
        } else {
            Some(notifications)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{data_value::DataValue, variant::Variant};

    #[test]
    fn data_change_and_events() {
        let message = NotificationMessage::data_change(
            3,
            DateTime::now(),
            vec![MonitoredItemNotification {
                client_handle: 10,
                value: DataValue::new_now(5i32),
            }],
            vec![EventFieldList {
                client_handle: 11,
                event_fields: Some(vec![Variant::from("event")]),
            }],
        );
        assert!(!message.is_keep_alive());
        let notifications = message
            .notifications(&DecodingOptions::default())
            .unwrap();
        assert_eq!(notifications.data_changes.len(), 1);
        assert_eq!(notifications.events.len(), 1);
        assert!(notifications.status_changes.is_empty());
        let items = notifications.data_changes[0].monitored_items.as_ref().unwrap();
        assert_eq!(items[0].client_handle, 10);
    }

    #[test]
    fn status_change() {
        let message =
            NotificationMessage::status_change(1, DateTime::now(), StatusCode::BadTimeout);
        let notifications = message
            .notifications(&DecodingOptions::default())
            .unwrap();
        assert_eq!(notifications.status_changes[0].status, StatusCode::BadTimeout);
    }

    #[test]
    fn keep_alive() {
        let message = NotificationMessage::keep_alive(4, DateTime::now());
        assert!(message.is_keep_alive());
        assert!(message.notifications(&DecodingOptions::default()).is_none());
        let empty = NotificationMessage::data_change(4, DateTime::now(), vec![], vec![]);
        assert!(empty.is_keep_alive());
    }
}
