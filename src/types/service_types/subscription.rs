// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::*;

ua_struct! {
    CreateSubscriptionRequest => CreateSubscriptionRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        requested_publishing_interval: f64,
        requested_lifetime_count: u32,
        requested_max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        publishing_enabled: bool,
        priority: u8,
    }
}

ua_struct! {
    CreateSubscriptionResponse => CreateSubscriptionResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        subscription_id: u32,
        revised_publishing_interval: f64,
        revised_lifetime_count: u32,
        revised_max_keep_alive_count: u32,
    }
}

ua_struct! {
    ModifySubscriptionRequest => ModifySubscriptionRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        requested_publishing_interval: f64,
        requested_lifetime_count: u32,
        requested_max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
    }
}

ua_struct! {
    ModifySubscriptionResponse => ModifySubscriptionResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        revised_publishing_interval: f64,
        revised_lifetime_count: u32,
        revised_max_keep_alive_count: u32,
    }
}

ua_struct! {
    SetPublishingModeRequest => SetPublishingModeRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        publishing_enabled: bool,
        subscription_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    SetPublishingModeResponse => SetPublishingModeResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<StatusCode>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    DeleteSubscriptionsRequest => DeleteSubscriptionsRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    DeleteSubscriptionsResponse => DeleteSubscriptionsResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<StatusCode>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    TransferSubscriptionsRequest => TransferSubscriptionsRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_ids: Option<Vec<u32>>,
        send_initial_values: bool,
    }
}

ua_struct! {
    TransferResult {
        status_code: StatusCode,
        available_sequence_numbers: Option<Vec<u32>>,
    }
}

ua_struct! {
    TransferSubscriptionsResponse => TransferSubscriptionsResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<TransferResult>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    SubscriptionAcknowledgement {
        subscription_id: u32,
        sequence_number: u32,
    }
}

ua_struct! {
    /// The payload of a publish or republish response. A message without notification data is
    /// a keep-alive.
    NotificationMessage {
        sequence_number: u32,
        publish_time: DateTime,
        notification_data: Option<Vec<ExtensionObject>>,
    }
}

ua_struct! {
    PublishRequest => PublishRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
    }
}

ua_struct! {
    PublishResponse => PublishResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        subscription_id: u32,
        available_sequence_numbers: Option<Vec<u32>>,
        more_notifications: bool,
        notification_message: NotificationMessage,
        results: Option<Vec<StatusCode>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    RepublishRequest => RepublishRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        retransmit_sequence_number: u32,
    }
}

ua_struct! {
    RepublishResponse => RepublishResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        notification_message: NotificationMessage,
    }
}

ua_struct! {
    MonitoredItemNotification {
        client_handle: u32,
        value: DataValue,
    }
}

ua_struct! {
    DataChangeNotification => DataChangeNotification_Encoding_DefaultBinary {
        monitored_items: Option<Vec<MonitoredItemNotification>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    EventFieldList {
        client_handle: u32,
        event_fields: Option<Vec<Variant>>,
    }
}

ua_struct! {
    EventNotificationList => EventNotificationList_Encoding_DefaultBinary {
        events: Option<Vec<EventFieldList>>,
    }
}

ua_struct! {
    /// Sent by the server when the state of a subscription changes, e.g. when it times out.
    StatusChangeNotification => StatusChangeNotification_Encoding_DefaultBinary {
        status: StatusCode,
        diagnostic_info: DiagnosticInfo,
    }
}
