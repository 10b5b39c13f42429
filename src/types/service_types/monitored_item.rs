// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::*;

ua_struct! {
    MonitoringParameters {
        client_handle: u32,
        sampling_interval: f64,
        filter: ExtensionObject,
        queue_size: u32,
        discard_oldest: bool,
    }
}

ua_struct! {
    MonitoredItemCreateRequest {
        item_to_monitor: ReadValueId,
        monitoring_mode: MonitoringMode,
        requested_parameters: MonitoringParameters,
    }
}

impl MonitoredItemCreateRequest {
    pub fn new(
        item_to_monitor: ReadValueId,
        monitoring_mode: MonitoringMode,
        requested_parameters: MonitoringParameters,
    ) -> MonitoredItemCreateRequest {
        MonitoredItemCreateRequest {
            item_to_monitor,
            monitoring_mode,
            requested_parameters,
        }
    }
}

impl From<NodeId> for MonitoredItemCreateRequest {
    /// Reports on the value attribute of the node with default parameters.
    fn from(node_id: NodeId) -> Self {
        MonitoredItemCreateRequest::new(
            ReadValueId::from(node_id),
            MonitoringMode::Reporting,
            MonitoringParameters {
                sampling_interval: -1.0,
                queue_size: 1,
                discard_oldest: true,
                ..Default::default()
            },
        )
    }
}

ua_struct! {
    MonitoredItemCreateResult {
        status_code: StatusCode,
        monitored_item_id: u32,
        revised_sampling_interval: f64,
        revised_queue_size: u32,
        filter_result: ExtensionObject,
    }
}

ua_struct! {
    CreateMonitoredItemsRequest => CreateMonitoredItemsRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
    }
}

ua_struct! {
    CreateMonitoredItemsResponse => CreateMonitoredItemsResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<MonitoredItemCreateResult>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    MonitoredItemModifyRequest {
        monitored_item_id: u32,
        requested_parameters: MonitoringParameters,
    }
}

ua_struct! {
    MonitoredItemModifyResult {
        status_code: StatusCode,
        revised_sampling_interval: f64,
        revised_queue_size: u32,
        filter_result: ExtensionObject,
    }
}

ua_struct! {
    ModifyMonitoredItemsRequest => ModifyMonitoredItemsRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
    }
}

ua_struct! {
    ModifyMonitoredItemsResponse => ModifyMonitoredItemsResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<MonitoredItemModifyResult>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    SetMonitoringModeRequest => SetMonitoringModeRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        monitoring_mode: MonitoringMode,
        monitored_item_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    SetMonitoringModeResponse => SetMonitoringModeResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<StatusCode>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    SetTriggeringRequest => SetTriggeringRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        triggering_item_id: u32,
        links_to_add: Option<Vec<u32>>,
        links_to_remove: Option<Vec<u32>>,
    }
}

ua_struct! {
    SetTriggeringResponse => SetTriggeringResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        add_results: Option<Vec<StatusCode>>,
        add_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        remove_results: Option<Vec<StatusCode>>,
        remove_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    DeleteMonitoredItemsRequest => DeleteMonitoredItemsRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        subscription_id: u32,
        monitored_item_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    DeleteMonitoredItemsResponse => DeleteMonitoredItemsResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<StatusCode>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// Filter for a data change monitored item.
    DataChangeFilter => DataChangeFilter_Encoding_DefaultBinary {
        trigger: DataChangeTrigger,
        deadband_type: u32,
        deadband_value: f64,
    }
}
