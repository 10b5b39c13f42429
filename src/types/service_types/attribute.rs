// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::*;

ua_struct! {
    ReadValueId {
        node_id: NodeId,
        attribute_id: u32,
        index_range: UAString,
        data_encoding: QualifiedName,
    }
}

impl From<NodeId> for ReadValueId {
    /// Reads the value attribute of the node.
    fn from(node_id: NodeId) -> Self {
        ReadValueId {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        }
    }
}

impl From<VariableId> for ReadValueId {
    fn from(variable_id: VariableId) -> Self {
        ReadValueId::from(NodeId::from(variable_id))
    }
}

ua_struct! {
    ReadRequest => ReadRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        /// Maximum age of a cached value in milliseconds
        max_age: f64,
        timestamps_to_return: TimestampsToReturn,
        nodes_to_read: Option<Vec<ReadValueId>>,
    }
}

ua_struct! {
    ReadResponse => ReadResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        results: Option<Vec<DataValue>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}
