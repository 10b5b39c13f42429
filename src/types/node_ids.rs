// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Well known numeric node ids in namespace 0 used by the client core.

#![allow(non_camel_case_types)]

use std::convert::TryFrom;

use crate::types::node_id::NodeId;

macro_rules! numeric_ids {
    ($(#[$meta:meta])* $enum_name:ident { $($name:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
        pub enum $enum_name {
            $($name = $value,)*
        }

        impl TryFrom<u32> for $enum_name {
            type Error = ();

            fn try_from(value: u32) -> Result<Self, ()> {
                match value {
                    $(v if v == $value => Ok($enum_name::$name),)*
                    _ => Err(()),
                }
            }
        }
    };
}

numeric_ids! {
    /// Ids of objects, in particular the binary encoding ids that prefix every message and
    /// extension object on the wire.
    ObjectId {
        AnonymousIdentityToken_Encoding_DefaultBinary = 321,
        UserNameIdentityToken_Encoding_DefaultBinary = 324,
        ServiceFault_Encoding_DefaultBinary = 397,
        OpenSecureChannelRequest_Encoding_DefaultBinary = 446,
        OpenSecureChannelResponse_Encoding_DefaultBinary = 449,
        CloseSecureChannelRequest_Encoding_DefaultBinary = 452,
        CloseSecureChannelResponse_Encoding_DefaultBinary = 455,
        CreateSessionRequest_Encoding_DefaultBinary = 461,
        CreateSessionResponse_Encoding_DefaultBinary = 464,
        ActivateSessionRequest_Encoding_DefaultBinary = 467,
        ActivateSessionResponse_Encoding_DefaultBinary = 470,
        CloseSessionRequest_Encoding_DefaultBinary = 473,
        CloseSessionResponse_Encoding_DefaultBinary = 476,
        CancelRequest_Encoding_DefaultBinary = 479,
        CancelResponse_Encoding_DefaultBinary = 482,
        ReadRequest_Encoding_DefaultBinary = 631,
        ReadResponse_Encoding_DefaultBinary = 634,
        DataChangeFilter_Encoding_DefaultBinary = 724,
        EventFilter_Encoding_DefaultBinary = 727,
        EventFilterResult_Encoding_DefaultBinary = 736,
        CreateMonitoredItemsRequest_Encoding_DefaultBinary = 751,
        CreateMonitoredItemsResponse_Encoding_DefaultBinary = 754,
        ModifyMonitoredItemsRequest_Encoding_DefaultBinary = 763,
        ModifyMonitoredItemsResponse_Encoding_DefaultBinary = 766,
        SetMonitoringModeRequest_Encoding_DefaultBinary = 769,
        SetMonitoringModeResponse_Encoding_DefaultBinary = 772,
        SetTriggeringRequest_Encoding_DefaultBinary = 775,
        SetTriggeringResponse_Encoding_DefaultBinary = 778,
        DeleteMonitoredItemsRequest_Encoding_DefaultBinary = 781,
        DeleteMonitoredItemsResponse_Encoding_DefaultBinary = 784,
        CreateSubscriptionRequest_Encoding_DefaultBinary = 787,
        CreateSubscriptionResponse_Encoding_DefaultBinary = 790,
        ModifySubscriptionRequest_Encoding_DefaultBinary = 793,
        ModifySubscriptionResponse_Encoding_DefaultBinary = 796,
        SetPublishingModeRequest_Encoding_DefaultBinary = 799,
        SetPublishingModeResponse_Encoding_DefaultBinary = 802,
        DataChangeNotification_Encoding_DefaultBinary = 811,
        StatusChangeNotification_Encoding_DefaultBinary = 820,
        PublishRequest_Encoding_DefaultBinary = 826,
        PublishResponse_Encoding_DefaultBinary = 829,
        RepublishRequest_Encoding_DefaultBinary = 832,
        RepublishResponse_Encoding_DefaultBinary = 835,
        TransferSubscriptionsRequest_Encoding_DefaultBinary = 841,
        TransferSubscriptionsResponse_Encoding_DefaultBinary = 844,
        DeleteSubscriptionsRequest_Encoding_DefaultBinary = 847,
        DeleteSubscriptionsResponse_Encoding_DefaultBinary = 850,
        EventNotificationList_Encoding_DefaultBinary = 916,
    }
}

numeric_ids! {
    /// Ids of variables in the server object that the client reads.
    VariableId {
        Server_ServerArray = 2254,
        Server_NamespaceArray = 2255,
        Server_ServerStatus = 2256,
        Server_ServerStatus_State = 2259,
    }
}

impl From<VariableId> for NodeId {
    fn from(value: VariableId) -> Self {
        NodeId::new(0, value as u32)
    }
}

impl<'a> TryFrom<&'a NodeId> for ObjectId {
    type Error = ();

    fn try_from(value: &'a NodeId) -> Result<Self, ()> {
        value.as_ns0_numeric().ok_or(()).and_then(ObjectId::try_from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_from_node_id() {
        let node_id = NodeId::from(ObjectId::PublishResponse_Encoding_DefaultBinary);
        assert_eq!(
            ObjectId::try_from(&node_id),
            Ok(ObjectId::PublishResponse_Encoding_DefaultBinary)
        );
        assert!(ObjectId::try_from(&NodeId::new(1, 829u32)).is_err());
        assert!(ObjectId::try_from(&NodeId::new(0, 1u32)).is_err());
    }
}
