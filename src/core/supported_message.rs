// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Defines all messages, request or response that are supported by the client. The
//! `SupportedMessage` enumeration contains a value for each of those messages enabling them to be
//! passed around in an agnostic fashion.

use std::io::{Read, Write};

use crate::types::{
    encoding::*, node_id::NodeId, node_ids::ObjectId, service_types::*, status_code::StatusCode,
};

/// This macro helps avoid tedious repetition as new messages are added. Requests carry a
/// `request_header`, responses a `response_header`, and each is paired with the object id of its
/// binary encoding.
macro_rules! supported_messages {
    (
        requests { $($req:ident => $req_id:ident,)* }
        responses { $($resp:ident => $resp_id:ident,)* }
    ) => {
        #[derive(Debug, PartialEq, Clone)]
        pub enum SupportedMessage {
            /// A message of a type that the client does not understand
            Invalid(ObjectId),
            $($req(Box<$req>),)*
            $($resp(Box<$resp>),)*
        }

        $(
            impl From<$req> for SupportedMessage {
                fn from(value: $req) -> Self {
                    SupportedMessage::$req(Box::new(value))
                }
            }
        )*

        $(
            impl From<$resp> for SupportedMessage {
                fn from(value: $resp) -> Self {
                    SupportedMessage::$resp(Box::new(value))
                }
            }
        )*

        impl SupportedMessage {
            pub fn byte_len(&self) -> usize {
                match self {
                    SupportedMessage::Invalid(_) => 0,
                    $(SupportedMessage::$req(value) => value.byte_len(),)*
                    $(SupportedMessage::$resp(value) => value.byte_len(),)*
                }
            }

            pub fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
                match self {
                    SupportedMessage::Invalid(object_id) => {
                        error!("Cannot encode unsupported message {:?}", object_id);
                        Err(StatusCode::BadEncodingError)
                    }
                    $(SupportedMessage::$req(value) => value.encode(stream),)*
                    $(SupportedMessage::$resp(value) => value.encode(stream),)*
                }
            }

            /// The object id of the message's binary encoding.
            pub fn object_id(&self) -> ObjectId {
                match self {
                    SupportedMessage::Invalid(object_id) => *object_id,
                    $(SupportedMessage::$req(_) => ObjectId::$req_id,)*
                    $(SupportedMessage::$resp(_) => ObjectId::$resp_id,)*
                }
            }

            pub fn node_id(&self) -> NodeId {
                self.object_id().into()
            }

            pub fn is_request(&self) -> bool {
                matches!(self, $(SupportedMessage::$req(_))|*)
            }

            pub fn request_header(&self) -> Option<&RequestHeader> {
                match self {
                    $(SupportedMessage::$req(value) => Some(&value.request_header),)*
                    _ => None,
                }
            }

            pub fn request_header_mut(&mut self) -> Option<&mut RequestHeader> {
                match self {
                    $(SupportedMessage::$req(value) => Some(&mut value.request_header),)*
                    _ => None,
                }
            }

            pub fn response_header(&self) -> Option<&ResponseHeader> {
                match self {
                    $(SupportedMessage::$resp(value) => Some(&value.response_header),)*
                    _ => None,
                }
            }

            /// The request handle of the request, or of the request that a response answers.
            pub fn request_handle(&self) -> u32 {
                if let Some(header) = self.request_header() {
                    header.request_handle
                } else if let Some(header) = self.response_header() {
                    header.request_handle
                } else {
                    0
                }
            }

            pub fn decode_by_object_id<S: Read>(
                stream: &mut S,
                object_id: ObjectId,
                decoding_options: &DecodingOptions,
            ) -> EncodingResult<Self> {
                trace!("decoding object_id {:?}", object_id);
                let decoded_message: SupportedMessage = match object_id {
                    $(ObjectId::$req_id => $req::decode(stream, decoding_options)?.into(),)*
                    $(ObjectId::$resp_id => $resp::decode(stream, decoding_options)?.into(),)*
                    _ => {
                        debug!("decoding unsupported for object id {:?}", object_id);
                        SupportedMessage::Invalid(object_id)
                    }
                };
                Ok(decoded_message)
            }
        }
    };
}

supported_messages! {
    requests {
        OpenSecureChannelRequest => OpenSecureChannelRequest_Encoding_DefaultBinary,
        CloseSecureChannelRequest => CloseSecureChannelRequest_Encoding_DefaultBinary,
        CreateSessionRequest => CreateSessionRequest_Encoding_DefaultBinary,
        ActivateSessionRequest => ActivateSessionRequest_Encoding_DefaultBinary,
        CloseSessionRequest => CloseSessionRequest_Encoding_DefaultBinary,
        CancelRequest => CancelRequest_Encoding_DefaultBinary,
        ReadRequest => ReadRequest_Encoding_DefaultBinary,
        CreateSubscriptionRequest => CreateSubscriptionRequest_Encoding_DefaultBinary,
        ModifySubscriptionRequest => ModifySubscriptionRequest_Encoding_DefaultBinary,
        SetPublishingModeRequest => SetPublishingModeRequest_Encoding_DefaultBinary,
        DeleteSubscriptionsRequest => DeleteSubscriptionsRequest_Encoding_DefaultBinary,
        TransferSubscriptionsRequest => TransferSubscriptionsRequest_Encoding_DefaultBinary,
        CreateMonitoredItemsRequest => CreateMonitoredItemsRequest_Encoding_DefaultBinary,
        ModifyMonitoredItemsRequest => ModifyMonitoredItemsRequest_Encoding_DefaultBinary,
        SetMonitoringModeRequest => SetMonitoringModeRequest_Encoding_DefaultBinary,
        SetTriggeringRequest => SetTriggeringRequest_Encoding_DefaultBinary,
        DeleteMonitoredItemsRequest => DeleteMonitoredItemsRequest_Encoding_DefaultBinary,
        PublishRequest => PublishRequest_Encoding_DefaultBinary,
        RepublishRequest => RepublishRequest_Encoding_DefaultBinary,
    }
    responses {
        ServiceFault => ServiceFault_Encoding_DefaultBinary,
        OpenSecureChannelResponse => OpenSecureChannelResponse_Encoding_DefaultBinary,
        CloseSecureChannelResponse => CloseSecureChannelResponse_Encoding_DefaultBinary,
        CreateSessionResponse => CreateSessionResponse_Encoding_DefaultBinary,
        ActivateSessionResponse => ActivateSessionResponse_Encoding_DefaultBinary,
        CloseSessionResponse => CloseSessionResponse_Encoding_DefaultBinary,
        CancelResponse => CancelResponse_Encoding_DefaultBinary,
        ReadResponse => ReadResponse_Encoding_DefaultBinary,
        CreateSubscriptionResponse => CreateSubscriptionResponse_Encoding_DefaultBinary,
        ModifySubscriptionResponse => ModifySubscriptionResponse_Encoding_DefaultBinary,
        SetPublishingModeResponse => SetPublishingModeResponse_Encoding_DefaultBinary,
        DeleteSubscriptionsResponse => DeleteSubscriptionsResponse_Encoding_DefaultBinary,
        TransferSubscriptionsResponse => TransferSubscriptionsResponse_Encoding_DefaultBinary,
        CreateMonitoredItemsResponse => CreateMonitoredItemsResponse_Encoding_DefaultBinary,
        ModifyMonitoredItemsResponse => ModifyMonitoredItemsResponse_Encoding_DefaultBinary,
        SetMonitoringModeResponse => SetMonitoringModeResponse_Encoding_DefaultBinary,
        SetTriggeringResponse => SetTriggeringResponse_Encoding_DefaultBinary,
        DeleteMonitoredItemsResponse => DeleteMonitoredItemsResponse_Encoding_DefaultBinary,
        PublishResponse => PublishResponse_Encoding_DefaultBinary,
        RepublishResponse => RepublishResponse_Encoding_DefaultBinary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size() {
        // Boxing every variant keeps the enum small to move around
        assert!(std::mem::size_of::<SupportedMessage>() <= 16);
    }

    #[test]
    fn decode_by_object_id() {
        let fault: SupportedMessage = ServiceFault::new(
            &RequestHeader::new(&NodeId::null(), &crate::types::DateTime::now(), 44),
            StatusCode::BadSessionIdInvalid,
        )
        .into();
        assert!(!fault.is_request());
        assert_eq!(fault.request_handle(), 44);
        assert_eq!(
            fault.node_id(),
            NodeId::from(ObjectId::ServiceFault_Encoding_DefaultBinary)
        );

        let mut stream = std::io::Cursor::new(Vec::new());
        fault.encode(&mut stream).unwrap();
        stream.set_position(0);
        let decoded = SupportedMessage::decode_by_object_id(
            &mut stream,
            fault.object_id(),
            &DecodingOptions::default(),
        )
        .unwrap();
        assert_eq!(decoded, fault);
    }

    #[test]
    fn unknown_object_id_is_invalid() {
        let decoded = SupportedMessage::decode_by_object_id(
            &mut std::io::Cursor::new(Vec::<u8>::new()),
            ObjectId::DataChangeNotification_Encoding_DefaultBinary,
            &DecodingOptions::default(),
        )
        .unwrap();
        assert!(matches!(decoded, SupportedMessage::Invalid(_)));
        assert!(decoded.encode(&mut Vec::<u8>::new()).is_err());
    }
}
