// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `ExtensionObject`.

use std::{
    convert::TryFrom,
    io::{Read, Write},
};

use crate::types::{
    byte_string::ByteString, encoding::*, node_id::NodeId, node_ids::ObjectId,
    status_code::StatusCode, string::UAString,
};

/// How the body of an extension object is encoded.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum ExtensionObjectEncoding {
    /// No body
    None,
    /// Body encoded with the binary encoding
    ByteString(ByteString),
    /// Body encoded as an XML element
    XmlElement(UAString),
}

/// An extension object holds a serialized structure identified by its encoding node id. Filters,
/// identity tokens and notification data travel inside extension objects.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionObject {
    pub node_id: NodeId,
    pub body: ExtensionObjectEncoding,
}

impl Default for ExtensionObject {
    fn default() -> Self {
        Self::null()
    }
}

const BODY_NONE: u8 = 0x0;
const BODY_BYTE_STRING: u8 = 0x1;
const BODY_XML: u8 = 0x2;

impl ExtensionObjectEncoding {
    fn tag(&self) -> u8 {
        match self {
            Self::None => BODY_NONE,
            Self::ByteString(_) => BODY_BYTE_STRING,
            Self::XmlElement(_) => BODY_XML,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::ByteString(body) => body.byte_len(),
            Self::XmlElement(body) => body.byte_len(),
        }
    }
}

impl BinaryEncoder<ExtensionObject> for ExtensionObject {
    fn byte_len(&self) -> usize {
        self.node_id.byte_len() + 1 + self.body.body_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let size = self.node_id.encode(stream)? + write_u8(stream, self.body.tag())?;
        let body = match &self.body {
            ExtensionObjectEncoding::None => 0,
            ExtensionObjectEncoding::ByteString(body) => body.encode(stream)?,
            ExtensionObjectEncoding::XmlElement(body) => body.encode(stream)?,
        };
        Ok(size + body)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let node_id = NodeId::decode(stream, decoding_options)?;
        let body = match read_u8(stream)? {
            BODY_NONE => ExtensionObjectEncoding::None,
            BODY_BYTE_STRING => {
                ExtensionObjectEncoding::ByteString(ByteString::decode(stream, decoding_options)?)
            }
            BODY_XML => ExtensionObjectEncoding::XmlElement(UAString::decode(stream, decoding_options)?),
            tag => {
                error!("Extension object has unknown body encoding {}", tag);
                return Err(StatusCode::BadDecodingError);
            }
        };
        Ok(ExtensionObject { node_id, body })
    }
}

impl ExtensionObject {
    /// An extension object with a null type and no body.
    pub fn null() -> ExtensionObject {
        ExtensionObject {
            node_id: NodeId::null(),
            body: ExtensionObjectEncoding::None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.node_id.is_null()
    }

    /// Tests for empty body.
    pub fn is_empty(&self) -> bool {
        self.is_null() || matches!(self.body, ExtensionObjectEncoding::None)
    }

    /// Returns the object id of the thing this extension object contains, if the node id is a
    /// well known one.
    pub fn object_id(&self) -> Result<ObjectId, StatusCode> {
        ObjectId::try_from(&self.node_id).map_err(|_| StatusCode::BadDecodingError)
    }

    /// Creates an extension object with the specified node id and the encodable object as its
    /// binary encoded payload.
    pub fn from_encodable<N, T>(node_id: N, encodable: &T) -> ExtensionObject
    where
        N: Into<NodeId>,
        T: BinaryEncoder<T>,
    {
        ExtensionObject {
            node_id: node_id.into(),
            body: ExtensionObjectEncoding::ByteString(ByteString::from(encodable.encode_to_vec())),
        }
    }

    /// Decodes the binary payload as `T`. The node id is not checked, the caller is expected to
    /// have matched on `object_id()` first.
    pub fn decode_inner<T>(&self, decoding_options: &DecodingOptions) -> EncodingResult<T>
    where
        T: BinaryEncoder<T>,
    {
        match self.body {
            ExtensionObjectEncoding::ByteString(ByteString { value: Some(ref value) }) => {
                T::decode(&mut value.as_slice(), decoding_options)
            }
            _ => {
                error!("Extension object {} has no binary body to decode", self.node_id);
                Err(StatusCode::BadDecodingError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_body_encoding() {
        let mut data = NodeId::null().encode_to_vec();
        data.push(0x7);
        assert_eq!(
            ExtensionObject::decode(&mut data.as_slice(), &DecodingOptions::default()),
            Err(StatusCode::BadDecodingError)
        );
    }

    #[test]
    fn empty_objects() {
        assert!(ExtensionObject::null().is_empty());
        let object = ExtensionObject {
            node_id: ObjectId::DataChangeFilter_Encoding_DefaultBinary.into(),
            body: ExtensionObjectEncoding::None,
        };
        assert!(!object.is_null());
        assert!(object.is_empty());
        assert_eq!(object.byte_len(), object.encode_to_vec().len());
    }
}
