// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `NodeId` and `Identifier`.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use crate::types::{
    byte_string::ByteString, encoding::*, node_ids::ObjectId, status_code::StatusCode,
    string::UAString,
};

/// The kind of identifier, numeric, string, guid or byte
#[derive(Eq, PartialEq, Clone, Debug, Hash, Serialize, Deserialize)]
pub enum Identifier {
    Numeric(u32),
    String(UAString),
    Guid([u8; 16]),
    ByteString(ByteString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => {
                write!(f, "g=")?;
                v.iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
            Identifier::ByteString(v) => {
                write!(f, "b=")?;
                v.as_ref().iter().try_for_each(|b| write!(f, "{:02x}", b))
            }
        }
    }
}

impl From<u32> for Identifier {
    fn from(v: u32) -> Self {
        Identifier::Numeric(v)
    }
}

impl<'a> From<&'a str> for Identifier {
    fn from(v: &'a str) -> Self {
        Identifier::String(UAString::from(v))
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Identifier::String(UAString::from(v))
    }
}

impl From<ByteString> for Identifier {
    fn from(v: ByteString) -> Self {
        Identifier::ByteString(v)
    }
}

/// An identifier for a node in the address space of an OPC UA Server.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// The index for a namespace
    pub namespace: u16,
    /// The identifier for the node in the address space
    pub identifier: Identifier,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        } else {
            write!(f, "{}", self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::null()
    }
}

impl BinaryEncoder<NodeId> for NodeId {
    fn byte_len(&self) -> usize {
        match self.identifier {
            Identifier::Numeric(value) => {
                if self.namespace == 0 && value <= 255 {
                    2
                } else if self.namespace <= 255 && value <= 65535 {
                    4
                } else {
                    7
                }
            }
            Identifier::String(ref value) => 3 + value.byte_len(),
            Identifier::Guid(_) => 3 + 16,
            Identifier::ByteString(ref value) => 3 + value.byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size: usize = 0;
        match &self.identifier {
            Identifier::Numeric(value) => {
                if self.namespace == 0 && *value <= 255 {
                    // node id fits into 2 bytes when the namespace is 0 and the value <= 255
                    size += write_u8(stream, 0x0)?;
                    size += write_u8(stream, *value as u8)?;
                } else if self.namespace <= 255 && *value <= 65535 {
                    // node id fits into 4 bytes when namespace <= 255 and value <= 65535
                    size += write_u8(stream, 0x1)?;
                    size += write_u8(stream, self.namespace as u8)?;
                    size += (*value as u16).encode(stream)?;
                } else {
                    size += write_u8(stream, 0x2)?;
                    size += self.namespace.encode(stream)?;
                    size += value.encode(stream)?;
                }
            }
            Identifier::String(value) => {
                size += write_u8(stream, 0x3)?;
                size += self.namespace.encode(stream)?;
                size += value.encode(stream)?;
            }
            Identifier::Guid(value) => {
                size += write_u8(stream, 0x4)?;
                size += self.namespace.encode(stream)?;
                size += write_bytes(stream, value)?;
            }
            Identifier::ByteString(value) => {
                size += write_u8(stream, 0x5)?;
                size += self.namespace.encode(stream)?;
                size += value.encode(stream)?;
            }
        }
        assert_eq!(size, self.byte_len());
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let identifier = read_u8(stream)?;
        let node_id = match identifier {
            0x0 => NodeId::new(0, u32::from(read_u8(stream)?)),
            0x1 => {
                let namespace = u16::from(read_u8(stream)?);
                let value = u16::decode(stream, decoding_options)?;
                NodeId::new(namespace, u32::from(value))
            }
            0x2 => {
                let namespace = u16::decode(stream, decoding_options)?;
                let value = u32::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            0x3 => {
                let namespace = u16::decode(stream, decoding_options)?;
                let value = UAString::decode(stream, decoding_options)?;
                NodeId::new(namespace, Identifier::String(value))
            }
            0x4 => {
                let namespace = u16::decode(stream, decoding_options)?;
                let mut value = [0u8; 16];
                read_bytes(stream, &mut value)?;
                NodeId::new(namespace, Identifier::Guid(value))
            }
            0x5 => {
                let namespace = u16::decode(stream, decoding_options)?;
                let value = ByteString::decode(stream, decoding_options)?;
                NodeId::new(namespace, Identifier::ByteString(value))
            }
            _ => {
                error!("Unrecognized node id type {}", identifier);
                return Err(StatusCode::BadDecodingError);
            }
        };
        Ok(node_id)
    }
}

impl FromStr for NodeId {
    type Err = StatusCode;

    /// Parses the `ns=<namespace>;<type>=<value>` notation for numeric and string identifiers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, identifier) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest.split_once(';').ok_or(StatusCode::BadNodeIdInvalid)?;
                let ns = ns.parse::<u16>().map_err(|_| StatusCode::BadNodeIdInvalid)?;
                (ns, id)
            }
            None => (0, s),
        };
        if let Some(value) = identifier.strip_prefix("i=") {
            let value = value
                .parse::<u32>()
                .map_err(|_| StatusCode::BadNodeIdInvalid)?;
            Ok(NodeId::new(namespace, value))
        } else if let Some(value) = identifier.strip_prefix("s=") {
            Ok(NodeId::new(namespace, value))
        } else {
            Err(StatusCode::BadNodeIdInvalid)
        }
    }
}

impl From<ObjectId> for NodeId {
    fn from(value: ObjectId) -> Self {
        NodeId::new(0, value as u32)
    }
}

impl NodeId {
    /// Constructs a new NodeId from anything that can be turned into an Identifier
    pub fn new<T>(namespace: u16, value: T) -> NodeId
    where
        T: Into<Identifier>,
    {
        NodeId {
            namespace,
            identifier: value.into(),
        }
    }

    /// Returns a null node id
    pub fn null() -> NodeId {
        NodeId::new(0, 0u32)
    }

    /// Test if the node id is null, i.e. 0 namespace and 0 identifier
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }

    /// Returns the numeric value in namespace 0, if that is what this node id is
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(v) if self.namespace == 0 => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(node_id: NodeId, expected_len: usize) {
        let buf = node_id.encode_to_vec();
        assert_eq!(buf.len(), expected_len);
        let decoded = NodeId::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded, node_id);
    }

    #[test]
    fn compact_encodings() {
        round_trip(NodeId::new(0, 255u32), 2);
        round_trip(NodeId::new(1, 65535u32), 4);
        round_trip(NodeId::new(0, 2255u32), 4);
        round_trip(NodeId::new(300, 1u32), 7);
        round_trip(NodeId::new(2, 70000u32), 7);
    }

    #[test]
    fn opaque_identifiers() {
        round_trip(NodeId::new(1, "Hello"), 3 + 4 + 5);
        round_trip(NodeId::new(1, Identifier::Guid([7u8; 16])), 19);
        round_trip(NodeId::new(1, ByteString::from(vec![1u8, 2, 3])), 3 + 4 + 3);
    }

    #[test]
    fn parse() {
        assert_eq!(NodeId::from_str("i=2255").unwrap(), NodeId::new(0, 2255u32));
        assert_eq!(
            NodeId::from_str("ns=2;s=Demo.Dynamic").unwrap(),
            NodeId::new(2, "Demo.Dynamic")
        );
        assert!(NodeId::from_str("ns=x;i=1").is_err());
        assert_eq!(NodeId::new(2, 5u32).to_string(), "ns=2;i=5");
    }
}
