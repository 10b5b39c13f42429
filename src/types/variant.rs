// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `Variant`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{
    basic_types::{LocalizedText, QualifiedName},
    byte_string::ByteString,
    date_time::DateTime,
    encoding::*,
    extension_object::ExtensionObject,
    node_id::NodeId,
    status_code::StatusCode,
    string::UAString,
};

/// Encoding mask bit indicating the variant holds an array
const ARRAY_VALUES_BIT: u8 = 0x80;
/// Encoding mask bit indicating the array has dimensions
const ARRAY_DIMENSIONS_BIT: u8 = 0x40;
const TYPE_ID_MASK: u8 = 0x3f;

mod type_id {
    pub const EMPTY: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const BYTE: u8 = 3;
    pub const INT16: u8 = 4;
    pub const UINT16: u8 = 5;
    pub const INT32: u8 = 6;
    pub const UINT32: u8 = 7;
    pub const INT64: u8 = 8;
    pub const UINT64: u8 = 9;
    pub const FLOAT: u8 = 10;
    pub const DOUBLE: u8 = 11;
    pub const STRING: u8 = 12;
    pub const DATE_TIME: u8 = 13;
    pub const BYTE_STRING: u8 = 15;
    pub const NODE_ID: u8 = 17;
    pub const STATUS_CODE: u8 = 19;
    pub const QUALIFIED_NAME: u8 = 20;
    pub const LOCALIZED_TEXT: u8 = 21;
    pub const EXTENSION_OBJECT: u8 = 22;
}

/// An array of variants which all hold the same scalar type, plus optional dimensions for a
/// multi-dimensional array.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Array {
    pub value_type: u8,
    pub values: Vec<Variant>,
    pub dimensions: Option<Vec<i32>>,
}

/// A `Variant` holds a value of one of the built-in types. Types the client core never produces
/// or consumes (Guid, XmlElement, nested variants etc.) are rejected when decoding.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(UAString),
    DateTime(Box<DateTime>),
    ByteString(ByteString),
    NodeId(Box<NodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    ExtensionObject(Box<ExtensionObject>),
    Array(Box<Array>),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "Empty"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{}", v),
            Variant::DateTime(v) => write!(f, "{}", v),
            Variant::NodeId(v) => write!(f, "{}", v),
            Variant::StatusCode(v) => write!(f, "{}", v),
            Variant::LocalizedText(v) => write!(f, "{}", v),
            Variant::Array(v) => write!(f, "Array[{}]", v.values.len()),
            v => write!(f, "{:?}", v),
        }
    }
}

macro_rules! variant_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Variant {
            fn from(v: $t) -> Self {
                Variant::$variant(v)
            }
        }
    };
    ($t:ty, $variant:ident, boxed) => {
        impl From<$t> for Variant {
            fn from(v: $t) -> Self {
                Variant::$variant(Box::new(v))
            }
        }
    };
}

variant_from!(bool, Boolean);
variant_from!(u8, Byte);
variant_from!(i16, Int16);
variant_from!(u16, UInt16);
variant_from!(i32, Int32);
variant_from!(u32, UInt32);
variant_from!(i64, Int64);
variant_from!(u64, UInt64);
variant_from!(f32, Float);
variant_from!(f64, Double);
variant_from!(UAString, String);
variant_from!(ByteString, ByteString);
variant_from!(StatusCode, StatusCode);
variant_from!(DateTime, DateTime, boxed);
variant_from!(NodeId, NodeId, boxed);
variant_from!(QualifiedName, QualifiedName, boxed);
variant_from!(LocalizedText, LocalizedText, boxed);
variant_from!(ExtensionObject, ExtensionObject, boxed);

impl<'a> From<&'a str> for Variant {
    fn from(v: &'a str) -> Self {
        Variant::String(UAString::from(v))
    }
}

impl From<Vec<UAString>> for Variant {
    fn from(values: Vec<UAString>) -> Self {
        Variant::Array(Box::new(Array {
            value_type: type_id::STRING,
            values: values.into_iter().map(Variant::String).collect(),
            dimensions: None,
        }))
    }
}

impl BinaryEncoder<Variant> for Variant {
    fn byte_len(&self) -> usize {
        1 + match self {
            Variant::Array(array) => {
                let mut size = 4 + array
                    .values
                    .iter()
                    .map(|v| v.value_byte_len())
                    .sum::<usize>();
                if array.dimensions.is_some() {
                    size += byte_len_array(&array.dimensions);
                }
                size
            }
            v => v.value_byte_len(),
        }
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = write_u8(stream, self.encoding_mask())?;
        match self {
            Variant::Array(array) => {
                size += write_i32(stream, array.values.len() as i32)?;
                for value in &array.values {
                    size += value.encode_value(stream)?;
                }
                if array.dimensions.is_some() {
                    size += write_array(stream, &array.dimensions)?;
                }
            }
            v => size += v.encode_value(stream)?,
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        let value_type = encoding_mask & TYPE_ID_MASK;
        if encoding_mask & ARRAY_VALUES_BIT == 0 {
            return Self::decode_value(value_type, stream, decoding_options);
        }
        let len = read_i32(stream)?;
        if len < -1 || len as usize > decoding_options.max_array_length {
            error!("Variant array length {} is invalid or too long", len);
            return Err(StatusCode::BadDecodingError);
        }
        let values = (0..len.max(0))
            .map(|_| Self::decode_value(value_type, stream, decoding_options))
            .collect::<EncodingResult<Vec<Variant>>>()?;
        let dimensions = if encoding_mask & ARRAY_DIMENSIONS_BIT != 0 {
            read_array(stream, decoding_options)?
        } else {
            None
        };
        Ok(Variant::Array(Box::new(Array {
            value_type,
            values,
            dimensions,
        })))
    }
}

impl Variant {
    /// The built-in type id of the value, or of the elements for an array
    pub fn type_id(&self) -> u8 {
        match self {
            Variant::Empty => type_id::EMPTY,
            Variant::Boolean(_) => type_id::BOOLEAN,
            Variant::Byte(_) => type_id::BYTE,
            Variant::Int16(_) => type_id::INT16,
            Variant::UInt16(_) => type_id::UINT16,
            Variant::Int32(_) => type_id::INT32,
            Variant::UInt32(_) => type_id::UINT32,
            Variant::Int64(_) => type_id::INT64,
            Variant::UInt64(_) => type_id::UINT64,
            Variant::Float(_) => type_id::FLOAT,
            Variant::Double(_) => type_id::DOUBLE,
            Variant::String(_) => type_id::STRING,
            Variant::DateTime(_) => type_id::DATE_TIME,
            Variant::ByteString(_) => type_id::BYTE_STRING,
            Variant::NodeId(_) => type_id::NODE_ID,
            Variant::StatusCode(_) => type_id::STATUS_CODE,
            Variant::QualifiedName(_) => type_id::QUALIFIED_NAME,
            Variant::LocalizedText(_) => type_id::LOCALIZED_TEXT,
            Variant::ExtensionObject(_) => type_id::EXTENSION_OBJECT,
            Variant::Array(array) => array.value_type,
        }
    }

    fn encoding_mask(&self) -> u8 {
        match self {
            Variant::Array(array) if array.dimensions.is_some() => {
                array.value_type | ARRAY_VALUES_BIT | ARRAY_DIMENSIONS_BIT
            }
            Variant::Array(array) => array.value_type | ARRAY_VALUES_BIT,
            v => v.type_id(),
        }
    }

    fn value_byte_len(&self) -> usize {
        match self {
            Variant::Empty | Variant::Array(_) => 0,
            Variant::Boolean(v) => v.byte_len(),
            Variant::Byte(v) => v.byte_len(),
            Variant::Int16(v) => v.byte_len(),
            Variant::UInt16(v) => v.byte_len(),
            Variant::Int32(v) => v.byte_len(),
            Variant::UInt32(v) => v.byte_len(),
            Variant::Int64(v) => v.byte_len(),
            Variant::UInt64(v) => v.byte_len(),
            Variant::Float(v) => v.byte_len(),
            Variant::Double(v) => v.byte_len(),
            Variant::String(v) => v.byte_len(),
            Variant::DateTime(v) => v.byte_len(),
            Variant::ByteString(v) => v.byte_len(),
            Variant::NodeId(v) => v.byte_len(),
            Variant::StatusCode(v) => v.byte_len(),
            Variant::QualifiedName(v) => v.byte_len(),
            Variant::LocalizedText(v) => v.byte_len(),
            Variant::ExtensionObject(v) => v.byte_len(),
        }
    }

    fn encode_value<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match self {
            Variant::Empty => Ok(0),
            Variant::Boolean(v) => v.encode(stream),
            Variant::Byte(v) => v.encode(stream),
            Variant::Int16(v) => v.encode(stream),
            Variant::UInt16(v) => v.encode(stream),
            Variant::Int32(v) => v.encode(stream),
            Variant::UInt32(v) => v.encode(stream),
            Variant::Int64(v) => v.encode(stream),
            Variant::UInt64(v) => v.encode(stream),
            Variant::Float(v) => v.encode(stream),
            Variant::Double(v) => v.encode(stream),
            Variant::String(v) => v.encode(stream),
            Variant::DateTime(v) => v.encode(stream),
            Variant::ByteString(v) => v.encode(stream),
            Variant::NodeId(v) => v.encode(stream),
            Variant::StatusCode(v) => v.encode(stream),
            Variant::QualifiedName(v) => v.encode(stream),
            Variant::LocalizedText(v) => v.encode(stream),
            Variant::ExtensionObject(v) => v.encode(stream),
            Variant::Array(_) => {
                error!("Nested arrays cannot be encoded inside an array variant");
                Err(StatusCode::BadEncodingError)
            }
        }
    }

    fn decode_value<S: Read>(
        value_type: u8,
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Variant> {
        let value = match value_type {
            type_id::EMPTY => Variant::Empty,
            type_id::BOOLEAN => Variant::from(bool::decode(stream, decoding_options)?),
            type_id::BYTE => Variant::from(u8::decode(stream, decoding_options)?),
            type_id::INT16 => Variant::from(i16::decode(stream, decoding_options)?),
            type_id::UINT16 => Variant::from(u16::decode(stream, decoding_options)?),
            type_id::INT32 => Variant::from(i32::decode(stream, decoding_options)?),
            type_id::UINT32 => Variant::from(u32::decode(stream, decoding_options)?),
            type_id::INT64 => Variant::from(i64::decode(stream, decoding_options)?),
            type_id::UINT64 => Variant::from(u64::decode(stream, decoding_options)?),
            type_id::FLOAT => Variant::from(f32::decode(stream, decoding_options)?),
            type_id::DOUBLE => Variant::from(f64::decode(stream, decoding_options)?),
            type_id::STRING => Variant::from(UAString::decode(stream, decoding_options)?),
            type_id::DATE_TIME => Variant::from(DateTime::decode(stream, decoding_options)?),
            type_id::BYTE_STRING => Variant::from(ByteString::decode(stream, decoding_options)?),
            type_id::NODE_ID => Variant::from(NodeId::decode(stream, decoding_options)?),
            type_id::STATUS_CODE => Variant::from(StatusCode::decode(stream, decoding_options)?),
            type_id::QUALIFIED_NAME => {
                Variant::from(QualifiedName::decode(stream, decoding_options)?)
            }
            type_id::LOCALIZED_TEXT => {
                Variant::from(LocalizedText::decode(stream, decoding_options)?)
            }
            type_id::EXTENSION_OBJECT => {
                let inner_options = decoding_options.descend()?;
                Variant::from(ExtensionObject::decode(stream, &inner_options)?)
            }
            _ => {
                error!("Variant type {} is not supported", value_type);
                return Err(StatusCode::BadDecodingError);
            }
        };
        Ok(value)
    }

    /// Tests if the variant holds nothing
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// Returns the values of a string array, skipping anything that is not a string.
    pub fn as_string_array(&self) -> Option<Vec<UAString>> {
        match self {
            Variant::Array(array) if array.value_type == type_id::STRING => Some(
                array
                    .values
                    .iter()
                    .filter_map(|v| match v {
                        Variant::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Returns the value as an i32 if it is one, used for enumeration values such as server state
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Variant::Int32(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Variant) {
        let buf = value.encode_to_vec();
        assert_eq!(buf.len(), value.byte_len());
        let decoded = Variant::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn scalars() {
        round_trip(Variant::Empty);
        round_trip(Variant::from(true));
        round_trip(Variant::from(-5i32));
        round_trip(Variant::from(1.5f64));
        round_trip(Variant::from("hello"));
        round_trip(Variant::from(NodeId::new(2, "Demo")));
        round_trip(Variant::from(LocalizedText::from("Running")));
    }

    #[test]
    fn string_array() {
        let value = Variant::from(vec![
            UAString::from("http://opcfoundation.org/UA/"),
            UAString::from("urn:demo"),
        ]);
        round_trip(value.clone());
        assert_eq!(value.as_string_array().unwrap().len(), 2);
    }

    #[test]
    fn unsupported_type_fails() {
        // Guid
        let buf = vec![14u8, 0, 0, 0];
        assert_eq!(
            Variant::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap_err(),
            StatusCode::BadDecodingError
        );
    }
}
