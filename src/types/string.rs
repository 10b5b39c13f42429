// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `UAString`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{
    byte_string::{read_length_prefixed, write_length_prefixed},
    encoding::*,
    status_code::StatusCode,
};

/// To avoid naming conflict hell, the OPC UA String type is typed `UAString` so it does not collide
/// with the Rust `String`.
///
/// A string contains UTF-8 encoded characters or a null value. A null value is distinct from
/// being an empty string so internally, the code maintains that distinction by holding the value
/// as an `Option<String>`.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default, Serialize, Deserialize)]
pub struct UAString {
    value: Option<String>,
}

impl fmt::Display for UAString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(ref value) => write!(f, "{}", value),
            None => write!(f, "[null]"),
        }
    }
}

impl BinaryEncoder<UAString> for UAString {
    fn byte_len(&self) -> usize {
        4 + self.value.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_length_prefixed(stream, self.value.as_ref().map(|v| v.as_bytes()))
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        match read_length_prefixed(stream, decoding_options.max_string_length, "String")? {
            None => Ok(UAString::null()),
            Some(buf) => {
                let value = String::from_utf8(buf).map_err(|err| {
                    trace!("Decoded string was not valid UTF-8 - {}", err);
                    StatusCode::BadDecodingError
                })?;
                Ok(UAString::from(value))
            }
        }
    }
}

impl From<UAString> for String {
    fn from(value: UAString) -> Self {
        value.value.unwrap_or_default()
    }
}

impl AsRef<str> for UAString {
    fn as_ref(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

impl<'a> From<&'a str> for UAString {
    fn from(value: &'a str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<&String> for UAString {
    fn from(value: &String) -> Self {
        Self::from(value.clone())
    }
}

impl From<String> for UAString {
    fn from(value: String) -> Self {
        UAString { value: Some(value) }
    }
}

impl PartialEq<str> for UAString {
    fn eq(&self, other: &str) -> bool {
        self.value.as_deref() == Some(other)
    }
}

impl UAString {
    /// Returns the inner value, `None` for a null string
    pub fn value(&self) -> &Option<String> {
        &self.value
    }

    /// Creates a null string
    pub fn null() -> UAString {
        UAString { value: None }
    }

    /// Returns true if the string is null
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Returns true if the string is null or empty
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().map(|v| v.is_empty()).unwrap_or(true)
    }
}
