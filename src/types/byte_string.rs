// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `ByteString`.

use std::io::{Read, Write};

use crate::types::{encoding::*, status_code::StatusCode};

/// A sequence of octets. Like a string, a byte string may be null which is distinct from empty.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default, Serialize, Deserialize)]
pub struct ByteString {
    pub value: Option<Vec<u8>>,
}

/// Reads an Int32 length followed by that many bytes. A length of -1 is a null value.
pub(crate) fn read_length_prefixed<S: Read>(
    stream: &mut S,
    max_length: usize,
    what: &str,
) -> EncodingResult<Option<Vec<u8>>> {
    let len = read_i32(stream)?;
    if len == -1 {
        Ok(None)
    } else if len < -1 {
        error!("{} buf length is a negative number {}", what, len);
        Err(StatusCode::BadDecodingError)
    } else if len as usize > max_length {
        error!(
            "{} buf length {} exceeds decoding limit {}",
            what, len, max_length
        );
        Err(StatusCode::BadDecodingError)
    } else {
        let mut buf = vec![0u8; len as usize];
        read_bytes(stream, &mut buf)?;
        Ok(Some(buf))
    }
}

/// Writes an Int32 length followed by the bytes, or -1 for a null value.
pub(crate) fn write_length_prefixed<S: Write>(
    stream: &mut S,
    value: Option<&[u8]>,
) -> EncodingResult<usize> {
    match value {
        Some(value) => Ok(write_i32(stream, value.len() as i32)? + write_bytes(stream, value)?),
        None => write_i32(stream, -1),
    }
}

impl BinaryEncoder<ByteString> for ByteString {
    fn byte_len(&self) -> usize {
        4 + self.value.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_length_prefixed(stream, self.value.as_deref())
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let value = read_length_prefixed(
            stream,
            decoding_options.max_byte_string_length,
            "Bytestring",
        )?;
        Ok(ByteString { value })
    }
}

impl<'a> From<&'a [u8]> for ByteString {
    fn from(value: &'a [u8]) -> Self {
        Self::from(value.to_vec())
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        ByteString { value: Some(value) }
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        self.value.as_deref().unwrap_or(&[])
    }
}

impl ByteString {
    /// Create a null byte string (not the same as an empty byte string)
    pub fn null() -> ByteString {
        ByteString { value: None }
    }

    /// Test if the byte string is null
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Test if the byte string is null or empty
    pub fn is_null_or_empty(&self) -> bool {
        self.value.as_ref().map(|v| v.is_empty()).unwrap_or(true)
    }

    /// Returns the length in bytes, 0 for a null byte string
    pub fn len(&self) -> usize {
        self.value.as_ref().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_not_empty() {
        let null = ByteString::null();
        let empty = ByteString::from(Vec::new());
        assert_ne!(null.encode_to_vec(), empty.encode_to_vec());
        assert!(null.is_null_or_empty());
        assert!(empty.is_null_or_empty());
        assert!(!empty.is_null());
    }

    #[test]
    fn decode_respects_limit() {
        let value = ByteString::from(vec![1u8; 10]);
        let buf = value.encode_to_vec();
        let options = DecodingOptions {
            max_byte_string_length: 9,
            ..Default::default()
        };
        assert_eq!(
            ByteString::decode(&mut buf.as_slice(), &options).unwrap_err(),
            StatusCode::BadDecodingError
        );
        let options = DecodingOptions::default();
        assert_eq!(ByteString::decode(&mut buf.as_slice(), &options).unwrap(), value);
    }
}
