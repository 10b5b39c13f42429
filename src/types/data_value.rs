// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DataValue`.

use std::io::{Read, Write};

use crate::types::{
    date_time::DateTime, encoding::*, status_code::StatusCode, variant::Variant,
};

bitflags! {
    struct DataValueFlags: u8 {
        const HAS_VALUE = 0x1;
        const HAS_STATUS = 0x2;
        const HAS_SOURCE_TIMESTAMP = 0x4;
        const HAS_SERVER_TIMESTAMP = 0x8;
        const HAS_SOURCE_PICOSECONDS = 0x10;
        const HAS_SERVER_PICOSECONDS = 0x20;
    }
}

/// A value with its status and timestamps, as read from a node or delivered by a data change
/// notification. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: Option<StatusCode>,
    pub source_timestamp: Option<DateTime>,
    pub source_picoseconds: Option<u16>,
    pub server_timestamp: Option<DateTime>,
    pub server_picoseconds: Option<u16>,
}

impl BinaryEncoder<DataValue> for DataValue {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        if let Some(ref value) = self.value {
            size += value.byte_len();
        }
        if self.status.is_some() {
            size += 4;
        }
        if self.source_timestamp.is_some() {
            size += 8;
            if self.source_picoseconds.is_some() {
                size += 2;
            }
        }
        if self.server_timestamp.is_some() {
            size += 8;
            if self.server_picoseconds.is_some() {
                size += 2;
            }
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = write_u8(stream, self.encoding_mask().bits())?;
        if let Some(ref value) = self.value {
            size += value.encode(stream)?;
        }
        if let Some(ref status) = self.status {
            size += status.encode(stream)?;
        }
        if let Some(ref source_timestamp) = self.source_timestamp {
            size += source_timestamp.encode(stream)?;
            if let Some(ref source_picoseconds) = self.source_picoseconds {
                size += source_picoseconds.encode(stream)?;
            }
        }
        if let Some(ref server_timestamp) = self.server_timestamp {
            size += server_timestamp.encode(stream)?;
            if let Some(ref server_picoseconds) = self.server_picoseconds {
                size += server_picoseconds.encode(stream)?;
            }
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask = DataValueFlags::from_bits_truncate(read_u8(stream)?);

        let value = if encoding_mask.contains(DataValueFlags::HAS_VALUE) {
            Some(Variant::decode(stream, decoding_options)?)
        } else {
            None
        };
        let status = if encoding_mask.contains(DataValueFlags::HAS_STATUS) {
            Some(StatusCode::decode(stream, decoding_options)?)
        } else {
            None
        };
        let source_timestamp = if encoding_mask.contains(DataValueFlags::HAS_SOURCE_TIMESTAMP) {
            Some(DateTime::decode(stream, decoding_options)?)
        } else {
            None
        };
        // Picoseconds are only meaningful with a timestamp
        let source_picoseconds = if encoding_mask.contains(DataValueFlags::HAS_SOURCE_PICOSECONDS)
        {
            Some(u16::decode(stream, decoding_options)?)
        } else {
            None
        };
        let server_timestamp = if encoding_mask.contains(DataValueFlags::HAS_SERVER_TIMESTAMP) {
            Some(DateTime::decode(stream, decoding_options)?)
        } else {
            None
        };
        let server_picoseconds = if encoding_mask.contains(DataValueFlags::HAS_SERVER_PICOSECONDS)
        {
            Some(u16::decode(stream, decoding_options)?)
        } else {
            None
        };

        Ok(DataValue {
            value,
            status,
            source_timestamp,
            source_picoseconds: source_timestamp.and(source_picoseconds),
            server_timestamp,
            server_picoseconds: server_timestamp.and(server_picoseconds),
        })
    }
}

impl<T> From<T> for DataValue
where
    T: Into<Variant>,
{
    fn from(value: T) -> Self {
        DataValue::new_now(value)
    }
}

impl DataValue {
    /// Creates a good data value stamped with the current time for both timestamps.
    pub fn new_now<V>(value: V) -> DataValue
    where
        V: Into<Variant>,
    {
        let now = DateTime::now();
        DataValue {
            value: Some(value.into()),
            status: Some(StatusCode::Good),
            source_timestamp: Some(now),
            source_picoseconds: None,
            server_timestamp: Some(now),
            server_picoseconds: None,
        }
    }

    /// Creates an empty DataValue
    pub fn null() -> DataValue {
        DataValue::default()
    }

    /// Returns the status code, or Good if the status is absent
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::Good)
    }

    /// Test if the value held by this data value is known to be good.
    pub fn is_valid(&self) -> bool {
        self.status().is_good()
    }

    fn encoding_mask(&self) -> DataValueFlags {
        let mut encoding_mask = DataValueFlags::empty();
        encoding_mask.set(DataValueFlags::HAS_VALUE, self.value.is_some());
        encoding_mask.set(DataValueFlags::HAS_STATUS, self.status.is_some());
        if self.source_timestamp.is_some() {
            encoding_mask |= DataValueFlags::HAS_SOURCE_TIMESTAMP;
            encoding_mask.set(
                DataValueFlags::HAS_SOURCE_PICOSECONDS,
                self.source_picoseconds.is_some(),
            );
        }
        if self.server_timestamp.is_some() {
            encoding_mask |= DataValueFlags::HAS_SERVER_TIMESTAMP;
            encoding_mask.set(
                DataValueFlags::HAS_SERVER_PICOSECONDS,
                self.server_picoseconds.is_some(),
            );
        }
        encoding_mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_data_value() {
        let value = DataValue {
            value: Some(Variant::from(42i32)),
            status: Some(StatusCode::BadWaitingForInitialData),
            ..Default::default()
        };
        let buf = value.encode_to_vec();
        assert_eq!(buf[0], 0x3);
        assert_eq!(buf.len(), value.byte_len());
        let decoded = DataValue::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded, value);
        assert!(!decoded.is_valid());
    }

    #[test]
    fn timestamps() {
        let value = DataValue::new_now(1.0f64);
        let buf = value.encode_to_vec();
        let decoded = DataValue::decode(&mut buf.as_slice(), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded, value);
    }
}
