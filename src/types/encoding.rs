// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `BinaryEncoder` trait and helpers for reading and writing of scalar values and
//! arrays in the OPC UA binary encoding.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::types::{constants, status_code::StatusCode};

pub type EncodingResult<T> = std::result::Result<T, StatusCode>;

/// Limits that are enforced while decoding. A server can send anything, so every variable length
/// value is checked against these before memory is allocated for it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodingOptions {
    /// Maximum size of a message in bytes. 0 means no limit.
    pub max_message_size: usize,
    /// Maximum number of chunks. 0 means no limit.
    pub max_chunk_count: usize,
    /// Maximum length in bytes (not chars!) of a string. 0 actually means 0, i.e. no string permitted
    pub max_string_length: usize,
    /// Maximum length in bytes of a byte string. 0 actually means 0, i.e. no byte string permitted
    pub max_byte_string_length: usize,
    /// Maximum number of array elements. 0 actually means 0, i.e. no array permitted
    pub max_array_length: usize,
    /// Maximum nesting depth of recursive values such as diagnostic infos
    pub max_decoding_depth: usize,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        DecodingOptions {
            max_message_size: constants::MAX_MESSAGE_SIZE,
            max_chunk_count: constants::MAX_CHUNK_COUNT,
            max_string_length: constants::MAX_STRING_LENGTH,
            max_byte_string_length: constants::MAX_BYTE_STRING_LENGTH,
            max_array_length: constants::MAX_ARRAY_LENGTH,
            max_decoding_depth: constants::MAX_DECODING_DEPTH,
        }
    }
}

impl DecodingOptions {
    /// Returns the options to use one level deeper into a recursive value, or an error if the
    /// maximum depth has been reached.
    pub fn descend(&self) -> EncodingResult<DecodingOptions> {
        if self.max_decoding_depth == 0 {
            warn!("Decoding in stream aborted due maximum recursion depth being reached");
            Err(StatusCode::BadDecodingError)
        } else {
            Ok(DecodingOptions {
                max_decoding_depth: self.max_decoding_depth - 1,
                ..self.clone()
            })
        }
    }
}

/// OPC UA Binary Encoding interface. Anything that encodes to binary must implement this. It provides
/// functions to calculate the size in bytes of the struct (for allocating memory), encoding to a stream
/// and decoding from a stream.
pub trait BinaryEncoder<T> {
    /// Returns the exact byte length of the structure as it would be if `encode` were called.
    fn byte_len(&self) -> usize;
    /// Encodes the instance to the write stream.
    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize>;
    /// Decodes an instance from the read stream. Implementations must return `BadDecodingError`
    /// as soon as any limit in `decoding_options` is exceeded.
    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<T>;

    /// Convenience method for encoding straight into a new vector. Reserved for tests and
    /// trivial code, elsewhere buffers are reused.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::with_capacity(self.byte_len()));
        let _ = self.encode(&mut buffer);
        buffer.into_inner()
    }
}

/// Converts an IO encoding error (and logs when in error) into an EncodingResult
pub fn process_encode_io_result<T>(result: std::io::Result<T>) -> EncodingResult<T> {
    result.map_err(|err| {
        trace!("Encoding error - {:?}", err);
        StatusCode::BadEncodingError
    })
}

/// Converts an IO decoding error (and logs when in error) into an EncodingResult
pub fn process_decode_io_result<T>(result: std::io::Result<T>) -> EncodingResult<T> {
    result.map_err(|err| {
        trace!("Decoding error - {:?}", err);
        StatusCode::BadDecodingError
    })
}

macro_rules! scalar_encoder {
    ($t:ty, $len:expr, $write:ident, $read:ident) => {
        impl BinaryEncoder<$t> for $t {
            fn byte_len(&self) -> usize {
                $len
            }

            fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
                process_encode_io_result(stream.$write::<LittleEndian>(*self))?;
                Ok($len)
            }

            fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
                process_decode_io_result(stream.$read::<LittleEndian>())
            }
        }
    };
}

scalar_encoder!(i16, 2, write_i16, read_i16);
scalar_encoder!(u16, 2, write_u16, read_u16);
scalar_encoder!(i32, 4, write_i32, read_i32);
scalar_encoder!(u32, 4, write_u32, read_u32);
scalar_encoder!(i64, 8, write_i64, read_i64);
scalar_encoder!(u64, 8, write_u64, read_u64);
scalar_encoder!(f32, 4, write_f32, read_f32);
scalar_encoder!(f64, 8, write_f64, read_f64);

impl BinaryEncoder<u8> for u8 {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u8(stream, *self)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        read_u8(stream)
    }
}

impl BinaryEncoder<bool> for bool {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u8(stream, u8::from(*self))
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(read_u8(stream)? == 1)
    }
}

/// Calculates the length in bytes of an array of encoded type
pub fn byte_len_array<T: BinaryEncoder<T>>(values: &Option<Vec<T>>) -> usize {
    4 + values
        .as_ref()
        .map(|values| values.iter().map(|v| v.byte_len()).sum::<usize>())
        .unwrap_or(0)
}

/// Write an array of the encoded type to stream, preserving distinction between null array and empty array
pub fn write_array<S: Write, T: BinaryEncoder<T>>(
    stream: &mut S,
    values: &Option<Vec<T>>,
) -> EncodingResult<usize> {
    match values {
        Some(values) => {
            let mut size = write_i32(stream, values.len() as i32)?;
            for value in values {
                size += value.encode(stream)?;
            }
            Ok(size)
        }
        None => write_i32(stream, -1),
    }
}

/// Reads an array of the encoded type from a stream, preserving distinction between null array and empty array
pub fn read_array<S: Read, T: BinaryEncoder<T>>(
    stream: &mut S,
    decoding_options: &DecodingOptions,
) -> EncodingResult<Option<Vec<T>>> {
    let len = read_i32(stream)?;
    if len == -1 {
        Ok(None)
    } else if len < -1 {
        error!("Array length is negative value and invalid");
        Err(StatusCode::BadDecodingError)
    } else if len as usize > decoding_options.max_array_length {
        error!(
            "Array length {} exceeds decoding limit {}",
            len, decoding_options.max_array_length
        );
        Err(StatusCode::BadDecodingError)
    } else {
        (0..len)
            .map(|_| T::decode(stream, decoding_options))
            .collect::<EncodingResult<Vec<T>>>()
            .map(Some)
    }
}

/// Writes an unsigned byte to the stream
pub fn write_u8<S: Write + ?Sized>(stream: &mut S, value: u8) -> EncodingResult<usize> {
    process_encode_io_result(stream.write_u8(value))?;
    Ok(1)
}

/// Writes a signed 32-bit value to the stream
pub fn write_i32<S: Write + ?Sized>(stream: &mut S, value: i32) -> EncodingResult<usize> {
    process_encode_io_result(stream.write_i32::<LittleEndian>(value))?;
    Ok(4)
}

/// Writes an unsigned 32-bit value to the stream
pub fn write_u32<S: Write + ?Sized>(stream: &mut S, value: u32) -> EncodingResult<usize> {
    process_encode_io_result(stream.write_u32::<LittleEndian>(value))?;
    Ok(4)
}

/// Writes raw bytes to the stream
pub fn write_bytes<S: Write + ?Sized>(stream: &mut S, value: &[u8]) -> EncodingResult<usize> {
    process_encode_io_result(stream.write_all(value))?;
    Ok(value.len())
}

/// Read an unsigned byte from the stream
pub fn read_u8<S: Read + ?Sized>(stream: &mut S) -> EncodingResult<u8> {
    process_decode_io_result(stream.read_u8())
}

/// Read a signed 32-bit value from the stream
pub fn read_i32<S: Read + ?Sized>(stream: &mut S) -> EncodingResult<i32> {
    process_decode_io_result(stream.read_i32::<LittleEndian>())
}

/// Read an unsigned 32-bit value from the stream
pub fn read_u32<S: Read + ?Sized>(stream: &mut S) -> EncodingResult<u32> {
    process_decode_io_result(stream.read_u32::<LittleEndian>())
}

/// Fills the buffer from the stream
pub fn read_bytes<S: Read + ?Sized>(stream: &mut S, buf: &mut [u8]) -> EncodingResult<usize> {
    process_decode_io_result(stream.read_exact(buf))?;
    Ok(buf.len())
}
