// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Service request / response structures and the structured types they carry. Each structure is
//! encoded as the concatenation of its fields in declaration order, which is what the
//! `ua_struct!` macro generates.

use std::io::{Read, Write};

use crate::types::{encoding::*, node_ids::ObjectId};

/// Implemented by structures that have a binary encoding id of their own, i.e. messages and
/// anything that travels inside an extension object.
pub trait MessageInfo {
    /// The object id associated with the message
    fn object_id(&self) -> ObjectId;
}

impl<T> BinaryEncoder<Option<Vec<T>>> for Option<Vec<T>>
where
    T: BinaryEncoder<T>,
{
    fn byte_len(&self) -> usize {
        byte_len_array(self)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_array(stream, self)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        read_array(stream, decoding_options)
    }
}

macro_rules! ua_struct {
    ($(#[$meta:meta])* $name:ident $(=> $object_id:ident)? {
        $($(#[$field_meta:meta])* $field:ident: $t:ty,)*
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $($(#[$field_meta])* pub $field: $t,)*
        }

        impl $crate::types::encoding::BinaryEncoder<$name> for $name {
            fn byte_len(&self) -> usize {
                0 $(+ self.$field.byte_len())*
            }

            fn encode<S: std::io::Write>(
                &self,
                stream: &mut S,
            ) -> $crate::types::encoding::EncodingResult<usize> {
                let mut size = 0;
                $(size += self.$field.encode(stream)?;)*
                Ok(size)
            }

            fn decode<S: std::io::Read>(
                stream: &mut S,
                decoding_options: &$crate::types::encoding::DecodingOptions,
            ) -> $crate::types::encoding::EncodingResult<Self> {
                $(let $field = <$t as $crate::types::encoding::BinaryEncoder<$t>>::decode(
                    stream,
                    decoding_options,
                )?;)*
                Ok($name { $($field,)* })
            }
        }

        $(
            impl $crate::types::service_types::MessageInfo for $name {
                fn object_id(&self) -> $crate::types::node_ids::ObjectId {
                    $crate::types::node_ids::ObjectId::$object_id
                }
            }
        )?
    };
}

/// Enumerations are encoded as an Int32.
macro_rules! ua_enum {
    ($(#[$meta:meta])* $name:ident { $default:ident = $default_value:expr, $($variant:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $default = $default_value,
            $($variant = $value,)*
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl $crate::types::encoding::BinaryEncoder<$name> for $name {
            fn byte_len(&self) -> usize {
                4
            }

            fn encode<S: std::io::Write>(
                &self,
                stream: &mut S,
            ) -> $crate::types::encoding::EncodingResult<usize> {
                $crate::types::encoding::write_i32(stream, *self as i32)
            }

            fn decode<S: std::io::Read>(
                stream: &mut S,
                _: &$crate::types::encoding::DecodingOptions,
            ) -> $crate::types::encoding::EncodingResult<Self> {
                let value = $crate::types::encoding::read_i32(stream)?;
                match value {
                    v if v == $default_value => Ok($name::$default),
                    $(v if v == $value => Ok($name::$variant),)*
                    v => {
                        error!("Invalid value {} for enum {}", v, stringify!($name));
                        Err($crate::types::status_code::StatusCode::BadDecodingError)
                    }
                }
            }
        }
    };
}

pub mod attribute;
pub mod enums;
pub mod headers;
pub mod monitored_item;
pub mod secure_channel;
pub mod session;
pub mod subscription;

pub use self::{
    attribute::*, enums::*, headers::*, monitored_item::*, secure_channel::*, session::*,
    subscription::*,
};
