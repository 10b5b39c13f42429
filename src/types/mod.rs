// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The binary types used by the client core. This is the subset of the OPC UA built-in types and
//! service structures that the connection, session and subscription machinery exchange with a
//! server, together with the `BinaryEncoder` codec they share.

/// Limits applied when decoding data received from a server.
pub mod constants {
    /// Default maximum number of elements in an array
    pub const MAX_ARRAY_LENGTH: usize = 100_000;
    /// Default maximum size of a string in bytes
    pub const MAX_STRING_LENGTH: usize = 65_535;
    /// Default maximum size of a byte string in bytes
    pub const MAX_BYTE_STRING_LENGTH: usize = 65_535;
    /// Default maximum size of a certificate to send
    pub const MAX_CERTIFICATE_LENGTH: usize = 32_767;
    /// Default maximum number of chunks in a message. 0 means no limit
    pub const MAX_CHUNK_COUNT: usize = 0;
    /// Default maximum size of a message in bytes. 0 means no limit
    pub const MAX_MESSAGE_SIZE: usize = 65_535 * 64;
    /// Maximum nesting of diagnostic infos and variants before decoding gives up
    pub const MAX_DECODING_DEPTH: usize = 10;
}

pub mod basic_types;
pub mod byte_string;
pub mod data_value;
pub mod date_time;
pub mod encoding;
pub mod extension_object;
pub mod namespaces;
pub mod node_id;
pub mod node_ids;
pub mod notification_message;
pub mod service_types;
pub mod status_code;
pub mod string;
pub mod variant;

pub use self::{
    basic_types::*, byte_string::ByteString, data_value::DataValue, date_time::DateTime,
    encoding::*, extension_object::ExtensionObject, namespaces::NamespaceTable, node_id::*,
    node_ids::*, service_types::*, status_code::StatusCode, string::UAString, variant::Variant,
};
