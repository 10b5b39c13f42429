// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The wire side of a connection. Frames are read by the codec, messages are split into chunks
//! for sending and reassembled from chunks on receipt, and the secure channel checks and stamps
//! every chunk.

pub mod buffer;
pub mod chunker;
pub mod message_chunk;
pub mod secure_channel;
pub mod security_header;
pub mod tcp_codec;
pub mod tcp_types;
pub mod url;

pub mod prelude {
    pub use super::{
        buffer::*, chunker::*, message_chunk::*, secure_channel::*, security_header::*,
        tcp_codec::*, tcp_types::*, url::*,
    };
}
