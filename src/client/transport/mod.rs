// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The connection layer of the client: the transport that frames and chunks messages, the
//! request multiplexer that correlates responses with requests, and the secure channel on top.

mod channel;
mod connect;
mod core;
mod state;
pub mod tcp;

pub use channel::{AsyncSecureChannel, SecureChannelEventLoop};
pub use connect::{Connector, TcpConnector, Transport};
pub use core::{OutgoingMessage, ResponseCallback, TransportPollResult, TransportState};
pub use tcp::{TcpTransport, TransportConfiguration};
