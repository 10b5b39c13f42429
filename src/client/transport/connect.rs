// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{core::comms::secure_channel::SecureChannel, sync::RwLock, types::StatusCode};

use super::{
    core::{OutgoingMessage, TransportPollResult},
    tcp::{TcpTransport, TransportConfiguration},
};

/// An established connection to a server. The secure channel event loop polls it, and each
/// poll makes progress on exactly one of sending, receiving or closing. `poll` must be cancel
/// safe.
#[async_trait]
pub trait Transport: Send {
    async fn poll(&mut self) -> TransportPollResult;
}

/// Creates transports. The secure channel calls this every time it (re)connects, which lets
/// applications and tests substitute their own transport for TCP.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint_url` and complete the transport level handshake. Requests are read
    /// from `outgoing_recv` once connected.
    async fn connect(
        &self,
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Box<dyn Transport>, StatusCode>;
}

/// Connects over `opc.tcp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Box<dyn Transport>, StatusCode> {
        let transport =
            TcpTransport::connect(secure_channel, outgoing_recv, config, endpoint_url).await?;
        Ok(Box::new(transport))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn poll(&mut self) -> TransportPollResult {
        TcpTransport::poll(self).await
    }
}
