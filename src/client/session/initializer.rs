// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use async_trait::async_trait;

use crate::types::{NamespaceTable, ReadValueId, StatusCode, TimestampsToReturn, VariableId};

use super::{session_debug, Session};

/// Work done every time a session becomes active, before any waiting service call is released.
/// A failing initializer is logged and does not prevent the session from becoming active.
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    /// A short name used in log messages.
    fn name(&self) -> &str;

    async fn initialize(&self, session: &Session) -> Result<(), StatusCode>;
}

/// Reads the namespace array of the server and stores it as a [`NamespaceTable`] in the session
/// attributes. Registered on every session by default.
pub struct NamespaceTableInitializer;

#[async_trait]
impl SessionInitializer for NamespaceTableInitializer {
    fn name(&self) -> &str {
        "namespace table"
    }

    async fn initialize(&self, session: &Session) -> Result<(), StatusCode> {
        let results = session
            .read(
                &[ReadValueId::from(VariableId::Server_NamespaceArray)],
                TimestampsToReturn::Neither,
                0.0,
            )
            .await?;

        let value = results
            .into_iter()
            .next()
            .ok_or(StatusCode::BadUnknownResponse)?;
        if value.status().is_bad() {
            return Err(value.status());
        }
        let namespaces = value
            .value
            .and_then(|v| v.as_string_array())
            .ok_or(StatusCode::BadUnknownResponse)?;

        let mut table = NamespaceTable::new();
        table.update(namespaces.iter().map(|n| n.as_ref().to_string()));
        session_debug!(session, "Server has {} namespaces", table.len());
        session.attributes().insert(table);
        Ok(())
    }
}
