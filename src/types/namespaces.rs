// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains `NamespaceTable`, the client's copy of the server's namespace array.

/// The standard OPC UA namespace at index 0.
pub const OPC_UA_NAMESPACE_URI: &str = "http://opcfoundation.org/UA/";

/// Maps namespace indexes to uris and back. The table always starts with the OPC UA namespace at
/// index 0 until it is replaced by the array read from a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTable {
    namespaces: Vec<String>,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        NamespaceTable {
            namespaces: vec![OPC_UA_NAMESPACE_URI.to_string()],
        }
    }
}

impl NamespaceTable {
    pub fn new() -> NamespaceTable {
        NamespaceTable::default()
    }

    /// Replaces the table with the namespace array read from a server.
    pub fn update<T>(&mut self, namespaces: T)
    where
        T: IntoIterator<Item = String>,
    {
        self.namespaces = namespaces.into_iter().collect();
    }

    /// Adds a uri if it is not already present and returns its index. Returns `None` when the
    /// table is full.
    pub fn add(&mut self, uri: &str) -> Option<u16> {
        if let Some(idx) = self.index_of(uri) {
            Some(idx)
        } else if self.namespaces.len() >= u16::MAX as usize {
            None
        } else {
            self.namespaces.push(uri.to_string());
            Some((self.namespaces.len() - 1) as u16)
        }
    }

    pub fn index_of(&self, uri: &str) -> Option<u16> {
        self.namespaces
            .iter()
            .position(|ns| ns == uri)
            .map(|idx| idx as u16)
    }

    pub fn uri(&self, index: u16) -> Option<&str> {
        self.namespaces.get(index as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let table = NamespaceTable::new();
        assert_eq!(table.len(), 1);
        assert_eq!(table.uri(0), Some(OPC_UA_NAMESPACE_URI));
        assert_eq!(table.index_of(OPC_UA_NAMESPACE_URI), Some(0));
    }

    #[test]
    fn update_and_add() {
        let mut table = NamespaceTable::new();
        table.update(vec![
            OPC_UA_NAMESPACE_URI.to_string(),
            "urn:server".to_string(),
        ]);
        assert_eq!(table.index_of("urn:server"), Some(1));
        assert_eq!(table.add("urn:server"), Some(1));
        assert_eq!(table.add("urn:other"), Some(2));
        assert_eq!(table.uri(2), Some("urn:other"));
        assert_eq!(table.uri(3), None);
    }
}
