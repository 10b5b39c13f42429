// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use crate::sync::RwLock;

/// Values attached to the current session, one per type. The bag is emptied whenever a new
/// session is created on the server, so anything derived from the server (e.g. its namespace
/// table) must be stored again by an initializer.
#[derive(Default)]
pub struct SessionAttributes {
    values: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SessionAttributes {
    /// Store a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        let mut values = trace_write_lock!(self.values);
        values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Get the value of type `T`, if one is stored.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = {
            let values = trace_read_lock!(self.values);
            values.get(&TypeId::of::<T>()).cloned()
        }?;
        value.downcast::<T>().ok()
    }

    /// Remove and return the value of type `T`.
    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = {
            let mut values = trace_write_lock!(self.values);
            values.remove(&TypeId::of::<T>())
        }?;
        value.downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        let values = trace_read_lock!(self.values);
        values.contains_key(&TypeId::of::<T>())
    }

    pub(crate) fn clear(&self) {
        let mut values = trace_write_lock!(self.values);
        values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SessionAttributes;
    use crate::types::NamespaceTable;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn insert_get_remove() {
        let attributes = SessionAttributes::default();
        assert!(attributes.get::<Marker>().is_none());

        attributes.insert(Marker(1));
        attributes.insert(Marker(2));
        attributes.insert(NamespaceTable::new());

        assert_eq!(*attributes.get::<Marker>().unwrap(), Marker(2));
        assert_eq!(attributes.get::<NamespaceTable>().unwrap().len(), 1);

        assert_eq!(*attributes.remove::<Marker>().unwrap(), Marker(2));
        assert!(!attributes.contains::<Marker>());
        assert!(attributes.contains::<NamespaceTable>());

        attributes.clear();
        assert!(attributes.get::<NamespaceTable>().is_none());
    }
}
