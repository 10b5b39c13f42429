// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Counters issuing request handles and client handles. Both skip the values below their
//! first, so 0 can be reserved to mean "no handle".

use std::sync::atomic::{AtomicU32, Ordering};

/// Issues `first`, `first + 1`, ... and starts over at `first` after `u32::MAX`.
#[derive(Debug, Clone)]
pub struct Handle {
    next: u32,
    first: u32,
}

impl Handle {
    pub fn new(first: u32) -> Handle {
        Handle { next: first, first }
    }

    pub fn next(&mut self) -> u32 {
        let issued = self.next;
        self.next = issued.checked_add(1).unwrap_or(self.first);
        issued
    }
}

/// [`Handle`] for sharing between tasks.
#[derive(Debug)]
pub struct AtomicHandle {
    next: AtomicU32,
    first: u32,
}

impl AtomicHandle {
    pub fn new(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
            first,
        }
    }

    pub fn next(&self) -> u32 {
        let first = self.first;
        let step = |current: u32| Some(current.checked_add(1).unwrap_or(first).max(first));
        // The closure never declines, so both arms carry the value before the update
        match self.next.fetch_update(Ordering::AcqRel, Ordering::Acquire, step) {
            Ok(issued) | Err(issued) => issued.max(first),
        }
    }
}
