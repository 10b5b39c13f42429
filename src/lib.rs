// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! An OPC UA client core. It connects to a server over `opc.tcp`, opens a secure channel,
//! creates and activates a session and keeps it alive, multiplexes service requests over the
//! channel and runs the subscription publish loop, delivering notifications to consumers in
//! sequence order.
//!
//! The entry point for most applications is [`client::ClientBuilder`].

#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::float_cmp)]
#![allow(clippy::from_over_into)]
#![allow(clippy::result_unit_err)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[cfg(test)]
extern crate tempdir;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate derivative;

// Every lock in the crate is taken through these, so that a deadlock can be chased by adding
// a trace in one place.

/// Locks a `Mutex`.
#[macro_export]
macro_rules! trace_lock {
    ($lock: expr) => {
        $lock.lock()
    };
}

/// Takes a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ($lock: expr) => {
        $lock.read()
    };
}

/// Takes a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ($lock: expr) => {
        $lock.write()
    };
}

pub mod client;
#[cfg(feature = "console-logging")]
pub mod console_logging;
pub mod core;
pub mod crypto;
pub mod sync;
pub mod types;

/// Glob import for applications: `use opcua_client::prelude::*;`
pub mod prelude {
    pub use crate::client::prelude::*;
    pub use crate::core::prelude::*;
}
