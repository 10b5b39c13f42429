// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Lock types used throughout the crate. Guards from these locks must never be held across an
//! `.await`.

pub type RwLock<T> = parking_lot::RwLock<T>;
pub type Mutex<T> = parking_lot::Mutex<T>;
