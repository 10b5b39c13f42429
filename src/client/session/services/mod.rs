// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

mod attributes;
mod session;
pub(crate) mod subscriptions;
