// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Connection level building blocks shared by the client: the `opc.tcp` handshake messages and
//! codec, message chunking, the secure channel state, request handles and the set of service
//! messages the client can send and receive.

/// Debugging helpers
pub mod debug {
    const BYTES_PER_LINE: usize = 32;

    /// Dumps a buffer at trace level on the `hex` target, one line of hex and printable
    /// characters per 32 bytes.
    pub fn log_buffer(message: &str, buf: &[u8]) {
        if !log_enabled!(target: "hex", log::Level::Trace) {
            return;
        }
        trace!(target: "hex", "{} ({} bytes)", message, buf.len());
        for (line, bytes) in buf.chunks(BYTES_PER_LINE).enumerate() {
            trace!(target: "hex", "{}", dump_line(line * BYTES_PER_LINE, bytes));
        }
    }

    fn dump_line(offset: usize, bytes: &[u8]) -> String {
        let hex: String = bytes.iter().map(|b| format!(" {:02x}", b)).collect();
        let text: String = bytes
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        format!(
            "{:08x}:{:<width$} {}",
            offset,
            hex,
            text,
            width = BYTES_PER_LINE * 3
        )
    }

    #[cfg(test)]
    mod tests {
        #[test]
        fn dump_line_pads_short_lines() {
            let line = super::dump_line(32, b"OPC\x00");
            assert!(line.starts_with("00000020: 4f 50 43 00"));
            assert!(line.ends_with(" OPC."));
            assert_eq!(line.len(), 9 + 32 * 3 + 1 + 4);
        }
    }
}

pub mod constants {
    /// Port assumed when an `opc.tcp://` url does not name one.
    pub const DEFAULT_OPC_UA_SERVER_PORT: u16 = 4840;
}

pub mod comms;
pub mod config;
pub mod handle;
#[rustfmt::skip]
pub mod supported_message;

pub mod prelude {
    pub use super::{comms::prelude::*, config::Config, supported_message::*};
    pub use crate::types::*;
}
