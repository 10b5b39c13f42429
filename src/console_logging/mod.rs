// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A console logger for client applications. Filtering is read from the `RUST_OPCUA_LOG`
//! environment variable, which takes the same syntax as `RUST_LOG`, so the output of other
//! crates using `RUST_LOG` stays out of the way.

use std::io::Write;

use env_logger::{fmt::Color, Builder, Env};

/// The environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "RUST_OPCUA_LOG";

/// Targets inside this crate are logged without the crate prefix.
fn short_target(target: &str) -> &str {
    target
        .strip_prefix("opcua_client::")
        .unwrap_or(target)
}

/// Install the console logger, logging at `info` unless `RUST_OPCUA_LOG` says otherwise.
/// Does nothing if a logger is already installed.
pub fn init() {
    init_with_default("info");
}

/// Install the console logger with `default_filter` applying when `RUST_OPCUA_LOG` is unset.
/// Returns false if a logger was already installed.
pub fn init_with_default(default_filter: &str) -> bool {
    let mut builder = Builder::from_env(Env::new().filter_or(LOG_ENV_VAR, default_filter));
    builder.format(|f, record| {
        let mut level_style = f.style();
        let color = match record.level() {
            log::Level::Error => Color::Red,
            log::Level::Warn => Color::Yellow,
            log::Level::Info => Color::Cyan,
            log::Level::Debug => Color::Green,
            log::Level::Trace => Color::Ansi256(8),
        };
        level_style.set_color(color).set_bold(record.level() <= log::Level::Warn);

        let mut target_style = f.style();
        target_style.set_bold(true);

        writeln!(
            f,
            "{} {:<5} {:<32} {}",
            chrono::Utc::now().format("%H:%M:%S%.3f"),
            level_style.value(record.level()),
            target_style.value(short_target(record.target())),
            record.args()
        )
    });
    let installed = builder.try_init().is_ok();
    if installed {
        info!(
            "Console logging enabled, set {} to change the filter",
            LOG_ENV_VAR
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_lose_crate_prefix() {
        assert_eq!(
            short_target("opcua_client::client::session::session"),
            "client::session::session"
        );
        assert_eq!(short_target("tokio::net"), "tokio::net");
    }
}
