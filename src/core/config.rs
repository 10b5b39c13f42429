// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::path::Path;

use crate::types::{
    service_types::{ApplicationDescription, ApplicationType},
    status_code::StatusCode,
    LocalizedText, UAString,
};

/// Configuration kept in a YAML file. Every failure to save or load is reported as
/// `BadConfigurationError` with the cause in the log.
pub trait Config: serde::Serialize {
    /// Writes the configuration to `path`. Nothing is written unless it is valid.
    fn save(&self, path: &Path) -> Result<(), StatusCode> {
        if !self.is_valid() {
            error!("Refusing to save an invalid configuration to {}", path.display());
            return Err(StatusCode::BadConfigurationError);
        }
        let yaml = serde_yaml::to_string(&self).map_err(|e| {
            error!("Configuration cannot be serialized, {}", e);
            StatusCode::BadConfigurationError
        })?;
        std::fs::write(path, yaml).map_err(|e| {
            error!("Configuration cannot be written to {}, {}", path.display(), e);
            StatusCode::BadConfigurationError
        })
    }

    /// Reads a configuration from `path`. The result is not checked for validity.
    fn load<A>(path: &Path) -> Result<A, StatusCode>
    where
        for<'de> A: Config + serde::Deserialize<'de>,
    {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            error!("Configuration cannot be read from {}, {}", path.display(), e);
            StatusCode::BadConfigurationError
        })?;
        serde_yaml::from_str(&yaml).map_err(|e| {
            error!("Configuration in {} is malformed, {}", path.display(), e);
            StatusCode::BadConfigurationError
        })
    }

    fn is_valid(&self) -> bool;

    fn application_name(&self) -> UAString;

    fn application_uri(&self) -> UAString;

    fn product_uri(&self) -> UAString;

    fn application_type(&self) -> ApplicationType;

    fn discovery_urls(&self) -> Option<Vec<UAString>> {
        None
    }

    /// Describes this application to the server when a session is created.
    fn application_description(&self) -> ApplicationDescription {
        ApplicationDescription {
            application_uri: self.application_uri(),
            application_name: LocalizedText::new("", self.application_name().as_ref()),
            application_type: self.application_type(),
            product_uri: self.product_uri(),
            gateway_server_uri: UAString::null(),
            discovery_profile_uri: UAString::null(),
            discovery_urls: self.discovery_urls(),
        }
    }
}
