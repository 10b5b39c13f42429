// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Security policies. The client core only implements the `None` policy, the other policies are
//! recognized so that an endpoint using one of them can be rejected with a meaningful status.

use std::fmt;
use std::str::FromStr;

use crate::types::{status_code::StatusCode, ByteString};

pub const SECURITY_POLICY_NONE: &str = "None";
pub const SECURITY_POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";

const BASIC_128_RSA_15_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
const BASIC_256_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
const BASIC_256_SHA_256_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";
const AES_128_SHA_256_RSA_OAEP_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep";
const AES_256_SHA_256_RSA_PSS_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityPolicy {
    Unknown,
    None,
    Aes128Sha256RsaOaep,
    Basic256Sha256,
    Aes256Sha256RsaPss,
    Basic128Rsa15,
    Basic256,
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for SecurityPolicy {
    type Err = ();

    /// Accepts either the short name or the uri of a policy. Unrecognized input yields
    /// `SecurityPolicy::Unknown` rather than an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | SECURITY_POLICY_NONE => SecurityPolicy::None,
            "Basic128Rsa15" => SecurityPolicy::Basic128Rsa15,
            "Basic256" => SecurityPolicy::Basic256,
            "Basic256Sha256" => SecurityPolicy::Basic256Sha256,
            "Aes128-Sha256-RsaOaep" => SecurityPolicy::Aes128Sha256RsaOaep,
            "Aes256-Sha256-RsaPss" => SecurityPolicy::Aes256Sha256RsaPss,
            uri => SecurityPolicy::from_uri(uri),
        })
    }
}

impl SecurityPolicy {
    pub fn to_str(&self) -> &'static str {
        match self {
            SecurityPolicy::None => SECURITY_POLICY_NONE,
            SecurityPolicy::Basic128Rsa15 => "Basic128Rsa15",
            SecurityPolicy::Basic256 => "Basic256",
            SecurityPolicy::Basic256Sha256 => "Basic256Sha256",
            SecurityPolicy::Aes128Sha256RsaOaep => "Aes128-Sha256-RsaOaep",
            SecurityPolicy::Aes256Sha256RsaPss => "Aes256-Sha256-RsaPss",
            SecurityPolicy::Unknown => "Unknown",
        }
    }

    /// Returns the policy uri, or `None` for an unknown policy.
    pub fn to_uri(&self) -> Option<&'static str> {
        match self {
            SecurityPolicy::None => Some(SECURITY_POLICY_NONE_URI),
            SecurityPolicy::Basic128Rsa15 => Some(BASIC_128_RSA_15_URI),
            SecurityPolicy::Basic256 => Some(BASIC_256_URI),
            SecurityPolicy::Basic256Sha256 => Some(BASIC_256_SHA_256_URI),
            SecurityPolicy::Aes128Sha256RsaOaep => Some(AES_128_SHA_256_RSA_OAEP_URI),
            SecurityPolicy::Aes256Sha256RsaPss => Some(AES_256_SHA_256_RSA_PSS_URI),
            SecurityPolicy::Unknown => None,
        }
    }

    pub fn from_uri(uri: &str) -> SecurityPolicy {
        match uri {
            SECURITY_POLICY_NONE_URI => SecurityPolicy::None,
            BASIC_128_RSA_15_URI => SecurityPolicy::Basic128Rsa15,
            BASIC_256_URI => SecurityPolicy::Basic256,
            BASIC_256_SHA_256_URI => SecurityPolicy::Basic256Sha256,
            AES_128_SHA_256_RSA_OAEP_URI => SecurityPolicy::Aes128Sha256RsaOaep,
            AES_256_SHA_256_RSA_PSS_URI => SecurityPolicy::Aes256Sha256RsaPss,
            _ => {
                error!(
                    "Specified security policy uri \"{}\" is not recognized",
                    uri
                );
                SecurityPolicy::Unknown
            }
        }
    }

    /// Returns true if the security policy is implemented. Only `None` is.
    pub fn is_supported(&self) -> bool {
        matches!(self, SecurityPolicy::None)
    }

    /// Checks the policy can be used to open a channel.
    pub fn ensure_supported(&self) -> Result<(), StatusCode> {
        if self.is_supported() {
            Ok(())
        } else {
            error!("Security policy {} is not supported", self);
            Err(StatusCode::BadSecurityPolicyRejected)
        }
    }

    /// Size in bytes of the symmetric signature appended to each chunk.
    pub fn symmetric_signature_size(&self) -> usize {
        0
    }

    /// The nonce sent in OpenSecureChannel. No nonce is exchanged when there is no security.
    pub fn random_nonce(&self) -> ByteString {
        ByteString::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_str() {
        assert_eq!(
            SecurityPolicy::from_str(SECURITY_POLICY_NONE_URI).unwrap(),
            SecurityPolicy::None
        );
        assert_eq!(
            SecurityPolicy::from_str("None").unwrap(),
            SecurityPolicy::None
        );
        assert_eq!(
            SecurityPolicy::from_str(BASIC_256_SHA_256_URI).unwrap(),
            SecurityPolicy::Basic256Sha256
        );
        assert_eq!(
            SecurityPolicy::from_str("http://opcfoundation.org/UA/SecurityPolicy#").unwrap(),
            SecurityPolicy::Unknown
        );
    }

    #[test]
    fn only_none_is_supported() {
        assert!(SecurityPolicy::None.ensure_supported().is_ok());
        assert_eq!(
            SecurityPolicy::Basic256Sha256.ensure_supported(),
            Err(StatusCode::BadSecurityPolicyRejected)
        );
        assert_eq!(
            SecurityPolicy::Unknown.ensure_supported(),
            Err(StatusCode::BadSecurityPolicyRejected)
        );
        assert!(SecurityPolicy::None.random_nonce().is_null());
    }
}
