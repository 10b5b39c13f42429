// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::str::FromStr;

use crate::types::status_code::StatusCode;

ua_enum! {
    /// The security applied to messages on a secure channel.
    MessageSecurityMode {
        Invalid = 0,
        None = 1,
        Sign = 2,
        SignAndEncrypt = 3,
    }
}

impl FromStr for MessageSecurityMode {
    type Err = StatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(MessageSecurityMode::None),
            "Sign" => Ok(MessageSecurityMode::Sign),
            "SignAndEncrypt" => Ok(MessageSecurityMode::SignAndEncrypt),
            _ => {
                error!("Specified security mode \"{}\" is not recognized", s);
                Err(StatusCode::BadSecurityChecksFailed)
            }
        }
    }
}

ua_enum! {
    SecurityTokenRequestType {
        Issue = 0,
        Renew = 1,
    }
}

ua_enum! {
    ApplicationType {
        Server = 0,
        Client = 1,
        ClientAndServer = 2,
        DiscoveryServer = 3,
    }
}

ua_enum! {
    UserTokenType {
        Anonymous = 0,
        UserName = 1,
        Certificate = 2,
        IssuedToken = 3,
    }
}

ua_enum! {
    TimestampsToReturn {
        Source = 0,
        Server = 1,
        Both = 2,
        Neither = 3,
        Invalid = 4,
    }
}

ua_enum! {
    MonitoringMode {
        Disabled = 0,
        Sampling = 1,
        Reporting = 2,
    }
}

ua_enum! {
    DataChangeTrigger {
        Status = 0,
        StatusValue = 1,
        StatusValueTimestamp = 2,
    }
}

ua_enum! {
    /// The state of a server as reported by `Server_ServerStatus_State`.
    ServerState {
        Running = 0,
        Failed = 1,
        NoConfiguration = 2,
        Suspended = 3,
        Shutdown = 4,
        Test = 5,
        CommunicationFault = 6,
        Unknown = 7,
    }
}

impl ServerState {
    pub fn from_i32(value: i32) -> Option<ServerState> {
        use ServerState::*;
        [
            Running,
            Failed,
            NoConfiguration,
            Suspended,
            Shutdown,
            Test,
            CommunicationFault,
            Unknown,
        ]
        .into_iter()
        .find(|s| *s as i32 == value)
    }
}

/// The attribute ids of a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    Value = 13,
    DataType = 14,
    EventNotifier = 12,
}

bitflags! {
    /// Which diagnostics a client asks the server to return.
    pub struct DiagnosticBits: u32 {
        const SERVICE_LEVEL_SYMBOLIC_ID = 0x0000_0001;
        const SERVICE_LEVEL_LOCALIZED_TEXT = 0x0000_0002;
        const SERVICE_LEVEL_ADDITIONAL_INFO = 0x0000_0004;
        const SERVICE_LEVEL_INNER_STATUS_CODE = 0x0000_0008;
        const SERVICE_LEVEL_INNER_DIAGNOSTICS = 0x0000_0010;
        const OPERATIONAL_LEVEL_SYMBOLIC_ID = 0x0000_0020;
        const OPERATIONAL_LEVEL_LOCALIZED_TEXT = 0x0000_0040;
        const OPERATIONAL_LEVEL_ADDITIONAL_INFO = 0x0000_0080;
        const OPERATIONAL_LEVEL_INNER_STATUS_CODE = 0x0000_0100;
        const OPERATIONAL_LEVEL_INNER_DIAGNOSTICS = 0x0000_0200;
    }
}

impl Default for DiagnosticBits {
    fn default() -> Self {
        DiagnosticBits::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::*;

    #[test]
    fn enum_encoding() {
        let buf = MonitoringMode::Reporting.encode_to_vec();
        assert_eq!(buf, vec![2, 0, 0, 0]);
        let mode = MonitoringMode::decode(&mut buf.as_slice(), &DecodingOptions::default());
        assert_eq!(mode.unwrap(), MonitoringMode::Reporting);

        let bad = vec![9u8, 0, 0, 0];
        assert!(MonitoringMode::decode(&mut bad.as_slice(), &DecodingOptions::default()).is_err());
    }

    #[test]
    fn server_state() {
        assert_eq!(ServerState::from_i32(0), Some(ServerState::Running));
        assert_eq!(ServerState::from_i32(4), Some(ServerState::Shutdown));
        assert_eq!(ServerState::from_i32(99), None);
    }

    #[test]
    fn security_mode_from_str() {
        assert_eq!(
            MessageSecurityMode::from_str("None").unwrap(),
            MessageSecurityMode::None
        );
        assert!(MessageSecurityMode::from_str("Bogus").is_err());
    }
}
