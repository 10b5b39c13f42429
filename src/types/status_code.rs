// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The `StatusCode` type. A status code is a 32-bit value whose upper 16 bits identify the
//! status and whose lower 16 bits carry info flags. Only the codes the client core produces or
//! reacts to are named here, any other value received from a server is preserved as is.

#![allow(non_upper_case_globals)]

use std::{
    error::Error,
    fmt,
    io::{self, Read, Write},
};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::types::encoding::*;

macro_rules! status_codes {
    ($($name:ident = $value:tt, $description:expr;)*) => {
        bitflags! {
            pub struct StatusCode: u32 {
                const IS_ERROR = 0x8000_0000;
                const IS_UNCERTAIN = 0x4000_0000;
                const STATUS_MASK = 0xFFFF_0000;
                const BIT_MASK = 0x0000_FFFF;

                const STRUCTURE_CHANGED = 0x8000;
                const SEMANTICS_CHANGED = 0x4000;
                const OVERFLOW = 0x0080;
                const HISTORICAL_CALCULATED = 0x0001;
                const HISTORICAL_INTERPOLATED = 0x0002;

                $(const $name = $value;)*
            }
        }

        impl StatusCode {
            /// Returns the symbolic name of the status, ignoring info bits.
            pub fn name(&self) -> &'static str {
                match self.status().bits() {
                    $($value => stringify!($name),)*
                    _ => "Unrecognized",
                }
            }

            /// Returns a short human readable description of the status.
            pub fn description(&self) -> &'static str {
                match self.status().bits() {
                    $($value => $description,)*
                    _ => "Unrecognized status code",
                }
            }
        }
    };
}

status_codes! {
    Good = 0x0000_0000, "The operation succeeded.";
    GoodSubscriptionTransferred = 0x002D_0000, "The subscription was transferred to another session.";
    GoodCompletesAsynchronously = 0x002E_0000, "The processing will complete asynchronously.";
    UncertainLastUsableValue = 0x4090_0000, "Whatever was updating this value has stopped doing so.";
    BadUnexpectedError = 0x8001_0000, "An unexpected error occurred.";
    BadInternalError = 0x8002_0000, "An internal error occurred as a result of a programming or configuration error.";
    BadOutOfMemory = 0x8003_0000, "Not enough memory to complete the operation.";
    BadResourceUnavailable = 0x8004_0000, "An operating system resource is not available.";
    BadCommunicationError = 0x8005_0000, "A low level communication error occurred.";
    BadEncodingError = 0x8006_0000, "Encoding halted because of invalid data in the objects being serialized.";
    BadDecodingError = 0x8007_0000, "Decoding halted because of invalid data in the stream.";
    BadEncodingLimitsExceeded = 0x8008_0000, "The message encoding/decoding limits imposed by the stack have been exceeded.";
    BadUnknownResponse = 0x8009_0000, "An unrecognized response was received from the server.";
    BadTimeout = 0x800A_0000, "The operation timed out.";
    BadServiceUnsupported = 0x800B_0000, "The server does not support the requested service.";
    BadShutdown = 0x800C_0000, "The operation was cancelled because the application is shutting down.";
    BadServerNotConnected = 0x800D_0000, "The operation could not complete because the client is not connected to the server.";
    BadServerHalted = 0x800E_0000, "The server has stopped and cannot process any requests.";
    BadNothingToDo = 0x800F_0000, "There was nothing to do because the client passed a list of operations with no elements.";
    BadTooManyOperations = 0x8010_0000, "The request could not be processed because it specified too many operations.";
    BadCertificateInvalid = 0x8012_0000, "The certificate provided as a parameter is not valid.";
    BadSecurityChecksFailed = 0x8013_0000, "An error occurred verifying security.";
    BadUserAccessDenied = 0x801F_0000, "User does not have permission to perform the requested operation.";
    BadIdentityTokenInvalid = 0x8020_0000, "The user identity token is not valid.";
    BadIdentityTokenRejected = 0x8021_0000, "The user identity token is valid but the server has rejected it.";
    BadSecureChannelIdInvalid = 0x8022_0000, "The specified secure channel is no longer valid.";
    BadInvalidTimestamp = 0x8023_0000, "The timestamp is outside the range allowed by the server.";
    BadNonceInvalid = 0x8024_0000, "The nonce does appear to be not a random value or it is not the correct length.";
    BadSessionIdInvalid = 0x8025_0000, "The session id is not valid.";
    BadSessionClosed = 0x8026_0000, "The session was closed by the client.";
    BadSessionNotActivated = 0x8027_0000, "The session cannot be used because ActivateSession has not been called.";
    BadSubscriptionIdInvalid = 0x8028_0000, "The subscription id is not valid.";
    BadRequestHeaderInvalid = 0x802A_0000, "The header for the request is missing or invalid.";
    BadTimestampsToReturnInvalid = 0x802B_0000, "The timestamps to return parameter is invalid.";
    BadRequestCancelledByClient = 0x802C_0000, "The request was cancelled by the client.";
    BadWaitingForInitialData = 0x8032_0000, "Waiting for the server to obtain values from the underlying data source.";
    BadNodeIdInvalid = 0x8033_0000, "The syntax of the node id is not valid.";
    BadNodeIdUnknown = 0x8034_0000, "The node id refers to a node that does not exist in the server address space.";
    BadAttributeIdInvalid = 0x8035_0000, "The attribute is not supported for the specified Node.";
    BadNotSupported = 0x803D_0000, "The requested operation is not supported.";
    BadMonitoredItemIdInvalid = 0x8042_0000, "The monitoring item id does not refer to a valid monitored item.";
    BadMonitoredItemFilterInvalid = 0x8043_0000, "The monitored item filter parameter is not valid.";
    BadMonitoredItemFilterUnsupported = 0x8044_0000, "The server does not support the requested monitored item filter.";
    BadSecurityModeRejected = 0x8054_0000, "The security mode does not meet the requirements set by the server.";
    BadSecurityPolicyRejected = 0x8055_0000, "The security policy does not meet the requirements set by the server.";
    BadTooManySessions = 0x8056_0000, "The server has reached its maximum number of sessions.";
    BadTooManySubscriptions = 0x8077_0000, "The server has reached its maximum number of subscriptions.";
    BadTooManyPublishRequests = 0x8078_0000, "The server has reached the maximum number of queued publish requests.";
    BadNoSubscription = 0x8079_0000, "There is no subscription available for this session.";
    BadSequenceNumberUnknown = 0x807A_0000, "The sequence number is unknown to the server.";
    BadMessageNotAvailable = 0x807B_0000, "The requested notification message is no longer available.";
    BadTcpServerTooBusy = 0x807D_0000, "The server cannot process the request because it is too busy.";
    BadTcpMessageTypeInvalid = 0x807E_0000, "The type of the message specified in the header invalid.";
    BadTcpSecureChannelUnknown = 0x807F_0000, "The SecureChannelId and/or TokenId are not currently in use.";
    BadTcpMessageTooLarge = 0x8080_0000, "The size of the message chunk specified in the header is too large.";
    BadTcpNotEnoughResources = 0x8081_0000, "There are not enough resources to process the request.";
    BadTcpInternalError = 0x8082_0000, "An internal error occurred.";
    BadTcpEndpointUrlInvalid = 0x8083_0000, "The server does not recognize the QueryString specified.";
    BadRequestInterrupted = 0x8084_0000, "The request could not be sent because of a network interruption.";
    BadRequestTimeout = 0x8085_0000, "Timeout occurred while processing the request.";
    BadSecureChannelClosed = 0x8086_0000, "The secure channel has been closed.";
    BadSecureChannelTokenUnknown = 0x8087_0000, "The token has expired or is not recognized.";
    BadSequenceNumberInvalid = 0x8088_0000, "The sequence number is not valid.";
    BadConfigurationError = 0x8089_0000, "There is a problem with the configuration that affects the usefulness of the value.";
    BadNotConnected = 0x808A_0000, "The variable should receive its value from another variable, but has never been configured to do so.";
    BadInvalidArgument = 0x80AB_0000, "One or more arguments are invalid.";
    BadConnectionClosed = 0x80AE_0000, "The network connection has been closed.";
    BadInvalidState = 0x80AF_0000, "The operation cannot be completed because the object is closed, uninitialized or in some other invalid state.";
    BadRequestTooLarge = 0x80B8_0000, "The request message size exceeds limits set by the server.";
    BadResponseTooLarge = 0x80B9_0000, "The response message size exceeds limits set by the client.";
    BadProtocolVersionUnsupported = 0x80BE_0000, "The applications do not have compatible protocol versions.";
}

// The bitflags! macro implements Debug for StatusCode but it fouls the display because status
// codes are a combination of bits and unique values.
impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bits = self.bitflags();
        if bits.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}+{:#06x}", self.name(), bits.bits())
        }
    }
}

impl BinaryEncoder<StatusCode> for StatusCode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u32(stream, self.bits())
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(StatusCode::from_bits_truncate(read_u32(stream)?))
    }
}

impl Error for StatusCode {}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Good
    }
}

impl StatusCode {
    /// Returns the info bits of the status code, i.e. it masks out the actual status code value
    pub fn bitflags(&self) -> StatusCode {
        *self & StatusCode::BIT_MASK
    }

    /// Returns the status only, i.e. it masks out any bit flags that come with the status code
    pub fn status(&self) -> StatusCode {
        *self & StatusCode::STATUS_MASK
    }

    /// Tests if the status code is bad
    pub fn is_bad(&self) -> bool {
        self.contains(StatusCode::IS_ERROR)
    }

    /// Tests if the status code is uncertain
    pub fn is_uncertain(&self) -> bool {
        self.contains(StatusCode::IS_UNCERTAIN)
    }

    /// Tests if the status code is good (i.e. not bad or uncertain)
    pub fn is_good(&self) -> bool {
        !self.is_bad() && !self.is_uncertain()
    }

    /// Tests if the status is one a server uses to say the session it was asked to use is gone
    /// or unusable, meaning a new session has to be established.
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self.status(),
            StatusCode::BadSessionIdInvalid
                | StatusCode::BadSessionClosed
                | StatusCode::BadSessionNotActivated
        )
    }
}

impl From<StatusCode> for io::Error {
    fn from(e: StatusCode) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("StatusCode {}", e))
    }
}

// Serialize / Deserialize are manually implemented because bitflags! doesn't do it.

impl Serialize for StatusCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

struct StatusCodeVisitor;

impl<'de> Visitor<'de> for StatusCodeVisitor {
    type Value = u32;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an unsigned 32-bit integer")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u32::try_from(value).map_err(|_| E::custom("status code out of range"))
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(StatusCode::from_bits_truncate(
            deserializer.deserialize_u32(StatusCodeVisitor)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::StatusCode;

    #[test]
    fn status_code() {
        assert!(StatusCode::Good.is_good());
        assert!(!StatusCode::Good.is_bad());
        assert!(!StatusCode::Good.is_uncertain());

        assert!(StatusCode::UncertainLastUsableValue.is_uncertain());
        assert!(!StatusCode::UncertainLastUsableValue.is_bad());

        assert!(StatusCode::BadDecodingError.is_bad());
        assert!(!StatusCode::BadDecodingError.is_good());

        assert_eq!(
            (StatusCode::BadDecodingError | StatusCode::HISTORICAL_CALCULATED).status(),
            StatusCode::BadDecodingError
        );
        assert_eq!(
            (StatusCode::BadDecodingError | StatusCode::HISTORICAL_CALCULATED).bitflags(),
            StatusCode::HISTORICAL_CALCULATED
        );
    }

    #[test]
    fn unknown_codes_survive_truncation() {
        let raw = 0x80FF_0000;
        let status = StatusCode::from_bits_truncate(raw);
        assert_eq!(status.bits(), raw);
        assert!(status.is_bad());
        assert_eq!(status.name(), "Unrecognized");
    }

    #[test]
    fn display_uses_name() {
        assert_eq!(format!("{}", StatusCode::BadTimeout), "BadTimeout");
        assert_eq!(
            format!("{}", StatusCode::BadTimeout | StatusCode::OVERFLOW),
            "BadTimeout+0x0080"
        );
    }

    #[test]
    fn session_faults() {
        assert!(StatusCode::BadSessionIdInvalid.is_session_fault());
        assert!(StatusCode::BadSessionClosed.is_session_fault());
        assert!(StatusCode::BadSessionNotActivated.is_session_fault());
        assert!(!StatusCode::BadTimeout.is_session_fault());
    }
}
