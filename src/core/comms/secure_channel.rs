// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use chrono::Duration;

use crate::core::debug;
use crate::crypto::SecurityPolicy;
use crate::types::{
    service_types::ChannelSecurityToken, status_code::StatusCode, BinaryEncoder, ByteString,
    DateTime, DecodingOptions, MessageSecurityMode,
};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader, MessageChunkType},
    security_header::{AsymmetricSecurityHeader, SecurityHeader, SymmetricSecurityHeader},
};

/// The token issued by the server in OpenSecureChannel. Its lifetime counts from when the
/// client received it.
#[derive(Debug, Clone, Copy)]
struct SecurityToken {
    channel_id: u32,
    token_id: u32,
    received_at: DateTime,
    lifetime: Duration,
}

impl SecurityToken {
    fn elapsed(&self) -> Duration {
        DateTime::now() - self.received_at
    }
}

/// Security state of the connection: the policy and mode, the current token and the nonces.
/// A channel without a token has channel id 0 and sends token id 0.
#[derive(Debug)]
pub struct SecureChannel {
    security_policy: SecurityPolicy,
    security_mode: MessageSecurityMode,
    token: Option<SecurityToken>,
    local_nonce: Vec<u8>,
    remote_nonce: Vec<u8>,
    /// Added to local time to get the server's time
    client_offset: Duration,
    decoding_options: DecodingOptions,
}

impl SecureChannel {
    pub fn new(decoding_options: DecodingOptions) -> SecureChannel {
        SecureChannel {
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            token: None,
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            client_offset: Duration::zero(),
            decoding_options,
        }
    }

    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    pub fn set_security_mode(&mut self, security_mode: MessageSecurityMode) {
        self.security_mode = security_mode;
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    pub fn set_security_policy(&mut self, security_policy: SecurityPolicy) {
        self.security_policy = security_policy;
    }

    /// Forget the token, e.g. when the connection is lost and a new channel must be opened.
    pub fn clear_security_token(&mut self) {
        self.token = None;
    }

    pub fn set_security_token(&mut self, token: ChannelSecurityToken) {
        self.token = Some(SecurityToken {
            channel_id: token.channel_id,
            token_id: token.token_id,
            received_at: DateTime::now(),
            lifetime: Duration::milliseconds(token.revised_lifetime as i64),
        });
    }

    pub fn secure_channel_id(&self) -> u32 {
        self.token.map_or(0, |t| t.channel_id)
    }

    pub fn token_id(&self) -> u32 {
        self.token.map_or(0, |t| t.token_id)
    }

    /// Revised lifetime of the current token in milliseconds.
    pub fn token_lifetime(&self) -> u32 {
        self.token
            .map_or(0, |t| t.lifetime.num_milliseconds() as u32)
    }

    pub fn set_client_offset(&mut self, client_offset: Duration) {
        self.client_offset = client_offset;
    }

    pub fn client_offset(&self) -> Duration {
        self.client_offset
    }

    pub fn set_decoding_options(&mut self, decoding_options: DecodingOptions) {
        self.decoding_options = decoding_options;
    }

    pub fn decoding_options(&self) -> DecodingOptions {
        self.decoding_options.clone()
    }

    /// A token is renewed once 75% of its lifetime has passed.
    pub fn should_renew_security_token(&self) -> bool {
        self.token
            .is_some_and(|t| t.elapsed() > t.lifetime * 3 / 4)
    }

    pub fn token_has_expired(&self) -> bool {
        self.token.is_some_and(|t| t.elapsed() >= t.lifetime)
    }

    /// OPN chunks carry the asymmetric header, everything else the id of the current token.
    pub fn make_security_header(&self, message_type: MessageChunkType) -> SecurityHeader {
        if message_type.is_open_secure_channel() {
            SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none())
        } else {
            SecurityHeader::Symmetric(SymmetricSecurityHeader {
                token_id: self.token_id(),
            })
        }
    }

    pub fn signature_size(&self) -> usize {
        self.security_policy.symmetric_signature_size()
    }

    pub fn set_local_nonce(&mut self, local_nonce: &[u8]) {
        self.local_nonce = local_nonce.to_vec();
    }

    pub fn local_nonce_as_byte_string(&self) -> ByteString {
        if self.local_nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(self.local_nonce.as_slice())
        }
    }

    pub fn remote_nonce(&self) -> &[u8] {
        &self.remote_nonce
    }

    /// Stores the server nonce. Only the `None` policy gets by without one.
    pub fn set_remote_nonce_from_byte_string(
        &mut self,
        remote_nonce: &ByteString,
    ) -> Result<(), StatusCode> {
        match (&remote_nonce.value, self.security_policy) {
            (Some(nonce), _) => self.remote_nonce = nonce.clone(),
            (None, SecurityPolicy::None) => self.remote_nonce.clear(),
            (None, policy) => {
                error!("Server sent no nonce for security policy {}", policy);
                return Err(StatusCode::BadNonceInvalid);
            }
        }
        Ok(())
    }

    /// The bytes to put on the wire for a chunk. Without signing or encryption that is the
    /// chunk as is.
    pub fn apply_security(&self, message_chunk: &MessageChunk) -> Result<Vec<u8>, StatusCode> {
        self.security_policy.ensure_supported()?;
        debug::log_buffer("Outgoing chunk", &message_chunk.data);
        Ok(message_chunk.data.clone())
    }

    /// Checks a received chunk against the channel and returns it with any security removed.
    pub fn verify_and_remove_security(&mut self, src: &[u8]) -> Result<MessageChunk, StatusCode> {
        debug::log_buffer("Incoming chunk", src);
        let mut stream = src;
        let header = MessageChunkHeader::decode(&mut stream, &self.decoding_options)?;
        if header.message_size as usize != src.len() {
            error!(
                "Chunk claims {} bytes but {} were received",
                header.message_size,
                src.len()
            );
            return Err(StatusCode::BadUnexpectedError);
        }

        if header.message_type.is_open_secure_channel() {
            let security = AsymmetricSecurityHeader::decode(&mut stream, &self.decoding_options)?;
            if security.security_policy() != SecurityPolicy::None {
                error!(
                    "OpenSecureChannel response uses unsupported policy \"{}\"",
                    security.security_policy_uri
                );
                return Err(StatusCode::BadSecurityPolicyRejected);
            }
        } else {
            // Old and new tokens overlap during renewal, so only the channel id is checked
            let security = SymmetricSecurityHeader::decode(&mut stream, &self.decoding_options)?;
            trace!("Chunk secured with token {}", security.token_id);
            let channel_id = self.secure_channel_id();
            if channel_id != 0 && header.secure_channel_id != channel_id {
                error!(
                    "Chunk for secure channel {} received on channel {}",
                    header.secure_channel_id, channel_id
                );
                return Err(StatusCode::BadSecureChannelIdInvalid);
            }
        }

        Ok(MessageChunk { data: src.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_with_token(lifetime: u32) -> SecureChannel {
        let mut channel = SecureChannel::new(DecodingOptions::default());
        channel.set_security_token(ChannelSecurityToken {
            channel_id: 5,
            token_id: 1,
            created_at: DateTime::now(),
            revised_lifetime: lifetime,
        });
        channel
    }

    fn age_token(channel: &mut SecureChannel, ms: i64) {
        if let Some(token) = channel.token.as_mut() {
            token.received_at = DateTime::now() - Duration::milliseconds(ms);
        }
    }

    #[test]
    fn no_token() {
        let channel = SecureChannel::new(DecodingOptions::default());
        assert_eq!(channel.secure_channel_id(), 0);
        assert_eq!(channel.token_id(), 0);
        assert!(!channel.should_renew_security_token());
        assert!(!channel.token_has_expired());
    }

    #[test]
    fn renewal_at_three_quarters() {
        let mut channel = channel_with_token(1000);
        assert_eq!(channel.secure_channel_id(), 5);
        assert_eq!(channel.token_lifetime(), 1000);
        assert!(!channel.should_renew_security_token());

        age_token(&mut channel, 800);
        assert!(channel.should_renew_security_token());
        assert!(!channel.token_has_expired());

        age_token(&mut channel, 1500);
        assert!(channel.token_has_expired());

        channel.clear_security_token();
        assert!(!channel.should_renew_security_token());
    }

    #[test]
    fn null_remote_nonce_accepted_for_none() {
        let mut channel = SecureChannel::new(DecodingOptions::default());
        assert!(channel
            .set_remote_nonce_from_byte_string(&ByteString::null())
            .is_ok());
        assert!(channel.remote_nonce().is_empty());
        assert!(channel.local_nonce_as_byte_string().is_null());

        channel.set_security_policy(SecurityPolicy::Basic256Sha256);
        assert_eq!(
            channel.set_remote_nonce_from_byte_string(&ByteString::null()),
            Err(StatusCode::BadNonceInvalid)
        );
    }

    #[test]
    fn chunks_for_other_channels_rejected() {
        let mut ours = channel_with_token(60_000);
        let mut theirs = SecureChannel::new(DecodingOptions::default());
        theirs.set_security_token(ChannelSecurityToken {
            channel_id: 6,
            token_id: 1,
            created_at: DateTime::now(),
            revised_lifetime: 60_000,
        });
        let chunk = |channel: &SecureChannel| {
            MessageChunk::new(
                1,
                1,
                MessageChunkType::Message,
                crate::core::comms::message_chunk::MessageIsFinalType::Final,
                channel,
                &[0; 4],
            )
            .unwrap()
        };

        let own = chunk(&ours);
        assert!(ours.verify_and_remove_security(&own.data).is_ok());
        let other = chunk(&theirs);
        assert_eq!(
            ours.verify_and_remove_security(&other.data).unwrap_err(),
            StatusCode::BadSecureChannelIdInvalid
        );
        assert_eq!(
            ours.verify_and_remove_security(&own.data[..own.data.len() - 1])
                .unwrap_err(),
            StatusCode::BadUnexpectedError
        );
    }
}
