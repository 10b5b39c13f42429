// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The headers between the chunk header and the body: the security header, asymmetric on OPN
//! chunks and symmetric elsewhere, then the sequence header.

use std::io::{Read, Write};

use crate::crypto::{SecurityPolicy, SECURITY_POLICY_NONE_URI};
use crate::types::{
    constants::MAX_CERTIFICATE_LENGTH, BinaryEncoder, ByteString, DecodingOptions,
    EncodingResult, StatusCode, UAString,
};

use super::message_chunk::MessageChunkType;

#[derive(Debug, Clone, PartialEq)]
pub enum SecurityHeader {
    Asymmetric(AsymmetricSecurityHeader),
    Symmetric(SymmetricSecurityHeader),
}

impl SecurityHeader {
    /// Reads whichever header a chunk of `message_type` carries.
    pub fn decode_for<S: Read>(
        message_type: MessageChunkType,
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<SecurityHeader> {
        Ok(if message_type.is_open_secure_channel() {
            SecurityHeader::Asymmetric(AsymmetricSecurityHeader::decode(stream, decoding_options)?)
        } else {
            SecurityHeader::Symmetric(SymmetricSecurityHeader::decode(stream, decoding_options)?)
        })
    }

    pub fn byte_len(&self) -> usize {
        match self {
            SecurityHeader::Asymmetric(h) => h.byte_len(),
            SecurityHeader::Symmetric(h) => h.byte_len(),
        }
    }

    pub fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match self {
            SecurityHeader::Asymmetric(h) => h.encode(stream),
            SecurityHeader::Symmetric(h) => h.encode(stream),
        }
    }
}

/// Names the token that secures the chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricSecurityHeader {
    pub token_id: u32,
}

impl BinaryEncoder<SymmetricSecurityHeader> for SymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        self.token_id.encode(stream)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        Ok(SymmetricSecurityHeader {
            token_id: u32::decode(stream, decoding_options)?,
        })
    }
}

/// Policy and certificates of an OPN chunk. Without security both certificates are null.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    pub security_policy_uri: UAString,
    pub sender_certificate: ByteString,
    pub receiver_certificate_thumbprint: ByteString,
}

impl BinaryEncoder<AsymmetricSecurityHeader> for AsymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        [
            self.security_policy_uri.byte_len(),
            self.sender_certificate.byte_len(),
            self.receiver_certificate_thumbprint.byte_len(),
        ]
        .iter()
        .sum()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.security_policy_uri.encode(stream)?
            + self.sender_certificate.encode(stream)?
            + self.receiver_certificate_thumbprint.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: UAString::decode(stream, decoding_options)?,
            sender_certificate: ByteString::decode(stream, decoding_options)?,
            receiver_certificate_thumbprint: ByteString::decode(stream, decoding_options)?,
        };

        let certificate_len = header.sender_certificate.len();
        if certificate_len >= MAX_CERTIFICATE_LENGTH {
            error!("Sender certificate of {} bytes is too long", certificate_len);
            return Err(StatusCode::BadDecodingError);
        }
        // A thumbprint is a SHA1 hash
        match header.receiver_certificate_thumbprint.len() {
            0 | 20 => Ok(header),
            len => {
                error!("Receiver thumbprint has {} bytes instead of 20", len);
                Err(StatusCode::BadDecodingError)
            }
        }
    }
}

impl AsymmetricSecurityHeader {
    pub fn none() -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(SECURITY_POLICY_NONE_URI),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
    }

    /// The policy named by the header. A null uri is treated as `None`.
    pub fn security_policy(&self) -> SecurityPolicy {
        if self.security_policy_uri.is_null() {
            SecurityPolicy::None
        } else {
            SecurityPolicy::from_uri(self.security_policy_uri.as_ref())
        }
    }
}

/// Orders the chunks on a channel and ties each to the request it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceHeader {
    pub sequence_number: u32,
    pub request_id: u32,
}

impl BinaryEncoder<SequenceHeader> for SequenceHeader {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.sequence_number.encode(stream)? + self.request_id.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        Ok(SequenceHeader {
            sequence_number: u32::decode(stream, decoding_options)?,
            request_id: u32::decode(stream, decoding_options)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asymmetric_none() {
        let header = AsymmetricSecurityHeader::none();
        assert_eq!(header.security_policy(), SecurityPolicy::None);
        let buf = header.encode_to_vec();
        // uri + 2 null byte strings
        assert_eq!(buf.len(), 4 + SECURITY_POLICY_NONE_URI.len() + 4 + 4);
        assert_eq!(header.byte_len(), buf.len());
    }

    #[test]
    fn header_follows_chunk_type() {
        let options = DecodingOptions::default();
        let open = AsymmetricSecurityHeader::none().encode_to_vec();
        let header =
            SecurityHeader::decode_for(MessageChunkType::OpenSecureChannel, &mut &open[..], &options)
                .unwrap();
        assert_eq!(header, SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none()));

        let symmetric = 7u32.encode_to_vec();
        let header =
            SecurityHeader::decode_for(MessageChunkType::Message, &mut &symmetric[..], &options)
                .unwrap();
        assert_eq!(
            header,
            SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id: 7 })
        );
    }

    #[test]
    fn bad_thumbprint() {
        let header = AsymmetricSecurityHeader {
            receiver_certificate_thumbprint: ByteString::from(vec![1u8; 5]),
            ..AsymmetricSecurityHeader::none()
        };
        let buf = header.encode_to_vec();
        assert_eq!(
            AsymmetricSecurityHeader::decode(&mut buf.as_slice(), &DecodingOptions::default())
                .unwrap_err(),
            StatusCode::BadDecodingError
        );
    }
}
