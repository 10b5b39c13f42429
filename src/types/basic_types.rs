// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Built-in types that are simple aggregates: `QualifiedName`, `LocalizedText` and
//! `DiagnosticInfo`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{encoding::*, status_code::StatusCode, string::UAString};

/// A name qualified by a namespace index.
#[derive(PartialEq, Eq, Debug, Clone, Default, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: UAString,
}

impl BinaryEncoder<QualifiedName> for QualifiedName {
    fn byte_len(&self) -> usize {
        2 + self.name.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.namespace_index.encode(stream)? + self.name.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let namespace_index = u16::decode(stream, decoding_options)?;
        let name = UAString::decode(stream, decoding_options)?;
        Ok(QualifiedName {
            namespace_index,
            name,
        })
    }
}

impl QualifiedName {
    pub fn new<T>(namespace_index: u16, name: T) -> QualifiedName
    where
        T: Into<UAString>,
    {
        QualifiedName {
            namespace_index,
            name: name.into(),
        }
    }

    pub fn null() -> QualifiedName {
        QualifiedName::default()
    }
}

/// Human readable text with an optional locale identifier.
#[derive(PartialEq, Eq, Debug, Clone, Default, Hash, Serialize, Deserialize)]
pub struct LocalizedText {
    pub locale: UAString,
    pub text: UAString,
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl BinaryEncoder<LocalizedText> for LocalizedText {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        if !self.locale.is_empty() {
            size += self.locale.byte_len();
        }
        if !self.text.is_empty() {
            size += self.text.byte_len();
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut encoding_mask: u8 = 0;
        if !self.locale.is_empty() {
            encoding_mask |= 0x1;
        }
        if !self.text.is_empty() {
            encoding_mask |= 0x2;
        }
        let mut size = write_u8(stream, encoding_mask)?;
        if !self.locale.is_empty() {
            size += self.locale.encode(stream)?;
        }
        if !self.text.is_empty() {
            size += self.text.encode(stream)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        let locale = if encoding_mask & 0x1 != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        let text = if encoding_mask & 0x2 != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        Ok(LocalizedText { locale, text })
    }
}

impl LocalizedText {
    pub fn new(locale: &str, text: &str) -> LocalizedText {
        LocalizedText {
            locale: UAString::from(locale),
            text: UAString::from(text),
        }
    }
}

impl<'a> From<&'a str> for LocalizedText {
    fn from(value: &'a str) -> Self {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::from(value),
        }
    }
}

bitflags! {
    pub struct DiagnosticInfoMask: u8 {
        const HAS_SYMBOLIC_ID = 0x01;
        const HAS_NAMESPACE = 0x02;
        const HAS_LOCALIZED_TEXT = 0x04;
        const HAS_LOCALE = 0x08;
        const HAS_ADDITIONAL_INFO = 0x10;
        const HAS_INNER_STATUS_CODE = 0x20;
        const HAS_INNER_DIAGNOSTIC_INFO = 0x40;
    }
}

/// Vendor-specific diagnostic information attached to a service result or operation result.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: Option<UAString>,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncoder<DiagnosticInfo> for DiagnosticInfo {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        size += [
            self.symbolic_id,
            self.namespace_uri,
            self.locale,
            self.localized_text,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
            * 4;
        if let Some(ref additional_info) = self.additional_info {
            size += additional_info.byte_len();
        }
        if self.inner_status_code.is_some() {
            size += 4;
        }
        if let Some(ref inner) = self.inner_diagnostic_info {
            size += inner.byte_len();
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = write_u8(stream, self.encoding_mask().bits())?;
        for value in [
            self.symbolic_id,
            self.namespace_uri,
            self.locale,
            self.localized_text,
        ]
        .iter()
        .flatten()
        {
            size += value.encode(stream)?;
        }
        if let Some(ref additional_info) = self.additional_info {
            size += additional_info.encode(stream)?;
        }
        if let Some(ref inner_status_code) = self.inner_status_code {
            size += inner_status_code.encode(stream)?;
        }
        if let Some(ref inner) = self.inner_diagnostic_info {
            size += inner.encode(stream)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let encoding_mask = DiagnosticInfoMask::from_bits_truncate(read_u8(stream)?);
        let mut read_field = |flag: DiagnosticInfoMask| -> EncodingResult<Option<i32>> {
            if encoding_mask.contains(flag) {
                Ok(Some(i32::decode(stream, decoding_options)?))
            } else {
                Ok(None)
            }
        };
        let symbolic_id = read_field(DiagnosticInfoMask::HAS_SYMBOLIC_ID)?;
        let namespace_uri = read_field(DiagnosticInfoMask::HAS_NAMESPACE)?;
        let locale = read_field(DiagnosticInfoMask::HAS_LOCALE)?;
        let localized_text = read_field(DiagnosticInfoMask::HAS_LOCALIZED_TEXT)?;
        let additional_info = if encoding_mask.contains(DiagnosticInfoMask::HAS_ADDITIONAL_INFO) {
            Some(UAString::decode(stream, decoding_options)?)
        } else {
            None
        };
        let inner_status_code =
            if encoding_mask.contains(DiagnosticInfoMask::HAS_INNER_STATUS_CODE) {
                Some(StatusCode::decode(stream, decoding_options)?)
            } else {
                None
            };
        let inner_diagnostic_info =
            if encoding_mask.contains(DiagnosticInfoMask::HAS_INNER_DIAGNOSTIC_INFO) {
                let inner_options = decoding_options.descend()?;
                Some(Box::new(DiagnosticInfo::decode(stream, &inner_options)?))
            } else {
                None
            };
        Ok(DiagnosticInfo {
            symbolic_id,
            namespace_uri,
            locale,
            localized_text,
            additional_info,
            inner_status_code,
            inner_diagnostic_info,
        })
    }
}

impl DiagnosticInfo {
    pub fn null() -> DiagnosticInfo {
        DiagnosticInfo::default()
    }

    pub fn encoding_mask(&self) -> DiagnosticInfoMask {
        let mut mask = DiagnosticInfoMask::empty();
        mask.set(DiagnosticInfoMask::HAS_SYMBOLIC_ID, self.symbolic_id.is_some());
        mask.set(DiagnosticInfoMask::HAS_NAMESPACE, self.namespace_uri.is_some());
        mask.set(DiagnosticInfoMask::HAS_LOCALE, self.locale.is_some());
        mask.set(
            DiagnosticInfoMask::HAS_LOCALIZED_TEXT,
            self.localized_text.is_some(),
        );
        mask.set(
            DiagnosticInfoMask::HAS_ADDITIONAL_INFO,
            self.additional_info.is_some(),
        );
        mask.set(
            DiagnosticInfoMask::HAS_INNER_STATUS_CODE,
            self.inner_status_code.is_some(),
        );
        mask.set(
            DiagnosticInfoMask::HAS_INNER_DIAGNOSTIC_INFO,
            self.inner_diagnostic_info.is_some(),
        );
        mask
    }
}
