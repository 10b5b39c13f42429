// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::*;

ua_struct! {
    /// Every request starts with this header.
    RequestHeader {
        authentication_token: NodeId,
        timestamp: DateTime,
        request_handle: u32,
        return_diagnostics: u32,
        audit_entry_id: UAString,
        timeout_hint: u32,
        additional_header: ExtensionObject,
    }
}

impl RequestHeader {
    /// A header with no diagnostics requested and no timeout hint.
    pub fn new(
        authentication_token: &NodeId,
        timestamp: &DateTime,
        request_handle: u32,
    ) -> RequestHeader {
        RequestHeader {
            authentication_token: authentication_token.clone(),
            timestamp: *timestamp,
            request_handle,
            ..Default::default()
        }
    }

    /// Handle 1 and no session, for tests and messages that are discarded.
    pub fn dummy() -> RequestHeader {
        RequestHeader::new(&NodeId::null(), &DateTime::now(), 1)
    }
}

ua_struct! {
    /// Every response starts with this header.
    ResponseHeader {
        timestamp: DateTime,
        request_handle: u32,
        service_result: StatusCode,
        service_diagnostics: DiagnosticInfo,
        string_table: Option<Vec<UAString>>,
        additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    /// Answers `request_header` with `service_result`, stamped now.
    pub fn new_service_result(
        request_header: &RequestHeader,
        service_result: StatusCode,
    ) -> ResponseHeader {
        ResponseHeader {
            timestamp: DateTime::now(),
            request_handle: request_header.request_handle,
            service_result,
            ..Default::default()
        }
    }

    pub fn new_good(request_header: &RequestHeader) -> ResponseHeader {
        ResponseHeader::new_service_result(request_header, StatusCode::Good)
    }
}

ua_struct! {
    /// The response a server sends instead of the expected one when a service fails as a whole.
    ServiceFault => ServiceFault_Encoding_DefaultBinary {
        response_header: ResponseHeader,
    }
}

impl ServiceFault {
    pub fn new(request_header: &RequestHeader, service_result: StatusCode) -> ServiceFault {
        ServiceFault {
            response_header: ResponseHeader::new_service_result(request_header, service_result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header() {
        let token = NodeId::new(1, "token");
        let header = RequestHeader::new(&token, &DateTime::now(), 99);
        let buf = header.encode_to_vec();
        assert_eq!(buf.len(), header.byte_len());
        let decoded = RequestHeader::decode(&mut buf.as_slice(), &DecodingOptions::default())
            .unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn service_fault() {
        let fault = ServiceFault::new(&RequestHeader::dummy(), StatusCode::BadSessionIdInvalid);
        assert_eq!(fault.object_id(), ObjectId::ServiceFault_Encoding_DefaultBinary);
        assert_eq!(fault.response_header.request_handle, 1);
        let buf = fault.encode_to_vec();
        let decoded = ServiceFault::decode(&mut buf.as_slice(), &DecodingOptions::default())
            .unwrap();
        assert_eq!(
            decoded.response_header.service_result,
            StatusCode::BadSessionIdInvalid
        );
    }
}
