// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::*;

ua_struct! {
    ApplicationDescription {
        application_uri: UAString,
        product_uri: UAString,
        application_name: LocalizedText,
        application_type: ApplicationType,
        gateway_server_uri: UAString,
        discovery_profile_uri: UAString,
        discovery_urls: Option<Vec<UAString>>,
    }
}

ua_struct! {
    UserTokenPolicy {
        policy_id: UAString,
        token_type: UserTokenType,
        issued_token_type: UAString,
        issuer_endpoint_url: UAString,
        security_policy_uri: UAString,
    }
}

ua_struct! {
    EndpointDescription {
        endpoint_url: UAString,
        server: ApplicationDescription,
        server_certificate: ByteString,
        security_mode: MessageSecurityMode,
        security_policy_uri: UAString,
        user_identity_tokens: Option<Vec<UserTokenPolicy>>,
        transport_profile_uri: UAString,
        security_level: u8,
    }
}

impl EndpointDescription {
    /// Finds the policy id of the first user token policy of the supplied type.
    pub fn find_policy_id(&self, token_type: UserTokenType) -> Option<UAString> {
        self.user_identity_tokens.as_ref().and_then(|tokens| {
            tokens
                .iter()
                .find(|t| t.token_type == token_type)
                .map(|t| t.policy_id.clone())
        })
    }
}

ua_struct! {
    SignedSoftwareCertificate {
        certificate_data: ByteString,
        signature: ByteString,
    }
}

ua_struct! {
    SignatureData {
        algorithm: UAString,
        signature: ByteString,
    }
}

ua_struct! {
    CreateSessionRequest => CreateSessionRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        client_description: ApplicationDescription,
        server_uri: UAString,
        endpoint_url: UAString,
        session_name: UAString,
        client_nonce: ByteString,
        client_certificate: ByteString,
        /// Milliseconds
        requested_session_timeout: f64,
        max_response_message_size: u32,
    }
}

ua_struct! {
    CreateSessionResponse => CreateSessionResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        session_id: NodeId,
        authentication_token: NodeId,
        revised_session_timeout: f64,
        server_nonce: ByteString,
        server_certificate: ByteString,
        server_endpoints: Option<Vec<EndpointDescription>>,
        server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        server_signature: SignatureData,
        max_request_message_size: u32,
    }
}

ua_struct! {
    ActivateSessionRequest => ActivateSessionRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        client_signature: SignatureData,
        client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        locale_ids: Option<Vec<UAString>>,
        user_identity_token: ExtensionObject,
        user_token_signature: SignatureData,
    }
}

ua_struct! {
    ActivateSessionResponse => ActivateSessionResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        server_nonce: ByteString,
        results: Option<Vec<StatusCode>>,
        diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    CloseSessionRequest => CloseSessionRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        delete_subscriptions: bool,
    }
}

ua_struct! {
    CloseSessionResponse => CloseSessionResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
    }
}

ua_struct! {
    CancelRequest => CancelRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        request_handle: u32,
    }
}

ua_struct! {
    CancelResponse => CancelResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        cancel_count: u32,
    }
}

ua_struct! {
    AnonymousIdentityToken => AnonymousIdentityToken_Encoding_DefaultBinary {
        policy_id: UAString,
    }
}

ua_struct! {
    UserNameIdentityToken => UserNameIdentityToken_Encoding_DefaultBinary {
        policy_id: UAString,
        user_name: UAString,
        password: ByteString,
        encryption_algorithm: UAString,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_policy_id() {
        let endpoint = EndpointDescription {
            user_identity_tokens: Some(vec![
                UserTokenPolicy {
                    policy_id: "anon".into(),
                    token_type: UserTokenType::Anonymous,
                    ..Default::default()
                },
                UserTokenPolicy {
                    policy_id: "user".into(),
                    token_type: UserTokenType::UserName,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        assert_eq!(
            endpoint.find_policy_id(UserTokenType::UserName),
            Some(UAString::from("user"))
        );
        assert_eq!(endpoint.find_policy_id(UserTokenType::Certificate), None);
    }

    #[test]
    fn identity_token_in_extension_object() {
        let token = UserNameIdentityToken {
            policy_id: "user".into(),
            user_name: "sample".into(),
            password: ByteString::from(b"sample1".to_vec()),
            encryption_algorithm: UAString::null(),
        };
        let obj = ExtensionObject::from_encodable(token.object_id(), &token);
        assert_eq!(
            obj.object_id().unwrap(),
            ObjectId::UserNameIdentityToken_Encoding_DefaultBinary
        );
        let decoded = obj
            .decode_inner::<UserNameIdentityToken>(&DecodingOptions::default())
            .unwrap();
        assert_eq!(decoded, token);
    }
}
