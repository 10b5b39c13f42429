// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::{
    client::{
        session::{
            process_service_result, process_unexpected_response, session_debug, session_error,
            Session, SessionInfo,
        },
        IdentityToken,
    },
    core::supported_message::SupportedMessage,
    crypto::{SecurityPolicy, SECURITY_POLICY_NONE_URI},
    types::{
        ActivateSessionRequest, AnonymousIdentityToken, ByteString, CancelRequest,
        CloseSessionRequest, CreateSessionRequest, EndpointDescription, ExtensionObject,
        MessageInfo, SignatureData, StatusCode, UAString, UserNameIdentityToken, UserTokenPolicy,
        UserTokenType,
    },
};

impl Session {
    /// Sends a [`CreateSessionRequest`] to the server and returns the created session. The
    /// session is not used until the caller stores it.
    ///
    /// See OPC UA Part 4 - Services 5.6.2 for complete description of the service and error responses.
    pub(crate) async fn create_session(&self) -> Result<SessionInfo, StatusCode> {
        let endpoint = &self.connection_info.endpoint;

        let request = CreateSessionRequest {
            request_header: self.make_request_header(),
            client_description: self.application_description.clone(),
            server_uri: UAString::null(),
            endpoint_url: endpoint.endpoint_url.clone(),
            session_name: self.session_name.clone(),
            client_nonce: self.channel.client_nonce(),
            client_certificate: ByteString::null(),
            requested_session_timeout: self.session_timeout,
            max_response_message_size: 0,
        };

        let response = self.send(request).await?;

        if let SupportedMessage::CreateSessionResponse(response) = response {
            process_service_result(&response.response_header)?;
            self.channel
                .update_from_created_session(&response.server_nonce)?;

            let user_token_policies = user_token_policies(
                endpoint,
                response.server_endpoints.as_deref().unwrap_or_default(),
            );
            session_debug!(
                self,
                "Created session {}, revised timeout {}ms",
                response.session_id,
                response.revised_session_timeout
            );

            let response = *response;
            Ok(SessionInfo {
                session_id: response.session_id,
                authentication_token: response.authentication_token,
                session_name: self.session_name.clone(),
                revised_session_timeout: response.revised_session_timeout,
                max_request_message_size: response.max_request_message_size,
                server_certificate: response.server_certificate,
                server_nonce: response.server_nonce,
                user_token_policies,
            })
        } else {
            Err(process_unexpected_response(response))
        }
    }

    /// Sends an [`ActivateSessionRequest`] for the current session, identifying as the user of
    /// the connection.
    ///
    /// See OPC UA Part 4 - Services 5.6.3 for complete description of the service and error responses.
    pub(crate) async fn activate_session(&self) -> Result<(), StatusCode> {
        let info = self
            .session_info
            .load_full()
            .ok_or(StatusCode::BadSessionIdInvalid)?;

        let user_identity_token = make_identity_token(
            &self.connection_info.user_identity_token,
            &info.user_token_policies,
        )?;

        let locale_ids = if self.connection_info.preferred_locales.is_empty() {
            None
        } else {
            Some(
                self.connection_info
                    .preferred_locales
                    .iter()
                    .map(UAString::from)
                    .collect(),
            )
        };

        let request = ActivateSessionRequest {
            request_header: self.make_request_header(),
            client_signature: SignatureData::default(),
            client_software_certificates: None,
            locale_ids,
            user_identity_token,
            user_token_signature: SignatureData::default(),
        };

        let response = self.send(request).await?;

        if let SupportedMessage::ActivateSessionResponse(response) = response {
            process_service_result(&response.response_header)?;
            self.channel
                .update_from_created_session(&response.server_nonce)?;
            Ok(())
        } else {
            Err(process_unexpected_response(response))
        }
    }

    /// Close the session by sending a [`CloseSessionRequest`] to the server.
    ///
    /// This is not accessible by users, they must instead call `disconnect` to properly close the session.
    pub(crate) async fn close_session(&self) -> Result<(), StatusCode> {
        let request = CloseSessionRequest {
            delete_subscriptions: true,
            request_header: self.make_request_header(),
        };
        let response = self.send(request).await?;
        if let SupportedMessage::CloseSessionResponse(_) = response {
            Ok(())
        } else {
            session_error!(self, "close_session failed {:?}", response);
            Err(process_unexpected_response(response))
        }
    }

    /// Cancels an outstanding service request by sending a [`CancelRequest`] to the server.
    ///
    /// See OPC UA Part 4 - Services 5.6.5 for complete description of the service and error responses.
    ///
    /// # Arguments
    ///
    /// * `request_handle` - Handle to the outstanding request to be cancelled.
    ///
    /// # Returns
    ///
    /// * `Ok(u32)` - Success, number of cancelled requests
    /// * `Err(StatusCode)` - Request failed, [Status code](StatusCode) is the reason for failure.
    ///
    pub async fn cancel(&self, request_handle: u32) -> Result<u32, StatusCode> {
        let request = CancelRequest {
            request_header: self.make_request_header(),
            request_handle,
        };
        let response = self.send(request).await?;
        if let SupportedMessage::CancelResponse(response) = response {
            process_service_result(&response.response_header)?;
            Ok(response.cancel_count)
        } else {
            Err(process_unexpected_response(response))
        }
    }
}

/// The identity token policies to use. Those of the configured endpoint win, otherwise those
/// the server returned for an endpoint with the same security policy.
fn user_token_policies(
    endpoint: &EndpointDescription,
    server_endpoints: &[EndpointDescription],
) -> Vec<UserTokenPolicy> {
    if let Some(policies) = endpoint
        .user_identity_tokens
        .as_ref()
        .filter(|p| !p.is_empty())
    {
        return policies.clone();
    }

    let security_policy = endpoint.security_policy_uri.as_ref();
    let same_policy = |e: &&EndpointDescription| {
        let uri = e.security_policy_uri.as_ref();
        uri == security_policy
            || (security_policy.is_empty() && uri == SECURITY_POLICY_NONE_URI)
    };

    server_endpoints
        .iter()
        .find(same_policy)
        .or_else(|| server_endpoints.first())
        .and_then(|e| e.user_identity_tokens.clone())
        .unwrap_or_default()
}

/// Build the identity token for ActivateSession. Tokens are sent unencrypted, so a policy that
/// requires encryption of the token is rejected.
fn make_identity_token(
    identity: &IdentityToken,
    policies: &[UserTokenPolicy],
) -> Result<ExtensionObject, StatusCode> {
    let token_type = match identity {
        IdentityToken::Anonymous => UserTokenType::Anonymous,
        IdentityToken::UserName(_, _) => UserTokenType::UserName,
    };

    let Some(policy) = policies.iter().find(|p| p.token_type == token_type) else {
        error!(
            "Cannot find user token type {:?} for this endpoint, cannot connect",
            token_type
        );
        return Err(StatusCode::BadIdentityTokenRejected);
    };

    match identity {
        IdentityToken::Anonymous => {
            let token = AnonymousIdentityToken {
                policy_id: policy.policy_id.clone(),
            };
            Ok(ExtensionObject::from_encodable(token.object_id(), &token))
        }
        IdentityToken::UserName(user, pass) => {
            let security_policy = if policy.security_policy_uri.is_empty() {
                SecurityPolicy::None
            } else {
                SecurityPolicy::from_uri(policy.security_policy_uri.as_ref())
            };
            if security_policy != SecurityPolicy::None {
                error!(
                    "User token policy {} requires {} to encrypt the password, which is not supported",
                    policy.policy_id, security_policy
                );
                return Err(StatusCode::BadIdentityTokenRejected);
            }

            let token = UserNameIdentityToken {
                policy_id: policy.policy_id.clone(),
                user_name: UAString::from(user.as_str()),
                password: ByteString::from(pass.as_bytes()),
                encryption_algorithm: UAString::null(),
            };
            Ok(ExtensionObject::from_encodable(token.object_id(), &token))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecodingOptions, MessageSecurityMode};

    fn policy(id: &str, token_type: UserTokenType) -> UserTokenPolicy {
        UserTokenPolicy {
            policy_id: id.into(),
            token_type,
            ..Default::default()
        }
    }

    #[test]
    fn anonymous_token_uses_policy_id() {
        let token = make_identity_token(
            &IdentityToken::Anonymous,
            &[
                policy("user", UserTokenType::UserName),
                policy("anon", UserTokenType::Anonymous),
            ],
        )
        .unwrap();
        let token = token
            .decode_inner::<AnonymousIdentityToken>(&DecodingOptions::default())
            .unwrap();
        assert_eq!(token.policy_id.as_ref(), "anon");
    }

    #[test]
    fn user_name_token() {
        let token = make_identity_token(
            &IdentityToken::UserName("sample".into(), "sample1".into()),
            &[policy("user", UserTokenType::UserName)],
        )
        .unwrap();
        let token = token
            .decode_inner::<UserNameIdentityToken>(&DecodingOptions::default())
            .unwrap();
        assert_eq!(token.user_name.as_ref(), "sample");
        assert_eq!(token.password, ByteString::from(b"sample1".as_slice()));
    }

    #[test]
    fn missing_or_encrypted_policy_is_rejected() {
        assert_eq!(
            make_identity_token(&IdentityToken::Anonymous, &[]).err(),
            Some(StatusCode::BadIdentityTokenRejected)
        );
        let mut encrypted = policy("user", UserTokenType::UserName);
        encrypted.security_policy_uri =
            "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256".into();
        assert_eq!(
            make_identity_token(&IdentityToken::UserName("a".into(), "b".into()), &[encrypted])
                .err(),
            Some(StatusCode::BadIdentityTokenRejected)
        );
    }

    #[test]
    fn policies_from_server_endpoints() {
        let configured = EndpointDescription {
            endpoint_url: "opc.tcp://localhost:4855".into(),
            security_policy_uri: SECURITY_POLICY_NONE_URI.into(),
            security_mode: MessageSecurityMode::None,
            ..Default::default()
        };
        let secured = EndpointDescription {
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
                .into(),
            user_identity_tokens: Some(vec![policy("secured", UserTokenType::Anonymous)]),
            ..Default::default()
        };
        let open = EndpointDescription {
            security_policy_uri: SECURITY_POLICY_NONE_URI.into(),
            user_identity_tokens: Some(vec![policy("open", UserTokenType::Anonymous)]),
            ..Default::default()
        };
        let policies = user_token_policies(&configured, &[secured, open]);
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].policy_id.as_ref(), "open");

        let mut configured = configured;
        configured.user_identity_tokens = Some(vec![policy("own", UserTokenType::Anonymous)]);
        assert_eq!(
            user_token_policies(&configured, &[])[0].policy_id.as_ref(),
            "own"
        );
    }
}
