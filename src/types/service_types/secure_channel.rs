// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::*;

ua_struct! {
    /// The token issued by the server when a secure channel is opened or renewed.
    ChannelSecurityToken {
        channel_id: u32,
        token_id: u32,
        created_at: DateTime,
        /// Lifetime in milliseconds
        revised_lifetime: u32,
    }
}

ua_struct! {
    OpenSecureChannelRequest => OpenSecureChannelRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
        client_protocol_version: u32,
        request_type: SecurityTokenRequestType,
        security_mode: MessageSecurityMode,
        client_nonce: ByteString,
        requested_lifetime: u32,
    }
}

ua_struct! {
    OpenSecureChannelResponse => OpenSecureChannelResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
        server_protocol_version: u32,
        security_token: ChannelSecurityToken,
        server_nonce: ByteString,
    }
}

ua_struct! {
    CloseSecureChannelRequest => CloseSecureChannelRequest_Encoding_DefaultBinary {
        request_header: RequestHeader,
    }
}

ua_struct! {
    CloseSecureChannelResponse => CloseSecureChannelResponse_Encoding_DefaultBinary {
        response_header: ResponseHeader,
    }
}
