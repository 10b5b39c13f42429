// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Helpers for `opc.tcp://` endpoint urls.

use url::Url;

use crate::core::constants::DEFAULT_OPC_UA_SERVER_PORT;
use crate::types::status_code::StatusCode;

pub const OPC_TCP_SCHEME: &str = "opc.tcp";

/// Creates a `Url` from the input string, supplying the default port if necessary.
fn opc_url_from_str(s: &str) -> Result<Url, StatusCode> {
    let mut url = Url::parse(s).map_err(|err| {
        error!("Cannot parse url \"{}\", error = {:?}", s, err);
        StatusCode::BadTcpEndpointUrlInvalid
    })?;
    if url.port().is_none() {
        let _ = url.set_port(Some(DEFAULT_OPC_UA_SERVER_PORT));
    }
    Ok(url)
}

/// Replace the hostname in the supplied url and return a new url. Servers commonly return
/// endpoints naming a host the client cannot resolve.
pub fn url_with_replaced_hostname(url: &str, hostname: &str) -> Result<String, StatusCode> {
    let mut url = opc_url_from_str(url)?;
    url.set_host(Some(hostname))
        .map_err(|_| StatusCode::BadTcpEndpointUrlInvalid)?;
    Ok(url.into())
}

/// Test if the two urls match except for the hostname, e.g. 127.0.0.1 vs localhost.
pub fn url_matches_except_host(url1: &str, url2: &str) -> bool {
    match (opc_url_from_str(url1), opc_url_from_str(url2)) {
        (Ok(mut url1), Ok(mut url2)) => {
            url1.set_host(Some("xxxx")).is_ok()
                && url2.set_host(Some("xxxx")).is_ok()
                && url1 == url2
        }
        _ => false,
    }
}

pub fn is_opc_ua_binary_url(url: &str) -> bool {
    opc_url_from_str(url)
        .map(|url| url.scheme() == OPC_TCP_SCHEME)
        .unwrap_or(false)
}

/// Splits an endpoint url into the host and port to connect to.
pub fn hostname_port_from_url(url: &str, default_port: u16) -> Result<(String, u16), StatusCode> {
    let url = Url::parse(url).map_err(|_| StatusCode::BadTcpEndpointUrlInvalid)?;
    if url.scheme() != OPC_TCP_SCHEME {
        return Err(StatusCode::BadTcpEndpointUrlInvalid);
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(StatusCode::BadTcpEndpointUrlInvalid)?;
    let port = url.port().unwrap_or(default_port);
    Ok((host.to_string(), port))
}
