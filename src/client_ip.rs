//! Client IP extraction.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap, request::Parts},
};

/// Header a trusted reverse proxy uses to pass on the client address.
///
/// Only consulted when configured. Without one, the peer address is used.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// `X-Forwarded-For`; the proxy's own entry is the last one.
    XForwardedFor,
    XRealIp,
    CfConnectingIp,
}

impl ClientIpHeader {
    pub fn header_name(self) -> &'static str {
        match self {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        }
    }

    /// Parse the client address out of the header value.
    pub fn extract(self, value: &str) -> Result<String, &'static str> {
        let candidate = match self {
            // Earlier entries come from the client and cannot be trusted.
            ClientIpHeader::XForwardedFor => value.rsplit(',').next().unwrap_or(value),
            ClientIpHeader::XRealIp | ClientIpHeader::CfConnectingIp => value,
        };
        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not hold an IP address")
    }
}

/// Anything carrying request headers and extensions.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &HeaderMap;
    fn extensions(&self) -> &Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Client IP from the trusted header when one is configured, else the peer address.
///
/// A configured header that is missing or malformed is an error; there is no
/// fallback to the peer address, which would be the proxy itself. The peer
/// address is only known when the app is served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    trusted_header: Option<ClientIpHeader>,
) -> Result<String, &'static str> {
    match trusted_header {
        Some(header) => {
            let value = source
                .headers()
                .get(header.header_name())
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            header.extract(value)
        }
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}
