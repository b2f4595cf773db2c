use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{request::Parts, HeaderMap};
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Browser address as seen through any reverse proxy in front of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

/// `for=` of the first `Forwarded` element. Quoted, bracketed IPv6 and a
/// trailing port are accepted; obfuscated identifiers and `unknown` are not.
fn forwarded_for(value: &str) -> Option<IpAddr> {
    let element = value.split(',').next()?;
    let node = element.split(';').find_map(|pair| {
        let (key, node) = pair.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("for")
            .then(|| node.trim().trim_matches('"'))
    })?;
    parse_node(node)
}

fn parse_node(node: &str) -> Option<IpAddr> {
    if let Some(rest) = node.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    node.parse()
        .ok()
        .or_else(|| node.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

fn from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(ip) = header("forwarded").and_then(forwarded_for) {
        return Some(ip);
    }
    if let Some(ip) = header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .and_then(|first| parse_node(first.trim()))
    {
        return Some(ip);
    }
    header("x-real-ip").and_then(|ip| parse_node(ip.trim()))
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = from_headers(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });
        Ok(ClientIp(ip))
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ip) => write!(f, "{}", ip),
            None => f.write_str("unknown"),
        }
    }
}
