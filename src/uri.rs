//! Translation of `coap://` URIs into the options of a request:
//!
//! ```ascii
//! coap[s]://host[:port][/segment]*[?term[&term]*]
//!           [ipv6]
//! ```
//!
//! Each path segment becomes one Uri-Path option and each query term one Uri-Query option, in
//!  the order they appear. Uri-Host and Uri-Port are left out when they are redundant with the
//!  datagram's destination address. Percent-encoded characters are passed through undecoded.

use std::net::{IpAddr, SocketAddr};
use tracing::trace;
use crate::config::DEFAULT_PORT;
use crate::error::UriError;
use crate::option::{CoapOption, URI_HOST, URI_PATH, URI_PORT, URI_QUERY};
use crate::options_list::OptionsList;
use crate::transport;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUri<'a> {
    pub secure: bool,
    /// without the brackets of an IPv6 literal
    pub host: &'a str,
    pub port: u16,
    pub path: Vec<&'a str>,
    pub query: Vec<&'a str>,
}

impl ParsedUri<'_> {
    /// The host as an IP address, if it is a literal address rather than a host name
    pub fn host_ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

pub fn parse(uri: &str) -> Result<ParsedUri, UriError> {
    let (scheme, rest) = uri.split_once("://")
        .ok_or(UriError::InvalidScheme)?;
    let secure = match scheme {
        "coap" => false,
        "coaps" => true,
        _ => return Err(UriError::InvalidScheme),
    };
    if rest.contains('#') {
        return Err(UriError::Fragment);
    }

    let (host, after_host) = if let Some(bracketed) = rest.strip_prefix('[') {
        let close = bracketed.find(']')
            .ok_or(UriError::UnterminatedIpv6)?;
        let after_host = &bracketed[close+1..];
        if !(after_host.is_empty() || after_host.starts_with([':', '/', '?'])) {
            return Err(UriError::TrailingIpv6Garbage);
        }
        (&bracketed[..close], after_host)
    }
    else {
        let end = rest.find([':', '/', '?']).unwrap_or(rest.len());
        (&rest[..end], &rest[end..])
    };
    if host.is_empty() {
        return Err(UriError::MissingHost);
    }

    let (port, after_port) = match after_host.strip_prefix(':') {
        Some(with_port) => {
            let end = with_port.find(['/', '?']).unwrap_or(with_port.len());
            (parse_port(&with_port[..end]), &with_port[end..])
        }
        None => (DEFAULT_PORT, after_host),
    };

    let (path, query) = match after_port.split_once('?') {
        Some((path, query)) => (path, query),
        None => (after_port, ""),
    };

    let path = match path.strip_prefix('/').unwrap_or(path) {
        "" => Vec::new(),
        p => p.split('/').collect(),
    };
    let query = query.split('&')
        .filter(|term| !term.is_empty())
        .collect();

    Ok(ParsedUri {
        secure,
        host,
        port,
        path,
        query,
    })
}

/// a missing, unparsable or zero port means the default port
fn parse_port(s: &str) -> u16 {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => DEFAULT_PORT,
        Ok(port) => port,
    }
}

/// Build the options for a request to `uri`. If `destination` is known, Uri-Host is omitted
///  when the host is the destination's IP address (textually or by value), and Uri-Port is
///  omitted when the port is the destination's port.
pub fn to_options(uri: &str, destination: Option<SocketAddr>) -> Result<OptionsList, UriError> {
    let parsed = parse(uri)?;

    let host_is_redundant = destination
        .map(|d| parsed.host == d.ip().to_string() || parsed.host_ip() == Some(d.ip()))
        .unwrap_or(false);
    let port_is_redundant = destination
        .map(|d| d.port() == parsed.port)
        .unwrap_or(false);

    let mut options = Vec::with_capacity(2 + parsed.path.len() + parsed.query.len());
    if !host_is_redundant {
        options.push(CoapOption::from_text(URI_HOST, parsed.host));
    }
    if !port_is_redundant {
        options.push(CoapOption::from_u32(URI_PORT, parsed.port as u32));
    }
    for segment in &parsed.path {
        options.push(CoapOption::from_text(URI_PATH, segment));
    }
    for term in &parsed.query {
        options.push(CoapOption::from_text(URI_QUERY, term));
    }

    trace!("options for {}: {:?}", uri, options);
    Ok(OptionsList::new(options))
}

/// Resolve the socket address a request to `uri` is sent to
pub async fn to_address(uri: &str) -> anyhow::Result<SocketAddr> {
    let parsed = parse(uri)?;
    match parsed.host_ip() {
        Some(ip) => Ok(SocketAddr::new(ip, parsed.port)),
        None => transport::resolve(parsed.host, parsed.port).await,
    }
}
