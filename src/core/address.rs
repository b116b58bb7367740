//! Backend endpoint addresses

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use thiserror::Error;

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;
/// Default Redis Sentinel port
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Service names accepted in place of a numeric port
const KNOWN_SERVICES: &[(&str, u16)] = &[("redis", DEFAULT_PORT)];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty host")]
    EmptyHost,
    #[error("empty port")]
    EmptyPort,
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Host and port of one Redis endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6 literal.
    /// A missing port is replaced by `default_port`.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, AddressError> {
        let address = if is_in_brackets(address) {
            remove_brackets(address)
        } else {
            address
        };

        let (host, port) = match address.rfind(':') {
            None => (address, default_port),
            Some(_) if is_literal_ipv6(address) => (address, default_port),
            Some(pos) => {
                let mut host = &address[..pos];
                if is_in_brackets(host) {
                    host = remove_brackets(host);
                }
                (host, parse_port(&address[pos + 1..])?)
            }
        };

        if host.is_empty() {
            return Err(AddressError::EmptyHost);
        }
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_literal_ipv6(&self) -> bool {
        is_literal_ipv6(&self.host)
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_literal_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for HostAndPort {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, DEFAULT_PORT)
    }
}

fn parse_port(port: &str) -> Result<u16, AddressError> {
    if port.is_empty() {
        return Err(AddressError::EmptyPort);
    }
    if let Ok(number) = port.parse::<u16>() {
        return Ok(number);
    }
    KNOWN_SERVICES
        .iter()
        .find(|(name, _)| *name == port)
        .map(|(_, number)| *number)
        .ok_or_else(|| AddressError::InvalidPort(port.to_string()))
}

fn is_in_brackets(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('[') && s.ends_with(']')
}

fn remove_brackets(s: &str) -> &str {
    &s[1..s.len() - 1]
}

fn is_literal_ipv6(s: &str) -> bool {
    s.parse::<Ipv6Addr>().is_ok()
}
