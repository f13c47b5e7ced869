//! Peer addressing (spec section 4.11, "Endpoint").
//!
//! An [`Endpoint`] names a peer the way a connection string does:
//! `proto://host:port`, with `loopback` as shorthand for `127.0.0.1`.
//! Parsing is deliberately permissive about the host part (DNS resolution,
//! if any, happens in [`crate::hooks::NameResolver`], not here).

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Ssl,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Ssl => "ssl",
        };
        f.write_str(s)
    }
}

impl FromStr for Protocol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "ssl" => Ok(Protocol::Ssl),
            other => Err(CoreError::BadEndpoint(format!("unknown scheme {other:?}"))),
        }
    }
}

/// A `proto://host:port` peer address, e.g. `tcp://example.com:9000` or
/// `udp://loopback:53`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub proto: Protocol,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(proto: Protocol, host: impl Into<String>, port: u16) -> Self {
        Endpoint { proto, host: host.into(), port }
    }

    /// `true` when the host part is the `loopback` shorthand or an already
    /// literal loopback address.
    pub fn is_loopback_shorthand(&self) -> bool {
        self.host == "loopback"
    }

    /// Resolves the `loopback` shorthand to `127.0.0.1`; leaves any other
    /// host untouched. Real DNS names are resolved elsewhere, via
    /// [`crate::hooks::NameResolver`].
    pub fn host_literal(&self) -> &str {
        if self.is_loopback_shorthand() {
            "127.0.0.1"
        } else {
            &self.host
        }
    }

    /// Parses the host/port as a concrete [`SocketAddr`], applying the
    /// `loopback` shorthand. Fails if `host` is a DNS name rather than a
    /// literal IP; callers that need DNS resolution should go through
    /// [`crate::hooks::NameResolver`] first.
    pub fn to_socket_addr(&self) -> Result<SocketAddr, CoreError> {
        format!("{}:{}", self.host_literal(), self.port)
            .parse()
            .map_err(|_| CoreError::BadEndpoint(format!("{self} is not a literal socket address")))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.proto, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| CoreError::BadEndpoint(format!("{s:?} is missing a proto:// scheme")))?;
        let proto: Protocol = scheme.parse()?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| CoreError::BadEndpoint(format!("{s:?} is missing a :port")))?;
        if host.is_empty() {
            return Err(CoreError::BadEndpoint(format!("{s:?} has an empty host")));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| CoreError::BadEndpoint(format!("{port:?} is not a valid port")))?;
        Ok(Endpoint { proto, host: host.to_string(), port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_endpoint() {
        let e: Endpoint = "tcp://example.com:9000".parse().unwrap();
        assert_eq!(e.proto, Protocol::Tcp);
        assert_eq!(e.host, "example.com");
        assert_eq!(e.port, 9000);
    }

    #[test]
    fn loopback_shorthand_resolves() {
        let e: Endpoint = "udp://loopback:53".parse().unwrap();
        assert_eq!(e.host_literal(), "127.0.0.1");
        assert_eq!(e.to_socket_addr().unwrap().to_string(), "127.0.0.1:53");
    }

    #[test]
    fn display_roundtrips() {
        let e: Endpoint = "ssl://10.0.0.1:443".parse().unwrap();
        assert_eq!(e.to_string(), "ssl://10.0.0.1:443");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!("foo://host:1".parse::<Endpoint>().is_err());
    }

    #[test]
    fn rejects_missing_port() {
        assert!("tcp://host".parse::<Endpoint>().is_err());
    }
}
