//! Transport URIs.
//!
//! A daemon endpoint is written as `<protocol>://<host>:<port>`, e.g.
//! `ofi+sockets://10.0.0.3:52000`. URIs carrying `na+sm` alongside another
//! protocol enable shared-memory auto-detection; the core treats the
//! protocol as an opaque tag and dials the `<host>:<port>` part.

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported transport protocols.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Protocol {
    OfiSockets = 0,
    OfiPsm2 = 1,
    OfiVerbs = 2,
    NaSm = 3,
}

impl Protocol {
    fn as_str(&self) -> &'static str {
        match self {
            Protocol::OfiSockets => "ofi+sockets",
            Protocol::OfiPsm2 => "ofi+psm2",
            Protocol::OfiVerbs => "ofi+verbs",
            Protocol::NaSm => "na+sm",
        }
    }
}

/// Errors when parsing a [`TransportUri`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriParseError {
    #[error("missing `://` scheme separator")]
    MissingScheme,
    #[error("unknown transport protocol `{0}`")]
    UnknownProtocol(String),
    #[error("empty authority")]
    EmptyAuthority,
}

/// A parsed daemon endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportUri {
    protocol: Protocol,
    /// The `<host>:<port>` part, kept verbatim.
    authority: String,
}

impl TransportUri {
    pub fn new(protocol: Protocol, authority: impl Into<String>) -> Self {
        Self {
            protocol,
            authority: authority.into(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The `<host>:<port>` part, suitable for dialing.
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for TransportUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol.as_str(), self.authority)
    }
}

impl FromStr for TransportUri {
    type Err = UriParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (scheme, authority) = s.split_once("://").ok_or(UriParseError::MissingScheme)?;
        let protocol = match scheme {
            "ofi+sockets" => Protocol::OfiSockets,
            "ofi+psm2" => Protocol::OfiPsm2,
            "ofi+verbs" => Protocol::OfiVerbs,
            "na+sm" => Protocol::NaSm,
            other => return Err(UriParseError::UnknownProtocol(other.to_string())),
        };
        if authority.is_empty() {
            return Err(UriParseError::EmptyAuthority);
        }
        Ok(TransportUri {
            protocol,
            authority: authority.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let uri: TransportUri = "ofi+sockets://10.0.0.3:52000".parse().unwrap();
        assert_eq!(uri.protocol(), Protocol::OfiSockets);
        assert_eq!(uri.authority(), "10.0.0.3:52000");
        assert_eq!(uri.to_string(), "ofi+sockets://10.0.0.3:52000");
    }

    #[test]
    fn test_parse_all_protocols() {
        for (s, p) in [
            ("ofi+sockets://h:1", Protocol::OfiSockets),
            ("ofi+psm2://h:1", Protocol::OfiPsm2),
            ("ofi+verbs://h:1", Protocol::OfiVerbs),
            ("na+sm://h:1", Protocol::NaSm),
        ] {
            assert_eq!(s.parse::<TransportUri>().unwrap().protocol(), p);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "nonsense".parse::<TransportUri>().unwrap_err(),
            UriParseError::MissingScheme
        );
        assert_eq!(
            "tcp://h:1".parse::<TransportUri>().unwrap_err(),
            UriParseError::UnknownProtocol("tcp".to_string())
        );
        assert_eq!(
            "na+sm://".parse::<TransportUri>().unwrap_err(),
            UriParseError::EmptyAuthority
        );
    }

    #[test]
    fn test_protocol_primitive_roundtrip() {
        let p = Protocol::OfiVerbs;
        let n: u8 = p.into();
        assert_eq!(Protocol::try_from(n).unwrap(), p);
    }
}
