//! ==============================================================================
//! address.rs - sensor node addresses
//! ==============================================================================
//!
//! purpose:
//!     parses the text a user types into an address slot and turns it into
//!     something the http client can use.
//!
//! accepted forms:
//!     10.0.0.5                 ip, default port
//!     10.0.0.6:9999            ip + port
//!     sensor-kitchen.lan       hostname
//!     [fe80::1]:9000           bracketed ipv6 + port
//!     fe80::1                  bare ipv6 (bracketed on output)
//!     http://10.0.0.5:8080/    explicit scheme and trailing slash
//!
//! relationships:
//!     - used by: address_book.rs (validity check before probing)
//!     - used by: client.rs (url building)
//!
//! ==============================================================================

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{FleetError, Result};

/// https port every sensor node listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 10065;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// a validated node address
///
/// ordering and equality follow the text as entered (trimmed), so sorting a
/// result set by address is stable and matches what the user sees. use
/// `node_key` to ask whether two spellings reach the same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    raw: String,
    scheme: Scheme,
    host: String,
    port: Option<u16>,
}

impl Address {
    pub fn parse(text: &str) -> Result<Self> {
        let raw = text.trim();
        if raw.is_empty() {
            return Err(FleetError::InvalidAddress("empty address".to_string()));
        }

        let lower = raw.to_ascii_lowercase();
        let (scheme, rest) = if let Some(rest) = lower.strip_prefix("https://") {
            (Scheme::Https, rest)
        } else if let Some(rest) = lower.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else {
            (Scheme::Https, lower.as_str())
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let (host, port) = split_host_port(rest)
            .ok_or_else(|| FleetError::InvalidAddress(raw.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            host,
            port,
        })
    }

    /// syntactic validity check, no network involved
    pub fn is_valid(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// host part, ipv6 literals keep their brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host:port` with the default port filled in
    pub fn host_port(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }

    /// base url ending in `/`, e.g. `https://10.0.0.5:10065/`
    pub fn base_url(&self, default_port: u16) -> String {
        format!("{}://{}/", self.scheme.as_str(), self.host_port(default_port))
    }

    pub fn command_url(&self, default_port: u16, command: &str) -> String {
        format!("{}{}", self.base_url(default_port), command)
    }

    /// the endpoint this address reaches; spellings of one node share a key
    pub fn node_key(&self, default_port: u16) -> NodeKey {
        NodeKey {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port.unwrap_or(default_port),
        }
    }

    /// true when both addresses reach the same node
    pub fn same_node(&self, other: &Address, default_port: u16) -> bool {
        self.node_key(default_port) == other.node_key(default_port)
    }
}

/// scheme, lowercased host and effective port of an address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Address {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

// ==============================================================================
// parsing helpers
// ==============================================================================

fn split_host_port(text: &str) -> Option<(String, Option<u16>)> {
    // [v6] or [v6]:port
    if let Some(inner) = text.strip_prefix('[') {
        let (v6, after) = inner.split_once(']')?;
        v6.parse::<Ipv6Addr>().ok()?;
        let port = match after {
            "" => None,
            _ => Some(parse_port(after.strip_prefix(':')?)?),
        };
        return Some((format!("[{v6}]"), port));
    }

    // two or more colons without brackets can only be a bare v6 literal
    if text.matches(':').count() >= 2 {
        text.parse::<Ipv6Addr>().ok()?;
        return Some((format!("[{text}]"), None));
    }

    let (host, port) = match text.split_once(':') {
        Some((host, port)) => (host, Some(parse_port(port)?)),
        None => (text, None),
    };
    if !is_valid_host(host) {
        return None;
    }
    Some((host.to_string(), port))
}

fn parse_port(text: &str) -> Option<u16> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

fn is_valid_host(host: &str) -> bool {
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = host.split('.').collect();
    // all-numeric dotted text that is not a real ipv4 (e.g. 999.1.1.1)
    if labels.iter().all(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit())) {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ip_uses_default_port() {
        let address = Address::parse("10.0.0.5").unwrap();
        assert_eq!(address.port(), None);
        assert_eq!(address.base_url(DEFAULT_PORT), "https://10.0.0.5:10065/");
    }

    #[test]
    fn explicit_port_is_kept() {
        let address = Address::parse(" 10.0.0.6:9999 ").unwrap();
        assert_eq!(address.as_str(), "10.0.0.6:9999");
        assert_eq!(address.host_port(DEFAULT_PORT), "10.0.0.6:9999");
    }

    #[test]
    fn scheme_and_trailing_slash() {
        let address = Address::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(address.scheme(), Scheme::Http);
        assert_eq!(
            address.command_url(DEFAULT_PORT, "GetHostName"),
            "http://127.0.0.1:8080/GetHostName"
        );
    }

    #[test]
    fn ipv6_forms() {
        let bracketed = Address::parse("[fe80::1]:9000").unwrap();
        assert_eq!(bracketed.host(), "[fe80::1]");
        assert_eq!(bracketed.port(), Some(9000));

        let bare = Address::parse("fe80::1").unwrap();
        assert_eq!(bare.base_url(DEFAULT_PORT), "https://[fe80::1]:10065/");
    }

    #[test]
    fn hostnames() {
        assert!(Address::is_valid("sensor-kitchen.lan"));
        assert!(Address::is_valid("pi4"));
        assert!(!Address::is_valid("-bad.lan"));
        assert!(!Address::is_valid("bad_name.lan"));
    }

    #[test]
    fn spellings_of_one_node_share_a_key() {
        let bare = Address::parse("10.0.0.5").unwrap();
        for other in ["10.0.0.5:10065", "https://10.0.0.5", "HTTPS://10.0.0.5:10065/"] {
            assert!(bare.same_node(&Address::parse(other).unwrap(), DEFAULT_PORT), "{other}");
        }
        assert!(!bare.same_node(&Address::parse("http://10.0.0.5").unwrap(), DEFAULT_PORT));
        assert!(!bare.same_node(&Address::parse("10.0.0.5:9999").unwrap(), DEFAULT_PORT));
        assert!(Address::parse("Sensor.LAN").unwrap().same_node(&Address::parse("sensor.lan").unwrap(), DEFAULT_PORT));
    }

    #[test]
    fn rejects_garbage() {
        for text in ["", "   ", "999.1.1.1", "10.0.0.5:0", "10.0.0.5:70000", "10.0.0.5:", "[fe80::1", "a b"] {
            assert!(!Address::is_valid(text), "{text:?} should be invalid");
        }
    }
}
