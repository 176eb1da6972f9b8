//! Parses D-Bus server address strings: `transport:key=value,key=value;...`

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, Result};

/// One transport alternative out of a semicolon-separated address list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub transport: String,
    pub properties: BTreeMap<String, String>,
}

impl Address {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Parse a full D-Bus address string into its semicolon-separated
/// alternatives, in order of preference.
pub fn parse(address: &str) -> Result<Vec<Address>> {
    address.split(';').filter(|s| !s.is_empty()).map(parse_one).collect()
}

fn parse_one(segment: &str) -> Result<Address> {
    let (transport, rest) = segment
        .split_once(':')
        .ok_or_else(|| Error::new(ErrorKind::InvalidAddress(segment.to_owned())))?;

    let mut properties = BTreeMap::new();

    for pair in rest.split(',').filter(|s| !s.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::new(ErrorKind::InvalidAddress(segment.to_owned())))?;
        let value = percent_decode(value)
            .ok_or_else(|| Error::new(ErrorKind::InvalidAddress(segment.to_owned())))?;
        properties.insert(key.to_owned(), value);
    }

    Ok(Address { transport: transport.to_owned(), properties })
}

fn percent_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_digit(*bytes.get(i + 1)?)?;
            let lo = hex_digit(*bytes.get(i + 2)?)?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Resolve the session bus address from `DBUS_SESSION_BUS_ADDRESS`.
pub fn session_address() -> Result<Vec<Address>> {
    let value = std::env::var("DBUS_SESSION_BUS_ADDRESS")
        .map_err(|_| Error::new(ErrorKind::MissingBus))?;
    parse(&value)
}

/// Resolve the system bus address: `DBUS_SYSTEM_BUS_ADDRESS` if set,
/// otherwise the well-known default socket path.
pub fn system_address() -> Result<Vec<Address>> {
    let value = std::env::var("DBUS_SYSTEM_BUS_ADDRESS")
        .unwrap_or_else(|_| "unix:path=/var/run/dbus/system_bus_socket".to_owned());
    parse(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_path() {
        let addresses = parse("unix:path=/run/dbus/system_bus_socket").unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].transport, "unix");
        assert_eq!(addresses[0].get("path"), Some("/run/dbus/system_bus_socket"));
    }

    #[test]
    fn parses_multiple_alternatives() {
        let addresses = parse("unix:path=/a;tcp:host=localhost,port=1234").unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[1].transport, "tcp");
        assert_eq!(addresses[1].get("port"), Some("1234"));
    }

    #[test]
    fn percent_decodes_values() {
        let addresses = parse("unix:abstract=%2Ftmp%2Fdbus").unwrap();
        assert_eq!(addresses[0].get("abstract"), Some("/tmp/dbus"));
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse("unixpath=/a").is_err());
    }
}
