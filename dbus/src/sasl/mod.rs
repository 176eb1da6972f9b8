//! The line-oriented SASL handshake D-Bus performs before the binary
//! protocol begins.

mod cookie;
mod server;

use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{Error, ErrorKind, Result};

pub use self::server::{AuthServer, Step as AuthServerStep};

/// Mechanisms this crate can drive as a client, in the order they are
/// attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    External,
    CookieSha1,
    Anonymous,
}

pub(crate) const CLIENT_ORDER: &[Mechanism] =
    &[Mechanism::External, Mechanism::CookieSha1, Mechanism::Anonymous];

/// Default cap on consecutive `REJECTED` responses before giving up, as
/// `dbus-daemon` itself applies.
pub const DEFAULT_MAX_REJECTIONS: u32 = 42;

/// Default cap on a single SASL line, guarding against a peer that never
/// sends a newline.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024;

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0xf) as usize] as char);
    }
    out
}

pub(crate) fn hex_decode(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(Error::new(ErrorKind::InvalidSasl));
    }

    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();

    for chunk in bytes.chunks(2) {
        let hi = hex_digit(chunk[0])?;
        let lo = hex_digit(chunk[1])?;
        out.push((hi << 4) | lo);
    }

    Ok(out)
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::new(ErrorKind::InvalidSasl)),
    }
}

/// Build the initial `AUTH EXTERNAL <hex(uid)>\r\n` line, where the
/// payload is the ASCII decimal UID before hex-encoding.
pub(crate) fn auth_external_line(uid: u32) -> String {
    format!("AUTH EXTERNAL {}\r\n", hex_encode(uid.to_string().as_bytes()))
}

/// Build the initial `AUTH DBUS_COOKIE_SHA1 <hex(uid)>\r\n` line.
pub(crate) fn auth_cookie_sha1_line(uid: u32) -> String {
    format!(
        "AUTH DBUS_COOKIE_SHA1 {}\r\n",
        hex_encode(uid.to_string().as_bytes())
    )
}

/// Build the `AUTH ANONYMOUS <hex(trace)>\r\n` line.
pub(crate) fn auth_anonymous_line() -> String {
    format!("AUTH ANONYMOUS {}\r\n", hex_encode(b"dbus-rs"))
}

/// Parse a `DATA <hex>` continuation line, returning the decoded payload.
pub(crate) fn parse_data_line(line: &str) -> Result<Vec<u8>> {
    let rest = line
        .strip_prefix("DATA ")
        .ok_or_else(|| Error::new(ErrorKind::InvalidSaslResponse))?;
    hex_decode(rest)
}

/// Given the decoded challenge data from a `DBUS_COOKIE_SHA1` `DATA` line
/// (`<context> <id> <server-challenge>`), compute the client's response
/// line: `DATA <hex("<client-challenge> <sha1>")>\r\n`.
pub(crate) fn cookie_sha1_response(challenge: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(challenge).map_err(|_| Error::new(ErrorKind::InvalidSasl))?;
    let mut parts = text.split_whitespace();

    let context = parts.next().ok_or_else(|| Error::new(ErrorKind::InvalidSasl))?;
    let cookie_id = parts.next().ok_or_else(|| Error::new(ErrorKind::InvalidSasl))?;
    let server_challenge = parts.next().ok_or_else(|| Error::new(ErrorKind::InvalidSasl))?;

    let cookie = cookie::lookup(context, cookie_id)?;

    let mut client_challenge_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut client_challenge_bytes);
    let client_challenge = hex_encode(&client_challenge_bytes);

    let mut hasher = Sha1::new();
    hasher.update(server_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(client_challenge.as_bytes());
    hasher.update(b":");
    hasher.update(&cookie);
    let digest = hasher.finalize();

    let response = format!("{client_challenge} {}", hex_encode(&digest));
    Ok(format!("DATA {}\r\n", hex_encode(response.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let bytes = b"hello world";
        assert_eq!(hex_decode(&hex_encode(bytes)).unwrap(), bytes);
    }

    #[test]
    fn external_line_encodes_decimal_uid() {
        let line = auth_external_line(1000);
        assert_eq!(line, format!("AUTH EXTERNAL {}\r\n", hex_encode(b"1000")));
    }

    #[test]
    fn parse_data_line_rejects_other_commands() {
        assert!(parse_data_line("OK 1234\r\n").is_err());
    }

    #[test]
    fn parse_data_line_decodes_hex() {
        let decoded = parse_data_line(&format!("DATA {}", hex_encode(b"abc"))).unwrap();
        assert_eq!(decoded, b"abc");
    }
}
