//! Server-side half of the SASL handshake: drives `WaitingForAuth ->
//! WaitingForData -> WaitingForBegin` against lines received from a
//! connecting peer, symmetric to the client state machine in
//! [`super`](crate::sasl).
//!
//! This crate does not run a bus daemon; an `AuthServer` is the pure
//! authentication-server piece a caller building its own listener can
//! drive directly.

use log::{debug, warn};
use rand::RngCore;
use sha1::{Digest, Sha1};

use super::cookie;
use super::{hex_decode, hex_encode};
use crate::error::{Error, ErrorKind};

/// The cookie-keyring context this crate's server side authenticates
/// against. `dbus-daemon` uses `org_freedesktop_general` for the same
/// purpose.
const COOKIE_CONTEXT: &str = "org_freedesktop_general";

#[derive(Debug, Clone)]
enum ServerMechanism {
    External,
    CookieSha1 { cookie: String, server_challenge: String },
}

#[derive(Debug, Clone)]
enum ServerState {
    WaitingForAuth,
    WaitingForData(ServerMechanism),
    WaitingForBegin { uid: Option<u32>, unix_fds: bool },
}

/// The outcome of feeding one line into [`AuthServer::receive`].
pub enum Step {
    /// Send this line back to the peer and keep going.
    Reply(String),
    /// The peer sent `BEGIN`; the binary protocol starts now.
    Done { uid: Option<u32>, unix_fds: bool },
    /// Too many rejections, or a fatal I/O error reading the keyring;
    /// the transport should be closed.
    Fail(Error),
}

/// Drives the server side of the line protocol for one connecting peer.
/// Accepts `EXTERNAL` and `DBUS_COOKIE_SHA1`, mirroring the mechanisms this
/// crate's client half can perform.
pub struct AuthServer {
    state: ServerState,
    rejections: u32,
    max_rejections: u32,
    guid: String,
}

impl AuthServer {
    pub fn new(guid: impl Into<String>, max_rejections: u32) -> Self {
        Self { state: ServerState::WaitingForAuth, rejections: 0, max_rejections, guid: guid.into() }
    }

    /// Feed one line received from the peer, without its trailing CRLF.
    pub fn receive(&mut self, line: &str) -> Step {
        match self.state.clone() {
            ServerState::WaitingForAuth => self.on_waiting_for_auth(line),
            ServerState::WaitingForData(mechanism) => self.on_waiting_for_data(mechanism, line),
            ServerState::WaitingForBegin { uid, unix_fds } => self.on_waiting_for_begin(uid, unix_fds, line),
        }
    }

    fn reject(&mut self, reason: &str) -> Step {
        warn!("rejecting SASL attempt: {reason}");
        self.rejections += 1;
        self.state = ServerState::WaitingForAuth;
        if self.rejections > self.max_rejections {
            return Step::Fail(Error::new(ErrorKind::TooManyRejections(self.max_rejections)));
        }
        Step::Reply("REJECTED EXTERNAL DBUS_COOKIE_SHA1\r\n".to_owned())
    }

    fn on_waiting_for_auth(&mut self, line: &str) -> Step {
        if line == "NEGOTIATE_UNIX_FD" {
            return Step::Reply("AGREE_UNIX_FD\r\n".to_owned());
        }

        let Some(rest) = line.strip_prefix("AUTH ").or_else(|| (line == "AUTH").then_some("")) else {
            return self.reject("expected AUTH");
        };
        let mut parts = rest.splitn(2, ' ');
        let mechanism = parts.next().unwrap_or("");
        let initial = parts.next();

        match mechanism {
            "EXTERNAL" => match initial {
                Some(hex_uid) => self.finish_external(hex_uid),
                None => {
                    self.state = ServerState::WaitingForData(ServerMechanism::External);
                    Step::Reply("DATA\r\n".to_owned())
                }
            },
            "DBUS_COOKIE_SHA1" => match initial {
                Some(hex_uid) => self.start_cookie_sha1(hex_uid),
                None => self.reject("DBUS_COOKIE_SHA1 requires an initial uid"),
            },
            "" => self.reject("missing mechanism"),
            _ => self.reject("unsupported mechanism"),
        }
    }

    fn finish_external(&mut self, hex_uid: &str) -> Step {
        let uid = match decode_decimal_uid(hex_uid) {
            Ok(uid) => uid,
            Err(reason) => return self.reject(reason),
        };
        debug!("EXTERNAL authenticated uid={uid}");
        self.state = ServerState::WaitingForBegin { uid: Some(uid), unix_fds: false };
        Step::Reply(format!("OK {}\r\n", self.guid))
    }

    fn start_cookie_sha1(&mut self, hex_uid: &str) -> Step {
        if decode_decimal_uid(hex_uid).is_err() {
            return self.reject("malformed DBUS_COOKIE_SHA1 uid");
        }

        let cookies = match cookie::load_or_mint(COOKIE_CONTEXT) {
            Ok(cookies) => cookies,
            Err(error) => return Step::Fail(error),
        };
        let Some(chosen) = cookies.first() else {
            return Step::Fail(Error::new(ErrorKind::AuthFailed("keyring has no cookies".into())));
        };

        let mut challenge_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut challenge_bytes);
        let server_challenge = hex_encode(&challenge_bytes);

        let payload = format!("{COOKIE_CONTEXT} {} {server_challenge}", chosen.id);
        self.state = ServerState::WaitingForData(ServerMechanism::CookieSha1 {
            cookie: chosen.cookie.clone(),
            server_challenge,
        });
        Step::Reply(format!("DATA {}\r\n", hex_encode(payload.as_bytes())))
    }

    fn on_waiting_for_data(&mut self, mechanism: ServerMechanism, line: &str) -> Step {
        let Some(hex_payload) = line.strip_prefix("DATA ") else {
            if line == "CANCEL" {
                return self.reject("peer cancelled");
            }
            return self.reject("expected DATA");
        };

        match mechanism {
            ServerMechanism::External => self.finish_external(hex_payload),
            ServerMechanism::CookieSha1 { cookie, server_challenge } => {
                self.finish_cookie_sha1(&cookie, &server_challenge, hex_payload)
            }
        }
    }

    fn finish_cookie_sha1(&mut self, cookie: &str, server_challenge: &str, hex_payload: &str) -> Step {
        let Ok(bytes) = hex_decode(hex_payload) else {
            return self.reject("malformed DBUS_COOKIE_SHA1 response");
        };
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return self.reject("non-UTF8 DBUS_COOKIE_SHA1 response");
        };
        let mut parts = text.split_whitespace();
        let (Some(client_challenge), Some(response)) = (parts.next(), parts.next()) else {
            return self.reject("malformed DBUS_COOKIE_SHA1 response");
        };

        let mut hasher = Sha1::new();
        hasher.update(server_challenge.as_bytes());
        hasher.update(b":");
        hasher.update(client_challenge.as_bytes());
        hasher.update(b":");
        hasher.update(cookie.as_bytes());
        let expected = hex_encode(&hasher.finalize());

        if expected != response {
            return self.reject("DBUS_COOKIE_SHA1 response mismatch");
        }

        debug!("DBUS_COOKIE_SHA1 authenticated");
        self.state = ServerState::WaitingForBegin { uid: None, unix_fds: false };
        Step::Reply(format!("OK {}\r\n", self.guid))
    }

    fn on_waiting_for_begin(&mut self, uid: Option<u32>, unix_fds: bool, line: &str) -> Step {
        match line {
            "BEGIN" => Step::Done { uid, unix_fds },
            "NEGOTIATE_UNIX_FD" => {
                self.state = ServerState::WaitingForBegin { uid, unix_fds: true };
                Step::Reply("AGREE_UNIX_FD\r\n".to_owned())
            }
            "CANCEL" => self.reject("peer cancelled after OK"),
            _ => self.reject("expected BEGIN"),
        }
    }
}

fn decode_decimal_uid(hex_uid: &str) -> std::result::Result<u32, &'static str> {
    let bytes = hex_decode(hex_uid).map_err(|_| "malformed hex uid")?;
    let text = std::str::from_utf8(&bytes).map_err(|_| "non-UTF8 uid")?;
    text.parse::<u32>().map_err(|_| "non-numeric uid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_temp_home<T>(f: impl FnOnce() -> T) -> T {
        let dir = std::env::temp_dir().join(format!("dbus-sasl-server-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let previous = std::env::var_os("HOME");
        std::env::set_var("HOME", &dir);
        let result = f();
        if let Some(previous) = previous {
            std::env::set_var("HOME", previous);
        }
        let _ = std::fs::remove_dir_all(&dir);
        result
    }

    #[test]
    fn external_handshake_succeeds() {
        let mut server = AuthServer::new("deadbeef", 42);
        let auth_line = super::super::auth_external_line(1000);

        match server.receive(auth_line.trim_end_matches("\r\n")) {
            Step::Reply(reply) => assert!(reply.starts_with("OK deadbeef")),
            _ => panic!("expected OK"),
        }

        match server.receive("BEGIN") {
            Step::Done { uid, unix_fds } => {
                assert_eq!(uid, Some(1000));
                assert!(!unix_fds);
            }
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn cookie_sha1_handshake_succeeds() {
        with_temp_home(|| {
            let mut server = AuthServer::new("deadbeef", 42);

            let auth_line = super::super::auth_cookie_sha1_line(1000);
            let challenge_line = match server.receive(auth_line.trim_end_matches("\r\n")) {
                Step::Reply(reply) => reply,
                _ => panic!("expected a DATA challenge"),
            };

            let response_line = super::super::cookie_sha1_response(
                &super::super::parse_data_line(challenge_line.trim_end()).unwrap(),
            )
            .unwrap();

            match server.receive(response_line.trim_end_matches("\r\n")) {
                Step::Reply(reply) => assert!(reply.starts_with("OK deadbeef")),
                other => panic!("expected OK, got a different step: {}", matches!(other, Step::Fail(_))),
            }
        });
    }

    #[test]
    fn unsupported_mechanism_is_rejected() {
        let mut server = AuthServer::new("deadbeef", 42);
        match server.receive("AUTH GSSAPI deadbeef") {
            Step::Reply(reply) => assert!(reply.starts_with("REJECTED")),
            _ => panic!("expected REJECTED"),
        }
    }

    #[test]
    fn too_many_rejections_fails() {
        let mut server = AuthServer::new("deadbeef", 1);
        assert!(matches!(server.receive("AUTH GSSAPI"), Step::Reply(_)));
        assert!(matches!(server.receive("AUTH GSSAPI"), Step::Fail(_)));
    }

    #[test]
    fn negotiates_unix_fd_before_auth() {
        let mut server = AuthServer::new("deadbeef", 42);
        match server.receive("NEGOTIATE_UNIX_FD") {
            Step::Reply(reply) => assert_eq!(reply, "AGREE_UNIX_FD\r\n"),
            _ => panic!("expected AGREE_UNIX_FD"),
        }
    }
}
