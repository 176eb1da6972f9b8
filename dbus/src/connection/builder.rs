//! Drives the line-oriented SASL handshake, then hands the transport off
//! to the reader/writer tasks and performs the `Hello` call.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use dbus_core::Value;
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::address::{self, Address};
use crate::connection::connection::Connection;
use crate::connection::dispatcher::{self, Shared};
use crate::error::{Error, ErrorKind, Result};
use crate::message::serial::SerialAllocator;
use crate::message::Message;
use crate::org_freedesktop_dbus;
use crate::protocol::Endianness;
use crate::sasl;
use crate::transport::Transport;

/// Builds and performs the handshake for a new [`Connection`].
pub struct ConnectionBuilder {
    addresses: Option<Vec<Address>>,
    mechanisms: Vec<sasl::Mechanism>,
    max_rejections: u32,
    max_line_bytes: usize,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            addresses: None,
            mechanisms: sasl::CLIENT_ORDER.to_vec(),
            max_rejections: sasl::DEFAULT_MAX_REJECTIONS,
            max_line_bytes: sasl::DEFAULT_MAX_LINE_BYTES,
        }
    }

    /// Override which SASL mechanisms are attempted, and in what order.
    /// Defaults to EXTERNAL, then DBUS_COOKIE_SHA1, then ANONYMOUS.
    pub fn with_mechanisms(mut self, mechanisms: Vec<sasl::Mechanism>) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    /// Override how many `REJECTED` responses the handshake tolerates
    /// before giving up. Defaults to [`crate::DEFAULT_MAX_REJECTIONS`].
    pub fn with_max_rejections(mut self, max_rejections: u32) -> Self {
        self.max_rejections = max_rejections;
        self
    }

    /// Override the maximum length of a single SASL line. Defaults to
    /// [`crate::DEFAULT_MAX_LINE_BYTES`].
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Connect to the session bus, resolved from `DBUS_SESSION_BUS_ADDRESS`.
    pub fn session() -> Self {
        let mut builder = Self::new();
        builder.addresses = address::session_address().ok();
        builder
    }

    /// Connect to the system bus.
    pub fn system() -> Self {
        let mut builder = Self::new();
        builder.addresses = address::system_address().ok();
        builder
    }

    /// Connect to an explicit D-Bus address string instead of an
    /// environment-resolved bus.
    pub fn address(address: &str) -> Result<Self> {
        let mut builder = Self::new();
        builder.addresses = Some(address::parse(address)?);
        Ok(builder)
    }

    pub async fn connect(self) -> Result<Connection> {
        let addresses = self.addresses.ok_or_else(|| Error::new(ErrorKind::MissingBus))?;
        debug!("connecting to {} candidate address(es)", addresses.len());
        let transport = Transport::connect(&addresses).await?;
        connect_transport(transport, &self.mechanisms, self.max_rejections, self.max_line_bytes).await
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn connect_transport(
    transport: Transport,
    mechanisms: &[sasl::Mechanism],
    max_rejections: u32,
    max_line_bytes: usize,
) -> Result<Connection> {
    let (mut read_half, mut write_half) = tokio::io::split(transport);

    // The NUL byte that must precede the handshake on a unix-domain
    // credential-passing socket.
    write_half.write_all(&[0]).await?;

    authenticate(&mut read_half, &mut write_half, mechanisms, max_rejections, max_line_bytes).await?;
    write_half.write_all(b"BEGIN\r\n").await?;

    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(Shared {
        serials: SerialAllocator::new(),
        pending: Mutex::new(HashMap::new()),
        subscriptions: Mutex::new(Vec::new()),
        filters: Mutex::new(Vec::new()),
        exports: Mutex::new(Vec::new()),
        next_handle: std::sync::atomic::AtomicU64::new(0),
        on_disconnect: Mutex::new(None),
        incoming_calls: incoming_tx,
        outgoing: outgoing_tx,
        endianness: Endianness::NATIVE,
        name: Mutex::new(None),
        acquired_names: Mutex::new(std::collections::HashSet::new()),
        closed: AtomicBool::new(false),
    });

    let writer = dispatcher::spawn_writer(write_half, outgoing_rx);
    let reader = dispatcher::spawn_reader(read_half, shared.clone());

    let connection = Connection {
        shared,
        reader: Arc::new(reader),
        writer: Arc::new(writer),
        incoming_calls: Arc::new(tokio::sync::Mutex::new(incoming_rx)),
    };

    hello(&connection).await?;
    debug!("connection established as {:?}", connection.unique_name());
    spawn_name_tracker(&connection);

    Ok(connection)
}

/// Listen for `NameAcquired`/`NameLost` on `org.freedesktop.DBus` and keep
/// `Shared::acquired_names` in sync for the lifetime of the connection. The
/// task ends on its own once the connection shuts down and the paired
/// subscription sender is dropped.
fn spawn_name_tracker(connection: &Connection) {
    let rule = crate::match_rule::MatchRule::signal().with_interface(org_freedesktop_dbus::INTERFACE);
    let mut receiver = connection.subscribe(rule);
    let shared = connection.shared.clone();

    tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let crate::message::MessageKind::Signal { member, .. } = &message.kind else {
                continue;
            };
            let Some(Value::String(name)) = message.body.first() else {
                continue;
            };
            match member.as_str() {
                "NameAcquired" => {
                    shared.acquired_names.lock().unwrap().insert(name.clone());
                }
                "NameLost" => {
                    shared.acquired_names.lock().unwrap().remove(name.as_str());
                }
                _ => {}
            }
        }
    });
}

async fn hello(connection: &Connection) -> Result<()> {
    let message = Message::method_call(org_freedesktop_dbus::PATH, "Hello")
        .with_interface(org_freedesktop_dbus::INTERFACE)
        .with_destination(org_freedesktop_dbus::DESTINATION);

    let reply = connection.call(message).await?;

    let name = match reply.body.first() {
        Some(Value::String(name)) => name.clone(),
        _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
    };

    *connection.shared.name.lock().unwrap() = Some(name);
    Ok(())
}

async fn authenticate(
    read_half: &mut (impl AsyncReadExt + Unpin),
    write_half: &mut (impl AsyncWriteExt + Unpin),
    mechanisms: &[sasl::Mechanism],
    max_rejections: u32,
    max_line_bytes: usize,
) -> Result<()> {
    let uid = current_uid();
    let mut rejections = 0u32;

    for mechanism in mechanisms {
        let outcome = match (mechanism, uid) {
            (sasl::Mechanism::External, Some(uid)) => {
                debug!("attempting SASL mechanism {mechanism:?}");
                Some(try_external(read_half, write_half, uid, max_line_bytes).await?)
            }
            (sasl::Mechanism::CookieSha1, Some(uid)) => {
                debug!("attempting SASL mechanism {mechanism:?}");
                Some(try_cookie_sha1(read_half, write_half, uid, max_line_bytes).await?)
            }
            (sasl::Mechanism::Anonymous, _) => {
                debug!("attempting SASL mechanism {mechanism:?}");
                Some(try_anonymous(read_half, write_half, max_line_bytes).await?)
            }
            _ => None,
        };

        match outcome {
            Some(true) => {
                debug!("authenticated via {mechanism:?}");
                return Ok(());
            }
            Some(false) => {
                warn!("SASL mechanism {mechanism:?} was rejected");
                rejections += 1;
                if rejections > max_rejections {
                    return Err(Error::new(ErrorKind::TooManyRejections(max_rejections)));
                }
            }
            None => {}
        }
    }

    Err(Error::new(ErrorKind::AuthFailed("no mechanism succeeded".into())))
}

async fn try_external(
    read_half: &mut (impl AsyncReadExt + Unpin),
    write_half: &mut (impl AsyncWriteExt + Unpin),
    uid: u32,
    max_line_bytes: usize,
) -> Result<bool> {
    write_half.write_all(sasl::auth_external_line(uid).as_bytes()).await?;
    let line = read_line(read_half, max_line_bytes).await?;
    Ok(line.starts_with("OK"))
}

async fn try_anonymous(
    read_half: &mut (impl AsyncReadExt + Unpin),
    write_half: &mut (impl AsyncWriteExt + Unpin),
    max_line_bytes: usize,
) -> Result<bool> {
    write_half.write_all(sasl::auth_anonymous_line().as_bytes()).await?;
    let line = read_line(read_half, max_line_bytes).await?;
    Ok(line.starts_with("OK"))
}

async fn try_cookie_sha1(
    read_half: &mut (impl AsyncReadExt + Unpin),
    write_half: &mut (impl AsyncWriteExt + Unpin),
    uid: u32,
    max_line_bytes: usize,
) -> Result<bool> {
    write_half.write_all(sasl::auth_cookie_sha1_line(uid).as_bytes()).await?;
    let line = read_line(read_half, max_line_bytes).await?;

    if line.starts_with("REJECTED") {
        return Ok(false);
    }

    let challenge = sasl::parse_data_line(line.trim_end())?;
    let response = sasl::cookie_sha1_response(&challenge)?;
    write_half.write_all(response.as_bytes()).await?;

    let line = read_line(read_half, max_line_bytes).await?;
    Ok(line.starts_with("OK"))
}

async fn read_line(read_half: &mut (impl AsyncReadExt + Unpin), max_line_bytes: usize) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        read_half.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= max_line_bytes {
            return Err(Error::new(ErrorKind::SaslLineTooLong(max_line_bytes)));
        }
        line.push(byte[0]);
    }

    let line = String::from_utf8(line).map_err(|error| Error::from(error.utf8_error()))?;
    Ok(line.trim_end_matches('\r').to_owned())
}

#[cfg(feature = "libc")]
fn current_uid() -> Option<u32> {
    // SAFETY: getuid has no preconditions and cannot fail.
    Some(unsafe { libc::getuid() })
}

#[cfg(not(feature = "libc"))]
fn current_uid() -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use dbus_core::Signature;
    use tokio::io::AsyncReadExt as _;

    use super::*;
    use crate::buf::OwnedBuf;
    use crate::transport::Transport;

    /// Drive the server half of a handshake over an in-memory duplex pair:
    /// accept ANONYMOUS, then answer the client's `Hello` call.
    async fn serve_one_handshake(mut server: Transport) {
        let mut nul = [0u8; 1];
        server.read_exact(&mut nul).await.unwrap();

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            server.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        assert!(String::from_utf8_lossy(&line).starts_with("AUTH ANONYMOUS"));

        server.write_all(b"OK 0123456789abcdef0123456789abcdef\r\n").await.unwrap();

        let mut line = Vec::new();
        loop {
            server.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        assert_eq!(String::from_utf8_lossy(&line).trim_end(), "BEGIN");

        let mut head = vec![0u8; 16];
        server.read_exact(&mut head).await.unwrap();
        let endianness = if head[0] == b'l' { Endianness::LITTLE } else { Endianness::BIG };
        let body_length = <u32 as crate::frame::Frame>::read(&head[4..8], endianness);
        let array_length = <u32 as crate::frame::Frame>::read(&head[12..16], endianness);
        let mut fields = vec![0u8; array_length as usize];
        server.read_exact(&mut fields).await.unwrap();
        let mut full = head;
        full.extend_from_slice(&fields);
        let padded = crate::buf::padded_len(full.len(), 8);
        if padded > full.len() {
            let mut pad = vec![0u8; padded - full.len()];
            server.read_exact(&mut pad).await.unwrap();
            full.extend_from_slice(&pad);
        }
        let mut body = vec![0u8; body_length as usize];
        server.read_exact(&mut body).await.unwrap();
        full.extend_from_slice(&body);

        let mut buf = OwnedBuf::new();
        buf.extend_from_slice(&full);
        let call = Message::read(&mut buf).unwrap();
        assert!(matches!(call.kind, crate::message::MessageKind::MethodCall { ref member, .. } if member == "Hello"));

        let reply = Message::method_return(call.serial)
            .with_body(Signature::new("s").unwrap(), vec![Value::String(":1.1".into())]);
        let mut out = OwnedBuf::new();
        reply.write(&mut out, endianness).unwrap();
        server.write_all(out.as_slice()).await.unwrap();
    }

    #[tokio::test]
    async fn connects_and_performs_hello_over_duplex_transport() {
        let (client_transport, server_transport) = Transport::test_pair();

        let server = tokio::spawn(serve_one_handshake(server_transport));

        let connection = connect_transport(
            client_transport,
            &[sasl::Mechanism::Anonymous],
            sasl::DEFAULT_MAX_REJECTIONS,
            sasl::DEFAULT_MAX_LINE_BYTES,
        )
        .await
        .unwrap();

        assert_eq!(connection.unique_name().as_deref(), Some(":1.1"));
        server.await.unwrap();
    }
}

