use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dbus_core::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::dispatcher::{ExportId, FilterId, Shared};
use crate::error::{Error, ErrorKind, Result};
use crate::match_rule::MatchRule;
use crate::message::{Message, MessageKind};

/// The connection's place in the handshake, surfaced for diagnostics and
/// for [`Error::InvalidState`](crate::error::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport is connected but SASL has not completed.
    Init,
    /// SASL completed and `Hello` has been sent, awaiting our unique name.
    HelloSent,
    /// `Hello` completed; the connection is ready for general use.
    Idle,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Init => f.write_str("init"),
            ConnectionState::HelloSent => f.write_str("hello-sent"),
            ConnectionState::Idle => f.write_str("idle"),
        }
    }
}

/// A handle to a live, authenticated D-Bus connection.
///
/// Cloning a `Connection` is cheap and shares the same underlying reader
/// and writer tasks; dropping the last clone does not by itself close the
/// connection, call [`Connection::close`] for that.
#[derive(Clone)]
pub struct Connection {
    pub(crate) shared: Arc<Shared>,
    pub(crate) reader: Arc<JoinHandle<()>>,
    pub(crate) writer: Arc<JoinHandle<()>>,
    pub(crate) incoming_calls: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl Connection {
    /// The unique connection name assigned by the bus during `Hello`, if
    /// the handshake has completed.
    pub fn unique_name(&self) -> Option<String> {
        self.shared.name.lock().unwrap().clone()
    }

    /// Whether the reader task has observed the transport close.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Bus names currently held by this connection, tracked by listening
    /// for `NameAcquired`/`NameLost` since the connection was established.
    pub fn acquired_names(&self) -> Vec<String> {
        self.shared.acquired_names.lock().unwrap().iter().cloned().collect()
    }

    /// Send `message`, filling in a fresh serial, without waiting for a
    /// reply. Used for signals, fire-and-forget calls, and replies.
    pub fn send(&self, mut message: Message) -> Result<u32> {
        if self.shared.is_closed() {
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        let serial = self.shared.next_serial();
        message.serial = serial.get();

        let mut buf = crate::buf::OwnedBuf::new();
        message.write(&mut buf, self.shared.endianness)?;

        self.shared
            .outgoing
            .send(buf.as_slice().to_vec())
            .map_err(|_| Error::new(ErrorKind::ConnectionClosed))?;

        Ok(serial.get())
    }

    /// Send a method call and wait for its reply.
    pub async fn call(&self, message: Message) -> Result<Message> {
        self.call_timeout(message, None).await
    }

    /// Send a method call and wait for its reply, failing if `timeout`
    /// elapses first.
    pub async fn call_timeout(&self, message: Message, timeout: Option<Duration>) -> Result<Message> {
        if !matches!(message.kind, MessageKind::MethodCall { .. }) {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        }

        let (sender, receiver) = oneshot::channel();
        let serial = {
            if self.shared.is_closed() {
                return Err(Error::new(ErrorKind::ConnectionClosed));
            }
            let serial = self.shared.next_serial().get();
            self.shared.register_pending(serial, sender);
            serial
        };

        let mut message = message;
        message.serial = serial;
        let mut buf = crate::buf::OwnedBuf::new();
        if let Err(error) = message.write(&mut buf, self.shared.endianness) {
            self.shared.forget_pending(serial);
            return Err(error);
        }

        if self.shared.outgoing.send(buf.as_slice().to_vec()).is_err() {
            self.shared.forget_pending(serial);
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        let reply = match timeout {
            Some(duration) => match tokio::time::timeout(duration, receiver).await {
                Ok(result) => result,
                Err(_) => {
                    self.shared.forget_pending(serial);
                    return Err(Error::new(ErrorKind::TimedOut));
                }
            },
            None => receiver.await,
        };

        let reply = reply.map_err(|_| Error::new(ErrorKind::NoReply))??;

        if let MessageKind::Error { error_name, .. } = &reply.kind {
            let text = reply
                .body
                .first()
                .and_then(|value| match value {
                    Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            return Err(Error::new(ErrorKind::MethodCallFailed(error_name.clone(), text)));
        }

        Ok(reply)
    }

    /// Subscribe to messages matching `rule`. The subscription is dropped,
    /// and stops receiving, when the returned receiver is dropped.
    pub fn subscribe(&self, rule: MatchRule) -> mpsc::UnboundedReceiver<Message> {
        self.shared.subscribe(rule)
    }

    /// Receive the next incoming method call not claimed by a signal
    /// subscription, for implementing a service.
    pub async fn next_call(&self) -> Option<Message> {
        self.incoming_calls.lock().await.recv().await
    }

    /// Register an infallible observer invoked, in insertion order, on
    /// every decoded message before replies, subscriptions, or exports see
    /// it. Filters may not mutate or consume the message.
    pub fn add_filter(&self, filter: impl Fn(&Message) + Send + Sync + 'static) -> FilterId {
        self.shared.add_filter(filter)
    }

    /// Deregister a filter previously returned by [`Connection::add_filter`].
    pub fn remove_filter(&self, handle: FilterId) {
        self.shared.remove_filter(handle)
    }

    /// Register a claim against incoming method calls. Exports run in
    /// insertion order; the first to return `Some(reply)` wins and its
    /// reply (a method-return or error) is sent back with the call's
    /// reply serial filled in. If no export claims a call it falls back to
    /// [`Connection::next_call`], and if nothing is listening there either
    /// it is answered automatically with `org.freedesktop.DBus.Error.UnknownMethod`.
    pub fn add_export(&self, export: impl Fn(&Message) -> Option<Message> + Send + Sync + 'static) -> ExportId {
        self.shared.add_export(export)
    }

    /// Deregister an export previously returned by [`Connection::add_export`].
    pub fn remove_export(&self, handle: ExportId) {
        self.shared.remove_export(handle)
    }

    /// Install a callback invoked exactly once when the connection shuts
    /// down, whether from an explicit [`Connection::close`] or a fatal
    /// transport/protocol error observed by the reader task. Installing a
    /// new callback replaces any previously installed one.
    pub fn set_on_disconnect(&self, callback: impl FnOnce() + Send + 'static) {
        self.shared.set_on_disconnect(callback)
    }

    /// Stop the reader and writer tasks. Every pending call resolves with
    /// [`ErrorKind::ConnectionClosed`](crate::error::ErrorKind); this crate
    /// does not expose `ErrorKind` directly, so it surfaces as a plain
    /// error. The `on_disconnect` callback, if any, runs exactly once.
    pub fn close(&self) {
        self.shared.shutdown();
        self.reader.abort();
        self.writer.abort();
    }
}
