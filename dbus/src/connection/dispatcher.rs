//! The reader and writer tasks that own the transport once a connection
//! has finished its handshake, plus the state they share with [`Connection`]
//! handles: pending-reply slots and signal subscriptions.
//!
//! [`Connection`]: super::Connection

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dbus_core::{Signature, Value};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::buf::{padded_len, OwnedBuf};
use crate::error::{Error, ErrorKind, Result};
use crate::frame::Frame;
use crate::match_rule::MatchRule;
use crate::message::serial::SerialAllocator;
use crate::message::{Message, MessageKind, Serial};
use crate::protocol::{Endianness, MAX_ARRAY_LENGTH};

pub(crate) struct Subscription {
    pub(crate) rule: MatchRule,
    pub(crate) sender: mpsc::UnboundedSender<Message>,
}

/// An opaque handle to a registered filter, returned on registration so
/// callers can deregister it without the dispatcher exposing internal
/// indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterId(u64);

/// An opaque handle to a registered export claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportId(u64);

type Filter = Box<dyn Fn(&Message) + Send + Sync>;
type Export = Box<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

/// State shared between a [`Connection`](super::Connection) handle and its
/// reader/writer tasks.
pub(crate) struct Shared {
    pub(crate) serials: SerialAllocator,
    pub(crate) pending: Mutex<HashMap<u32, oneshot::Sender<Result<Message>>>>,
    pub(crate) subscriptions: Mutex<Vec<Subscription>>,
    pub(crate) filters: Mutex<Vec<(u64, Filter)>>,
    pub(crate) exports: Mutex<Vec<(u64, Export)>>,
    pub(crate) next_handle: AtomicU64,
    pub(crate) on_disconnect: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pub(crate) incoming_calls: mpsc::UnboundedSender<Message>,
    pub(crate) outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pub(crate) endianness: Endianness,
    pub(crate) name: Mutex<Option<String>>,
    pub(crate) acquired_names: Mutex<std::collections::HashSet<String>>,
    pub(crate) closed: AtomicBool,
}

impl Shared {
    pub(crate) fn next_serial(&self) -> Serial {
        self.serials.next()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn register_pending(&self, serial: u32, sender: oneshot::Sender<Result<Message>>) {
        self.pending.lock().unwrap().insert(serial, sender);
    }

    pub(crate) fn forget_pending(&self, serial: u32) {
        self.pending.lock().unwrap().remove(&serial);
    }

    pub(crate) fn subscribe(&self, rule: MatchRule) -> mpsc::UnboundedReceiver<Message> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions.lock().unwrap().push(Subscription { rule, sender });
        receiver
    }

    /// Register an infallible observer invoked, in insertion order, on
    /// every decoded message before any other routing happens.
    pub(crate) fn add_filter(&self, filter: impl Fn(&Message) + Send + Sync + 'static) -> FilterId {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.filters.lock().unwrap().push((id, Box::new(filter)));
        FilterId(id)
    }

    pub(crate) fn remove_filter(&self, handle: FilterId) {
        self.filters.lock().unwrap().retain(|(id, _)| *id != handle.0);
    }

    /// Register a claim against incoming method calls. The closure returns
    /// `Some(reply)` (a method-return or error message) if it handles the
    /// call, `None` to let later-registered exports or the manual
    /// [`next_call`](super::Connection::next_call) path have it.
    pub(crate) fn add_export(&self, export: impl Fn(&Message) -> Option<Message> + Send + Sync + 'static) -> ExportId {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.exports.lock().unwrap().push((id, Box::new(export)));
        ExportId(id)
    }

    pub(crate) fn remove_export(&self, handle: ExportId) {
        self.exports.lock().unwrap().retain(|(id, _)| *id != handle.0);
    }

    pub(crate) fn set_on_disconnect(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_disconnect.lock().unwrap() = Some(Box::new(callback));
    }

    /// Drain the pending-reply map with `ConnectionClosed`, clear
    /// subscriptions, and invoke the `on_disconnect` callback exactly once.
    /// Idempotent: a second call (explicit `close` after the reader already
    /// observed a fatal error, or vice versa) is a no-op.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, sender) in pending {
            let _ = sender.send(Err(Error::new(ErrorKind::ConnectionClosed)));
        }
        self.subscriptions.lock().unwrap().clear();

        if let Some(callback) = self.on_disconnect.lock().unwrap().take() {
            callback();
        }
    }

    fn send_message(&self, mut message: Message) {
        let serial = self.next_serial();
        message.serial = serial.get();
        let mut buf = OwnedBuf::new();
        if message.write(&mut buf, self.endianness).is_ok() {
            let _ = self.outgoing.send(buf.as_slice().to_vec());
        }
    }

    /// Send `reply` (a method-return or error produced by an export) back
    /// to the caller of `call`, filling in the reply serial and, absent an
    /// explicit one, the destination.
    fn send_reply(&self, call: &Message, mut reply: Message) {
        match &mut reply.kind {
            MessageKind::MethodReturn { reply_serial } | MessageKind::Error { reply_serial, .. } => {
                *reply_serial = call.serial;
            }
            _ => return,
        }
        if reply.destination.is_none() {
            reply.destination = call.sender.clone();
        }
        self.send_message(reply);
    }

    fn reply_unknown_method(&self, call: &Message) {
        let MessageKind::MethodCall { path, member } = &call.kind else {
            return;
        };
        let text = format!("No such method {member} on path {path}");
        let reply = Message::error("org.freedesktop.DBus.Error.UnknownMethod", call.serial)
            .with_body(Signature::new("s").unwrap(), vec![Value::String(text)]);
        self.send_reply(call, reply);
    }

    fn dispatch_incoming(&self, message: Message) {
        for (_, filter) in self.filters.lock().unwrap().iter() {
            filter(&message);
        }

        if let Some(reply_serial) = message.reply_serial() {
            if let Some(sender) = self.pending.lock().unwrap().remove(&reply_serial) {
                let _ = sender.send(Ok(message));
            }
            return;
        }

        if matches!(message.kind, MessageKind::Signal { .. }) {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.retain(|sub| !sub.sender.is_closed());
            for sub in subscriptions.iter() {
                if sub.rule.matches(&message) {
                    let _ = sub.sender.send(message.clone());
                }
            }
            return;
        }

        if matches!(message.kind, MessageKind::MethodCall { .. }) {
            let claimed = {
                let exports = self.exports.lock().unwrap();
                exports.iter().find_map(|(_, export)| export(&message))
            };

            if let Some(reply) = claimed {
                self.send_reply(&message, reply);
                return;
            }

            if self.incoming_calls.is_closed() {
                self.reply_unknown_method(&message);
            } else {
                let _ = self.incoming_calls.send(message);
            }
        }
    }
}

pub(crate) fn spawn_writer(
    mut sink: impl AsyncWrite + Unpin + Send + 'static,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(bytes) = outgoing.recv().await {
            trace!("writing {} bytes", bytes.len());
            if let Err(error) = sink.write_all(&bytes).await {
                warn!("connection writer stopped: {error}");
                break;
            }
        }
        debug!("connection writer task exiting");
    })
}

pub(crate) fn spawn_reader(
    mut source: impl AsyncRead + Unpin + Send + 'static,
    shared: Arc<Shared>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_one_message(&mut source).await {
                Ok(message) => {
                    trace!("dispatching incoming message serial={}", message.serial);
                    shared.dispatch_incoming(message);
                }
                Err(error) => {
                    debug!("connection reader stopped: {error}");
                    break;
                }
            }
        }

        shared.shutdown();
    })
}

/// Read exactly one framed message: the fixed header tells us how long
/// the variable field array is, and the field array (once decoded) tells
/// us the body length, so this has to happen in stages.
async fn read_one_message(source: &mut (impl AsyncRead + Unpin)) -> Result<Message> {
    let mut head = vec![0u8; 16];
    source.read_exact(&mut head).await?;

    let endianness = match head[0] {
        b'l' => Endianness::LITTLE,
        b'B' => Endianness::BIG,
        _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
    };

    let body_length = <u32 as Frame>::read(&head[4..8], endianness);
    let array_length = <u32 as Frame>::read(&head[12..16], endianness);
    if array_length > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::ArrayTooLong(array_length)));
    }

    let mut fields = vec![0u8; array_length as usize];
    source.read_exact(&mut fields).await?;

    let mut full = head;
    full.extend_from_slice(&fields);

    let padded = padded_len(full.len(), 8);
    if padded > full.len() {
        let mut pad = vec![0u8; padded - full.len()];
        source.read_exact(&mut pad).await?;
        full.extend_from_slice(&pad);
    }

    let mut body = vec![0u8; body_length as usize];
    source.read_exact(&mut body).await?;
    full.extend_from_slice(&body);

    let mut buf = OwnedBuf::new();
    buf.extend_from_slice(&full);
    Message::read(&mut buf)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    fn new_shared() -> (Arc<Shared>, mpsc::UnboundedReceiver<Vec<u8>>, mpsc::UnboundedReceiver<Message>) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            serials: SerialAllocator::new(),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
            exports: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
            on_disconnect: Mutex::new(None),
            incoming_calls: incoming_tx,
            outgoing: outgoing_tx,
            endianness: Endianness::NATIVE,
            name: Mutex::new(None),
            acquired_names: Mutex::new(std::collections::HashSet::new()),
            closed: AtomicBool::new(false),
        });
        (shared, outgoing_rx, incoming_rx)
    }

    fn incoming_call(path: &str, member: &str) -> Message {
        let mut message = Message::method_call(path, member);
        message.serial = 7;
        message.sender = Some(":1.2".into());
        message
    }

    #[test]
    fn filters_observe_every_message_before_routing() {
        let (shared, _outgoing, _incoming) = new_shared();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        shared.add_filter(move |message| seen_clone.lock().unwrap().push(message.serial));

        shared.dispatch_incoming(incoming_call("/a", "M"));
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn removed_filter_stops_observing() {
        let (shared, _outgoing, _incoming) = new_shared();
        let count = Arc::new(Mutex::new(0u32));
        let count_clone = count.clone();
        let handle = shared.add_filter(move |_| *count_clone.lock().unwrap() += 1);
        shared.remove_filter(handle);

        shared.dispatch_incoming(incoming_call("/a", "M"));
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn export_claim_sends_reply_with_correlated_serial() {
        let (shared, mut outgoing, _incoming) = new_shared();
        shared.add_export(|message| {
            if let MessageKind::MethodCall { member, .. } = &message.kind {
                if member == "Ping" {
                    return Some(Message::method_return(0));
                }
            }
            None
        });

        shared.dispatch_incoming(incoming_call("/a", "Ping"));
        assert!(outgoing.try_recv().is_ok());
    }

    #[test]
    fn unclaimed_call_replies_unknown_method_when_no_one_is_listening() {
        let (shared, mut outgoing, incoming) = new_shared();
        drop(incoming);

        shared.dispatch_incoming(incoming_call("/a", "Missing"));

        let bytes = outgoing.try_recv().expect("an UnknownMethod reply should have been sent");
        let mut buf = OwnedBuf::new();
        buf.extend_from_slice(&bytes);
        let reply = Message::read(&mut buf).unwrap();
        assert!(matches!(reply.kind, MessageKind::Error { ref error_name, reply_serial }
            if error_name == "org.freedesktop.DBus.Error.UnknownMethod" && reply_serial == 7));
    }

    #[test]
    fn unclaimed_call_forwards_to_incoming_calls_when_a_receiver_is_alive() {
        let (shared, _outgoing, mut incoming) = new_shared();
        shared.dispatch_incoming(incoming_call("/a", "Missing"));
        assert!(incoming.try_recv().is_ok());
    }

    #[test]
    fn shutdown_fails_pending_replies_with_connection_closed() {
        let (shared, _outgoing, _incoming) = new_shared();
        let (sender, receiver) = oneshot::channel();
        shared.register_pending(1, sender);

        shared.shutdown();

        let result = receiver.try_recv().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn shutdown_runs_on_disconnect_exactly_once() {
        let (shared, _outgoing, _incoming) = new_shared();
        let calls = Arc::new(Mutex::new(0u32));
        let calls_clone = calls.clone();
        shared.set_on_disconnect(move || *calls_clone.lock().unwrap() += 1);

        shared.shutdown();
        shared.shutdown();

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
