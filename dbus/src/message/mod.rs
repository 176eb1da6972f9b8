//! Whole messages: header plus body, and the high level [`MessageKind`]
//! view of a header's required fields.

mod header;
pub(crate) mod serial;

use dbus_core::{Signature, Value};

pub use self::serial::Serial;
use self::header::Header;

use crate::buf::OwnedBuf;
use crate::codec::{decode_value, encode_value};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Endianness, Flags, MessageType, MAX_MESSAGE_LENGTH};

/// What a message is, keyed off the fixed header's message type together
/// with the fields each type requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    MethodCall { path: String, member: String },
    MethodReturn { reply_serial: u32 },
    Error { error_name: String, reply_serial: u32 },
    Signal { path: String, member: String },
}

/// A fully decoded D-Bus message.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub serial: u32,
    pub flags: Flags,
    pub interface: Option<String>,
    pub destination: Option<String>,
    pub sender: Option<String>,
    pub signature: Signature,
    pub body: Vec<Value>,
}

impl Message {
    pub fn method_call(path: impl Into<String>, member: impl Into<String>) -> Message {
        Message {
            kind: MessageKind::MethodCall { path: path.into(), member: member.into() },
            serial: 0,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: Signature::empty(),
            body: Vec::new(),
        }
    }

    pub fn signal(path: impl Into<String>, interface: impl Into<String>, member: impl Into<String>) -> Message {
        Message {
            kind: MessageKind::Signal { path: path.into(), member: member.into() },
            serial: 0,
            flags: Flags::EMPTY,
            interface: Some(interface.into()),
            destination: None,
            sender: None,
            signature: Signature::empty(),
            body: Vec::new(),
        }
    }

    pub fn method_return(reply_serial: u32) -> Message {
        Message {
            kind: MessageKind::MethodReturn { reply_serial },
            serial: 0,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: Signature::empty(),
            body: Vec::new(),
        }
    }

    pub fn error(error_name: impl Into<String>, reply_serial: u32) -> Message {
        Message {
            kind: MessageKind::Error { error_name: error_name.into(), reply_serial },
            serial: 0,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: Signature::empty(),
            body: Vec::new(),
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_body(mut self, signature: Signature, body: Vec<Value>) -> Self {
        self.signature = signature;
        self.body = body;
        self
    }

    pub fn reply_serial(&self) -> Option<u32> {
        match &self.kind {
            MessageKind::MethodReturn { reply_serial } | MessageKind::Error { reply_serial, .. } => {
                Some(*reply_serial)
            }
            _ => None,
        }
    }

    pub(crate) fn write(&self, buf: &mut OwnedBuf, endianness: Endianness) -> Result<()> {
        let mut body_buf = OwnedBuf::new();
        let types = self.signature.types();
        if types.len() != self.body.len() {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        }
        for (value, ty) in self.body.iter().zip(types) {
            encode_value(&mut body_buf, value, ty, endianness)?;
        }

        if body_buf.len() as u64 > crate::protocol::MAX_BODY_LENGTH as u64 {
            return Err(Error::new(ErrorKind::BodyTooLong(body_buf.len() as u32)));
        }

        let (message_type, path, member, error_name, reply_serial) = match &self.kind {
            MessageKind::MethodCall { path, member } => {
                (MessageType::METHOD_CALL, Some(path.clone()), Some(member.clone()), None, None)
            }
            MessageKind::MethodReturn { reply_serial } => {
                (MessageType::METHOD_RETURN, None, None, None, Some(*reply_serial))
            }
            MessageKind::Error { error_name, reply_serial } => {
                (MessageType::ERROR, None, None, Some(error_name.clone()), Some(*reply_serial))
            }
            MessageKind::Signal { path, member } => {
                (MessageType::SIGNAL, Some(path.clone()), Some(member.clone()), None, None)
            }
        };

        let header = Header {
            endianness,
            message_type,
            flags: self.flags,
            body_length: body_buf.len() as u32,
            serial: self.serial,
            path,
            interface: self.interface.clone(),
            member,
            error_name,
            reply_serial,
            destination: self.destination.clone(),
            sender: self.sender.clone(),
            signature: if self.signature.as_str().is_empty() {
                None
            } else {
                Some(self.signature.as_str().to_owned())
            },
            unix_fds: None,
        };

        header.write(buf)?;
        buf.extend_from_slice(body_buf.as_slice());

        if buf.len() as u64 > MAX_MESSAGE_LENGTH as u64 {
            return Err(Error::new(ErrorKind::MessageTooLong));
        }

        Ok(())
    }

    /// Decode a message whose fixed 12-byte header has already told the
    /// caller how many more bytes (`body_length` plus the field array) to
    /// read into `buf` before calling this.
    pub(crate) fn read(buf: &mut OwnedBuf) -> Result<Message> {
        let (partial, endianness) = Header::read_fixed(buf)?;
        let header = Header::read_fields(buf, partial)?;
        header.validate()?;

        let signature = header.body_signature()?;
        let mut body = Vec::with_capacity(signature.types().len());
        for ty in signature.types() {
            body.push(decode_value(buf, ty, endianness)?);
        }

        let kind = match header.message_type {
            MessageType::METHOD_CALL => MessageKind::MethodCall {
                path: header.path.unwrap(),
                member: header.member.unwrap(),
            },
            MessageType::METHOD_RETURN => MessageKind::MethodReturn {
                reply_serial: header.reply_serial.unwrap(),
            },
            MessageType::ERROR => MessageKind::Error {
                error_name: header.error_name.unwrap(),
                reply_serial: header.reply_serial.unwrap(),
            },
            MessageType::SIGNAL => MessageKind::Signal {
                path: header.path.unwrap(),
                member: header.member.unwrap(),
            },
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };

        Ok(Message {
            kind,
            serial: header.serial,
            flags: header.flags,
            interface: header.interface,
            destination: header.destination,
            sender: header.sender,
            signature,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_method_call() {
        let message = Message::method_call("/org/example/Foo", "Bar")
            .with_interface("org.example.Foo")
            .with_destination("org.example.Service")
            .with_body(Signature::new("su").unwrap(), vec![Value::String("hi".into()), Value::Uint32(7)]);
        let mut message = message;
        message.serial = 1;

        let mut buf = OwnedBuf::new();
        message.write(&mut buf, Endianness::LITTLE).unwrap();
        buf.set_position(0);

        let decoded = Message::read(&mut buf).unwrap();
        assert_eq!(decoded.kind, MessageKind::MethodCall {
            path: "/org/example/Foo".into(),
            member: "Bar".into(),
        });
        assert_eq!(decoded.interface.as_deref(), Some("org.example.Foo"));
        assert_eq!(decoded.body, vec![Value::String("hi".into()), Value::Uint32(7)]);
    }

    #[test]
    fn encodes_and_decodes_signal() {
        let mut message = Message::signal("/org/example/Foo", "org.example.Foo", "Changed");
        message.serial = 5;

        let mut buf = OwnedBuf::new();
        message.write(&mut buf, Endianness::BIG).unwrap();
        buf.set_position(0);

        let decoded = Message::read(&mut buf).unwrap();
        assert_eq!(decoded.kind, MessageKind::Signal {
            path: "/org/example/Foo".into(),
            member: "Changed".into(),
        });
    }

    #[test]
    fn method_return_requires_reply_serial() {
        let mut message = Message::method_return(0);
        message.serial = 2;
        let mut buf = OwnedBuf::new();
        // zero reply_serial is still a present field; validate() only checks presence.
        message.write(&mut buf, Endianness::LITTLE).unwrap();
    }
}
