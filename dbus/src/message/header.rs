//! The fixed 12-byte header plus the variable header field array.

use dbus_core::{Signature, Type, Value};

use crate::buf::OwnedBuf;
use crate::codec::{decode_value, encode_value};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{Endianness, Flags, HeaderField, MessageType, MAX_BODY_LENGTH};

/// The protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone)]
pub(crate) struct Header {
    pub(crate) endianness: Endianness,
    pub(crate) message_type: MessageType,
    pub(crate) flags: Flags,
    pub(crate) body_length: u32,
    pub(crate) serial: u32,
    pub(crate) path: Option<String>,
    pub(crate) interface: Option<String>,
    pub(crate) member: Option<String>,
    pub(crate) error_name: Option<String>,
    pub(crate) reply_serial: Option<u32>,
    pub(crate) destination: Option<String>,
    pub(crate) sender: Option<String>,
    pub(crate) signature: Option<String>,
    pub(crate) unix_fds: Option<u32>,
}

impl Header {
    pub(crate) fn write(&self, buf: &mut OwnedBuf) -> Result<()> {
        buf.push(self.endianness.into_byte());
        buf.push(self.message_type.into_byte());
        buf.push(self.flags.into_byte());
        buf.push(PROTOCOL_VERSION);

        write_u32(buf, self.body_length, self.endianness);
        write_u32(buf, self.serial, self.endianness);

        let mut fields = Vec::new();
        if let Some(path) = &self.path {
            fields.push(field(HeaderField::PATH, Value::ObjectPath(path.clone())));
        }
        if let Some(interface) = &self.interface {
            fields.push(field(HeaderField::INTERFACE, Value::String(interface.clone())));
        }
        if let Some(member) = &self.member {
            fields.push(field(HeaderField::MEMBER, Value::String(member.clone())));
        }
        if let Some(error_name) = &self.error_name {
            fields.push(field(HeaderField::ERROR_NAME, Value::String(error_name.clone())));
        }
        if let Some(reply_serial) = self.reply_serial {
            fields.push(field(HeaderField::REPLY_SERIAL, Value::Uint32(reply_serial)));
        }
        if let Some(destination) = &self.destination {
            fields.push(field(HeaderField::DESTINATION, Value::String(destination.clone())));
        }
        if let Some(sender) = &self.sender {
            fields.push(field(HeaderField::SENDER, Value::String(sender.clone())));
        }
        if let Some(signature) = &self.signature {
            fields.push(field(HeaderField::SIGNATURE, Value::Signature(signature.clone())));
        }
        if let Some(unix_fds) = self.unix_fds {
            fields.push(field(HeaderField::UNIX_FDS, Value::Uint32(unix_fds)));
        }

        let array = Value::Array(fields);
        let ty = Type::Array(Box::new(Type::Struct(vec![Type::Byte, Type::Variant])));
        encode_value(buf, &array, &ty, self.endianness)?;
        buf.align_write(8);

        Ok(())
    }

    /// Parse the fixed 12-byte header, returning the header and the byte
    /// length of the variable field array that follows (still unread).
    pub(crate) fn read_fixed(buf: &mut OwnedBuf) -> Result<(Self, Endianness)> {
        let endian_byte = buf.read_u8()?;
        let endianness = match endian_byte {
            b'l' => Endianness::LITTLE,
            b'B' => Endianness::BIG,
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        };

        let message_type = MessageType::new(buf.read_u8()?);
        let flags = Flags::new(buf.read_u8()?);
        let protocol_version = buf.read_u8()?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        }

        let body_length = read_u32(buf, endianness)?;
        if body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
        }
        let serial = read_u32(buf, endianness)?;
        if serial == 0 {
            return Err(Error::new(ErrorKind::ZeroSerial));
        }

        let header = Header {
            endianness,
            message_type,
            flags,
            body_length,
            serial,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: None,
            unix_fds: None,
        };

        Ok((header, endianness))
    }

    pub(crate) fn read_fields(buf: &mut OwnedBuf, mut header: Header) -> Result<Header> {
        let endianness = header.endianness;
        let ty = Type::Array(Box::new(Type::Struct(vec![Type::Byte, Type::Variant])));
        let decoded = decode_value(buf, &ty, endianness)?;

        let Value::Array(entries) = decoded else {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        };

        for entry in entries {
            let Value::Struct(mut parts) = entry else {
                return Err(Error::new(ErrorKind::InvalidProtocol));
            };
            if parts.len() != 2 {
                return Err(Error::new(ErrorKind::InvalidProtocol));
            }
            let value = parts.pop().unwrap();
            let code = parts.pop().unwrap();

            let Value::Byte(code) = code else {
                return Err(Error::new(ErrorKind::InvalidProtocol));
            };
            let Value::Variant(value) = value else {
                return Err(Error::new(ErrorKind::InvalidProtocol));
            };

            match HeaderField::new(code) {
                HeaderField::PATH => header.path = Some(expect_object_path(*value)?),
                HeaderField::INTERFACE => header.interface = Some(expect_string(*value)?),
                HeaderField::MEMBER => header.member = Some(expect_string(*value)?),
                HeaderField::ERROR_NAME => header.error_name = Some(expect_string(*value)?),
                HeaderField::REPLY_SERIAL => header.reply_serial = Some(expect_u32(*value)?),
                HeaderField::DESTINATION => header.destination = Some(expect_string(*value)?),
                HeaderField::SENDER => header.sender = Some(expect_string(*value)?),
                HeaderField::SIGNATURE => header.signature = Some(expect_signature(*value)?),
                HeaderField::UNIX_FDS => header.unix_fds = Some(expect_u32(*value)?),
                _ => {}
            }
        }

        buf.align_read(8)?;
        Ok(header)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.message_type {
            MessageType::METHOD_CALL => {
                if self.path.is_none() {
                    return Err(Error::new(ErrorKind::MissingPath));
                }
                if self.member.is_none() {
                    return Err(Error::new(ErrorKind::MissingMember));
                }
                self.forbid("reply_serial", self.reply_serial.is_some())?;
                self.forbid("error_name", self.error_name.is_some())?;
            }
            MessageType::METHOD_RETURN => {
                if self.reply_serial.is_none() {
                    return Err(Error::new(ErrorKind::MissingReplySerial));
                }
                self.forbid("member", self.member.is_some())?;
                self.forbid("error_name", self.error_name.is_some())?;
            }
            MessageType::ERROR => {
                if self.error_name.is_none() {
                    return Err(Error::new(ErrorKind::MissingErrorName));
                }
                if self.reply_serial.is_none() {
                    return Err(Error::new(ErrorKind::MissingReplySerial));
                }
                self.forbid("member", self.member.is_some())?;
            }
            MessageType::SIGNAL => {
                if self.path.is_none() {
                    return Err(Error::new(ErrorKind::MissingPath));
                }
                if self.interface.is_none() {
                    return Err(Error::new(ErrorKind::MissingInterface));
                }
                if self.member.is_none() {
                    return Err(Error::new(ErrorKind::MissingMember));
                }
                self.forbid("reply_serial", self.reply_serial.is_some())?;
                self.forbid("error_name", self.error_name.is_some())?;
            }
            _ => return Err(Error::new(ErrorKind::InvalidProtocol)),
        }

        Ok(())
    }

    fn forbid(&self, field: &'static str, present: bool) -> Result<()> {
        if present {
            return Err(Error::new(ErrorKind::ForbiddenHeaderField(field)));
        }
        Ok(())
    }

    pub(crate) fn body_signature(&self) -> Result<Signature> {
        match &self.signature {
            Some(sig) => Ok(Signature::new(sig)?),
            None => Ok(Signature::empty()),
        }
    }
}

fn field(code: HeaderField, value: Value) -> Value {
    Value::Struct(vec![Value::Byte(code.into_byte()), Value::Variant(Box::new(value))])
}

fn expect_string(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn expect_object_path(value: Value) -> Result<String> {
    match value {
        Value::ObjectPath(s) => Ok(s),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn expect_signature(value: Value) -> Result<String> {
    match value {
        Value::Signature(s) => Ok(s),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn expect_u32(value: Value) -> Result<u32> {
    match value {
        Value::Uint32(v) => Ok(v),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn write_u32(buf: &mut OwnedBuf, value: u32, endianness: Endianness) {
    let mut bytes = [0u8; 4];
    crate::frame::Frame::write(value, &mut bytes, endianness);
    buf.extend_from_slice(&bytes);
}

fn read_u32(buf: &mut OwnedBuf, endianness: Endianness) -> Result<u32> {
    let bytes = buf.read_slice(4)?;
    Ok(<u32 as crate::frame::Frame>::read(bytes, endianness))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(message_type: MessageType) -> Header {
        Header {
            endianness: Endianness::LITTLE,
            message_type,
            flags: Flags::EMPTY,
            body_length: 0,
            serial: 1,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: None,
            unix_fds: None,
        }
    }

    #[test]
    fn method_call_rejects_reply_serial() {
        let mut header = base(MessageType::METHOD_CALL);
        header.path = Some("/a".into());
        header.member = Some("M".into());
        header.reply_serial = Some(1);
        assert!(header.validate().is_err());
    }

    #[test]
    fn method_call_rejects_error_name() {
        let mut header = base(MessageType::METHOD_CALL);
        header.path = Some("/a".into());
        header.member = Some("M".into());
        header.error_name = Some("org.example.Error".into());
        assert!(header.validate().is_err());
    }

    #[test]
    fn method_return_rejects_member_and_error_name() {
        let mut header = base(MessageType::METHOD_RETURN);
        header.reply_serial = Some(1);
        header.member = Some("M".into());
        assert!(header.validate().is_err());

        let mut header = base(MessageType::METHOD_RETURN);
        header.reply_serial = Some(1);
        header.error_name = Some("org.example.Error".into());
        assert!(header.validate().is_err());
    }

    #[test]
    fn error_rejects_member() {
        let mut header = base(MessageType::ERROR);
        header.error_name = Some("org.example.Error".into());
        header.reply_serial = Some(1);
        header.member = Some("M".into());
        assert!(header.validate().is_err());
    }

    #[test]
    fn signal_rejects_reply_serial_and_error_name() {
        let mut header = base(MessageType::SIGNAL);
        header.path = Some("/a".into());
        header.interface = Some("org.example.Foo".into());
        header.member = Some("M".into());
        header.reply_serial = Some(1);
        assert!(header.validate().is_err());
    }

    #[test]
    fn well_formed_messages_validate() {
        let mut header = base(MessageType::METHOD_CALL);
        header.path = Some("/a".into());
        header.member = Some("M".into());
        header.validate().unwrap();
    }
}
