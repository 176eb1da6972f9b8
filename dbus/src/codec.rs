//! Encodes and decodes [`Value`] trees against a [`Type`], honoring D-Bus
//! alignment rules and a message's chosen byte order.

use dbus_core::{Signature, Type, Value};

use crate::buf::OwnedBuf;
use crate::error::{Error, ErrorKind, Result};
use crate::frame::Frame;
use crate::protocol::{Endianness, MAX_ARRAY_LENGTH};

pub(crate) fn encode_value(buf: &mut OwnedBuf, value: &Value, ty: &Type, endianness: Endianness) -> Result<()> {
    value.typecheck(ty)?;
    encode_checked(buf, value, ty, endianness)
}

fn encode_checked(buf: &mut OwnedBuf, value: &Value, ty: &Type, endianness: Endianness) -> Result<()> {
    buf.align_write(ty.alignment());

    match (value, ty) {
        (Value::Byte(v), Type::Byte) => buf.write_u8(*v),
        (Value::Boolean(v), Type::Boolean) => write_frame(buf, if *v { 1u32 } else { 0u32 }, endianness),
        (Value::Int16(v), Type::Int16) => write_frame(buf, *v, endianness),
        (Value::Uint16(v), Type::Uint16) => write_frame(buf, *v, endianness),
        (Value::Int32(v), Type::Int32) => write_frame(buf, *v, endianness),
        (Value::Uint32(v), Type::Uint32) => write_frame(buf, *v, endianness),
        (Value::Int64(v), Type::Int64) => write_frame(buf, *v, endianness),
        (Value::Uint64(v), Type::Uint64) => write_frame(buf, *v, endianness),
        (Value::Double(v), Type::Double) => write_frame(buf, *v, endianness),
        (Value::UnixFd(v), Type::UnixFd) => write_frame(buf, *v, endianness),
        (Value::String(s), Type::String) => write_string(buf, s, endianness),
        (Value::ObjectPath(s), Type::ObjectPath) => write_string(buf, s, endianness),
        (Value::Signature(s), Type::Signature) => write_signature_str(buf, s),
        (Value::Array(items), Type::Array(element)) => encode_array(buf, items, element, endianness),
        (Value::Dict(entries), Type::Array(element)) => {
            let Type::DictEntry(key_ty, value_ty) = element.as_ref() else {
                return Err(Error::new(ErrorKind::InvalidProtocol));
            };
            encode_dict(buf, entries, key_ty, value_ty, endianness)
        }
        (Value::Struct(fields), Type::Struct(tys)) => {
            for (field, ty) in fields.iter().zip(tys) {
                encode_checked(buf, field, ty, endianness)?;
            }
            Ok(())
        }
        (Value::Variant(inner), Type::Variant) => encode_variant(buf, inner, endianness),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn write_frame<T: Frame>(buf: &mut OwnedBuf, value: T, endianness: Endianness) {
    let mut bytes = [0u8; 8];
    value.write(&mut bytes[..T::SIZE], endianness);
    buf.extend_from_slice(&bytes[..T::SIZE]);
}

fn write_string(buf: &mut OwnedBuf, s: &str, endianness: Endianness) -> Result<()> {
    write_frame(buf, s.len() as u32, endianness);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_signature_str(buf: &mut OwnedBuf, s: &str) -> Result<()> {
    if s.len() > 255 {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    }
    buf.write_u8(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn encode_array(buf: &mut OwnedBuf, items: &[Value], element: &Type, endianness: Endianness) -> Result<()> {
    write_frame(buf, 0u32, endianness);
    let length_pos = buf.len() - 4;

    buf.align_write(element.alignment());
    let body_start = buf.len();

    for item in items {
        encode_checked(buf, item, element, endianness)?;
    }

    let body_len = buf.len() - body_start;
    if body_len as u64 > MAX_ARRAY_LENGTH as u64 {
        return Err(Error::new(ErrorKind::ArrayTooLong(body_len as u32)));
    }

    patch_u32(buf, length_pos, body_len as u32, endianness);
    Ok(())
}

fn encode_dict(
    buf: &mut OwnedBuf,
    entries: &[(Value, Value)],
    key_ty: &Type,
    value_ty: &Type,
    endianness: Endianness,
) -> Result<()> {
    write_frame(buf, 0u32, endianness);
    let length_pos = buf.len() - 4;

    buf.align_write(8);
    let body_start = buf.len();

    for (key, value) in entries {
        buf.align_write(8);
        encode_checked(buf, key, key_ty, endianness)?;
        encode_checked(buf, value, value_ty, endianness)?;
    }

    let body_len = buf.len() - body_start;
    if body_len as u64 > MAX_ARRAY_LENGTH as u64 {
        return Err(Error::new(ErrorKind::ArrayTooLong(body_len as u32)));
    }

    patch_u32(buf, length_pos, body_len as u32, endianness);
    Ok(())
}

fn patch_u32(buf: &mut OwnedBuf, pos: usize, value: u32, endianness: Endianness) {
    let mut bytes = [0u8; 4];
    value.write(&mut bytes, endianness);
    buf.patch(pos, &bytes);
}

fn encode_variant(buf: &mut OwnedBuf, inner: &Value, endianness: Endianness) -> Result<()> {
    let ty = inner
        .ty()
        .ok_or_else(|| Error::new(ErrorKind::InvalidProtocol))?;
    write_signature_str(buf, &ty.to_signature_string())?;
    encode_checked(buf, inner, &ty, endianness)
}

pub(crate) fn decode_value(buf: &mut OwnedBuf, ty: &Type, endianness: Endianness) -> Result<Value> {
    buf.align_read(ty.alignment())?;

    Ok(match ty {
        Type::Byte => Value::Byte(buf.read_u8()?),
        Type::Boolean => Value::Boolean(read_frame::<u32>(buf, endianness)? != 0),
        Type::Int16 => Value::Int16(read_frame(buf, endianness)?),
        Type::Uint16 => Value::Uint16(read_frame(buf, endianness)?),
        Type::Int32 => Value::Int32(read_frame(buf, endianness)?),
        Type::Uint32 => Value::Uint32(read_frame(buf, endianness)?),
        Type::Int64 => Value::Int64(read_frame(buf, endianness)?),
        Type::Uint64 => Value::Uint64(read_frame(buf, endianness)?),
        Type::Double => Value::Double(read_frame(buf, endianness)?),
        Type::UnixFd => Value::UnixFd(read_frame(buf, endianness)?),
        Type::String => Value::String(read_string(buf, endianness)?),
        Type::ObjectPath => Value::ObjectPath(read_string(buf, endianness)?),
        Type::Signature => Value::Signature(read_signature_str(buf)?),
        Type::Array(element) => decode_array(buf, element, endianness)?,
        Type::Struct(tys) => {
            let mut fields = Vec::with_capacity(tys.len());
            for ty in tys {
                fields.push(decode_value(buf, ty, endianness)?);
            }
            Value::Struct(fields)
        }
        Type::Variant => decode_variant(buf, endianness)?,
        Type::DictEntry(..) => return Err(Error::new(ErrorKind::InvalidProtocol)),
    })
}

fn read_frame<T: Frame>(buf: &mut OwnedBuf, endianness: Endianness) -> Result<T> {
    let bytes = buf.read_slice(T::SIZE)?;
    Ok(T::read(bytes, endianness))
}

fn read_string(buf: &mut OwnedBuf, endianness: Endianness) -> Result<String> {
    let len = read_frame::<u32>(buf, endianness)? as usize;
    let bytes = buf.read_slice(len)?.to_vec();
    let nul = buf.read_u8()?;
    if nul != 0 {
        return Err(Error::new(ErrorKind::NotNullTerminated));
    }
    String::from_utf8(bytes).map_err(|error| error.utf8_error().into())
}

fn read_signature_str(buf: &mut OwnedBuf) -> Result<String> {
    let len = buf.read_u8()? as usize;
    let bytes = buf.read_slice(len)?.to_vec();
    let nul = buf.read_u8()?;
    if nul != 0 {
        return Err(Error::new(ErrorKind::NotNullTerminated));
    }
    let s = String::from_utf8(bytes).map_err(|error| Error::from(error.utf8_error()))?;
    Signature::new(&s)?;
    Ok(s)
}

fn decode_array(buf: &mut OwnedBuf, element: &Type, endianness: Endianness) -> Result<Value> {
    let byte_len = read_frame::<u32>(buf, endianness)?;
    if byte_len > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::ArrayTooLong(byte_len)));
    }

    buf.align_read(element.alignment())?;
    let end = buf.position() + byte_len as usize;

    if let Type::DictEntry(key_ty, value_ty) = element {
        let mut entries = Vec::new();
        while buf.position() < end {
            buf.align_read(8)?;
            let key = decode_value(buf, key_ty, endianness)?;
            let value = decode_value(buf, value_ty, endianness)?;
            entries.push((key, value));
        }
        return Ok(Value::Dict(entries));
    }

    let mut items = Vec::new();
    while buf.position() < end {
        items.push(decode_value(buf, element, endianness)?);
    }
    Ok(Value::Array(items))
}

fn decode_variant(buf: &mut OwnedBuf, endianness: Endianness) -> Result<Value> {
    let sig = read_signature_str(buf)?;
    let signature = Signature::new(&sig)?;
    let ty = signature
        .single()
        .ok_or_else(|| Error::new(ErrorKind::InvalidProtocol))?;
    let value = decode_value(buf, ty, endianness)?;
    Ok(Value::Variant(Box::new(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value, ty: Type, endianness: Endianness) -> Value {
        let mut buf = OwnedBuf::new();
        encode_value(&mut buf, &value, &ty, endianness).unwrap();
        decode_value(&mut buf, &ty, endianness).unwrap()
    }

    #[test]
    fn round_trips_scalars_both_endian() {
        for endianness in [Endianness::LITTLE, Endianness::BIG] {
            assert_eq!(roundtrip(Value::Uint32(0xdead_beef), Type::Uint32, endianness), Value::Uint32(0xdead_beef));
            assert_eq!(roundtrip(Value::Int64(-42), Type::Int64, endianness), Value::Int64(-42));
            assert_eq!(roundtrip(Value::Double(1.5), Type::Double, endianness), Value::Double(1.5));
        }
    }

    #[test]
    fn round_trips_string() {
        let value = Value::String("hello".into());
        assert_eq!(roundtrip(value.clone(), Type::String, Endianness::LITTLE), value);
    }

    #[test]
    fn array_alignment_is_honored() {
        let ty = Type::Struct(vec![Type::Byte, Type::Array(Box::new(Type::Int64))]);
        let value = Value::Struct(vec![Value::Byte(1), Value::Array(vec![Value::Int64(7)])]);
        let mut buf = OwnedBuf::new();
        encode_value(&mut buf, &value, &ty, Endianness::LITTLE).unwrap();
        // byte(1) + 3 pad + array-len(4) + 4 pad to 8-align element + 8 byte element.
        assert_eq!(buf.len(), 1 + 3 + 4 + 4 + 8);
        let decoded = decode_value(&mut { let mut b = buf.clone(); b.set_position(0); b }, &ty, Endianness::LITTLE).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trips_dict() {
        let value = Value::Dict(vec![(Value::String("k".into()), Value::Int32(1))]);
        let ty = Type::Array(Box::new(Type::DictEntry(Box::new(Type::String), Box::new(Type::Int32))));
        assert_eq!(roundtrip(value.clone(), ty, Endianness::LITTLE), value);
    }

    #[test]
    fn round_trips_variant() {
        let value = Value::Variant(Box::new(Value::Uint32(9)));
        assert_eq!(roundtrip(value.clone(), Type::Variant, Endianness::LITTLE), value);
    }
}
