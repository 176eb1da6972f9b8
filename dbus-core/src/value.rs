use crate::error::TypeError;
use crate::ty::Type;

/// An owned D-Bus value tree.
///
/// This is the dynamic counterpart to [`Type`]: a codec decodes a message
/// body into a sequence of `Value`s guided by the body's [`Signature`], and
/// callers build `Value`s to encode one.
///
/// [`Signature`]: crate::Signature
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    ObjectPath(String),
    Signature(String),
    UnixFd(u32),
    Array(Vec<Value>),
    Struct(Vec<Value>),
    Variant(Box<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    /// Compute the [`Type`] this value would have on the wire.
    ///
    /// For an empty array or dict this can't be known from the value alone;
    /// callers that need a signature for an empty container should carry
    /// the `Type` alongside, e.g. via [`Value::typecheck`] against an
    /// expected type rather than round-tripping through `ty()`.
    pub fn ty(&self) -> Option<Type> {
        Some(match self {
            Value::Byte(_) => Type::Byte,
            Value::Boolean(_) => Type::Boolean,
            Value::Int16(_) => Type::Int16,
            Value::Uint16(_) => Type::Uint16,
            Value::Int32(_) => Type::Int32,
            Value::Uint32(_) => Type::Uint32,
            Value::Int64(_) => Type::Int64,
            Value::Uint64(_) => Type::Uint64,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::ObjectPath(_) => Type::ObjectPath,
            Value::Signature(_) => Type::Signature,
            Value::UnixFd(_) => Type::UnixFd,
            Value::Variant(_) => Type::Variant,
            Value::Array(items) => Type::Array(Box::new(items.first()?.ty()?)),
            Value::Struct(fields) => {
                let mut tys = Vec::with_capacity(fields.len());
                for field in fields {
                    tys.push(field.ty()?);
                }
                Type::Struct(tys)
            }
            Value::Dict(entries) => {
                let (k, v) = entries.first()?;
                Type::Array(Box::new(Type::DictEntry(Box::new(k.ty()?), Box::new(v.ty()?))))
            }
        })
    }

    /// Verify that this value conforms to `ty`, recursing into containers.
    pub fn typecheck(&self, ty: &Type) -> Result<(), TypeError> {
        match (self, ty) {
            (Value::Byte(_), Type::Byte)
            | (Value::Boolean(_), Type::Boolean)
            | (Value::Int16(_), Type::Int16)
            | (Value::Uint16(_), Type::Uint16)
            | (Value::Int32(_), Type::Int32)
            | (Value::Uint32(_), Type::Uint32)
            | (Value::Int64(_), Type::Int64)
            | (Value::Uint64(_), Type::Uint64)
            | (Value::Double(_), Type::Double)
            | (Value::String(_), Type::String)
            | (Value::ObjectPath(_), Type::ObjectPath)
            | (Value::Signature(_), Type::Signature)
            | (Value::UnixFd(_), Type::UnixFd)
            | (Value::Variant(_), Type::Variant) => Ok(()),
            (Value::Array(items), Type::Array(element)) => {
                for item in items {
                    item.typecheck(element)?;
                }
                Ok(())
            }
            (Value::Struct(fields), Type::Struct(tys)) => {
                if fields.len() != tys.len() {
                    return Err(TypeError::new(format!(
                        "struct has {} fields but type expects {}",
                        fields.len(),
                        tys.len()
                    )));
                }
                for (field, ty) in fields.iter().zip(tys) {
                    field.typecheck(ty)?;
                }
                Ok(())
            }
            (Value::Dict(entries), Type::Array(element)) => {
                let Type::DictEntry(key_ty, value_ty) = element.as_ref() else {
                    return Err(TypeError::new("dict value used against a non-dict array type"));
                };
                for (key, value) in entries {
                    key.typecheck(key_ty)?;
                    value.typecheck(value_ty)?;
                }
                Ok(())
            }
            (value, ty) => Err(TypeError::new(format!(
                "value {value:?} does not match type {ty}"
            ))),
        }
    }

}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Uint16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_typecheck_passes() {
        Value::Uint32(7).typecheck(&Type::Uint32).unwrap();
    }

    #[test]
    fn basic_typecheck_fails_on_mismatch() {
        assert!(Value::Uint32(7).typecheck(&Type::String).is_err());
    }

    #[test]
    fn struct_typecheck_recurses() {
        let value = Value::Struct(vec![Value::String("a".into()), Value::Int32(1)]);
        value
            .typecheck(&Type::Struct(vec![Type::String, Type::Int32]))
            .unwrap();
    }

    #[test]
    fn dict_typecheck() {
        let value = Value::Dict(vec![(Value::String("k".into()), Value::Int32(1))]);
        let ty = Type::Array(Box::new(Type::DictEntry(
            Box::new(Type::String),
            Box::new(Type::Int32),
        )));
        value.typecheck(&ty).unwrap();
    }

    #[test]
    fn ty_of_nonempty_array() {
        let value = Value::Array(vec![Value::Byte(1), Value::Byte(2)]);
        assert_eq!(value.ty(), Some(Type::Array(Box::new(Type::Byte))));
    }
}
