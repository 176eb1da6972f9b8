use std::fmt;

/// A single D-Bus wire type, possibly nested.
///
/// This is the parsed, tree-shaped form of a signature string: `Signature`
/// owns the wire-format bytes, while `Type` is what codecs and callers
/// actually match against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    UnixFd,
    Array(Box<Type>),
    Struct(Vec<Type>),
    Variant,
    DictEntry(Box<Type>, Box<Type>),
}

impl Type {
    /// The type code used on the wire for this type's leading byte.
    ///
    /// Containers that have no single-byte code on their own (struct, dict
    /// entry) report the bracket byte that opens them.
    pub const fn code(&self) -> u8 {
        match self {
            Type::Byte => b'y',
            Type::Boolean => b'b',
            Type::Int16 => b'n',
            Type::Uint16 => b'q',
            Type::Int32 => b'i',
            Type::Uint32 => b'u',
            Type::Int64 => b'x',
            Type::Uint64 => b't',
            Type::Double => b'd',
            Type::String => b's',
            Type::ObjectPath => b'o',
            Type::Signature => b'g',
            Type::UnixFd => b'h',
            Type::Array(_) => b'a',
            Type::Struct(_) => b'(',
            Type::Variant => b'v',
            Type::DictEntry(..) => b'{',
        }
    }

    /// Whether this is one of the nine basic (non-container, non-variant)
    /// types permitted as a dict entry key.
    pub const fn is_basic(&self) -> bool {
        matches!(
            self,
            Type::Byte
                | Type::Boolean
                | Type::Int16
                | Type::Uint16
                | Type::Int32
                | Type::Uint32
                | Type::Int64
                | Type::Uint64
                | Type::Double
                | Type::String
                | Type::ObjectPath
                | Type::Signature
                | Type::UnixFd
        )
    }

    /// The alignment in bytes this type's encoding must start on.
    pub const fn alignment(&self) -> usize {
        match self {
            Type::Byte => 1,
            Type::Boolean => 4,
            Type::Int16 | Type::Uint16 => 2,
            Type::Int32 | Type::Uint32 => 4,
            Type::Int64 | Type::Uint64 => 8,
            Type::Double => 8,
            Type::String | Type::ObjectPath => 4,
            Type::Signature => 1,
            Type::UnixFd => 4,
            Type::Array(_) => 4,
            Type::Struct(_) => 8,
            Type::Variant => 1,
            Type::DictEntry(..) => 8,
        }
    }

    /// Render this type back into its signature string representation.
    pub fn to_signature_string(&self) -> String {
        let mut out = String::new();
        self.write_signature_string(&mut out);
        out
    }

    fn write_signature_string(&self, out: &mut String) {
        match self {
            Type::Array(element) => {
                out.push('a');
                element.write_signature_string(out);
            }
            Type::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write_signature_string(out);
                }
                out.push(')');
            }
            Type::DictEntry(key, value) => {
                out.push('{');
                key.write_signature_string(out);
                value.write_signature_string(out);
                out.push('}');
            }
            other => out.push(other.code() as char),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_signature_string())
    }
}
