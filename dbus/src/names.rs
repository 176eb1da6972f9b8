//! Validated string types for the names that appear in D-Bus messages:
//! object paths, bus names, interfaces, members and error names.

use std::fmt;

use crate::error::{Error, ErrorKind};

const MAX_NAME_LENGTH: usize = 255;

/// An object path such as `/org/freedesktop/DBus`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        if !validate_object_path(path.as_bytes()) {
            return Err(Error::new(ErrorKind::InvalidObjectPath(path)));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn root() -> Self {
        Self("/".to_owned())
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

const fn validate_object_path(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes[0] != b'/' {
        return false;
    }

    if bytes.len() == 1 {
        return true;
    }

    let mut i = 1;
    let mut component_len = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'/' {
            if component_len == 0 {
                return false;
            }
            component_len = 0;
        } else if b.is_ascii_alphanumeric() || b == b'_' {
            component_len += 1;
        } else {
            return false;
        }

        i += 1;
    }

    component_len != 0
}

macro_rules! validated_name {
    ($(#[$meta:meta])* $name:ident, $err:ident, $validate:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, Error> {
                let value = value.into();
                if !$validate(&value) {
                    return Err(Error::new(ErrorKind::$err(value)));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

validated_name!(
    /// A bus name: a well-known name like `org.freedesktop.DBus`, or a
    /// unique connection name like `:1.42`.
    BusName,
    InvalidBusName,
    validate_bus_name
);

validated_name!(
    /// An interface name, e.g. `org.freedesktop.DBus.Properties`.
    InterfaceName,
    InvalidInterfaceName,
    validate_interface_name
);

validated_name!(
    /// A method or signal member name, e.g. `RequestName`.
    MemberName,
    InvalidMemberName,
    validate_member_name
);

validated_name!(
    /// An error name, following the same grammar as an interface name.
    ErrorName,
    InvalidErrorName,
    validate_interface_name
);

fn validate_bus_name(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_NAME_LENGTH {
        return false;
    }

    if let Some(unique) = value.strip_prefix(':') {
        return unique
            .split('.')
            .all(|element| !element.is_empty() && element.bytes().all(is_name_char));
    }

    let elements: Vec<&str> = value.split('.').collect();
    if elements.len() < 2 {
        return false;
    }

    elements.iter().all(|element| {
        !element.is_empty()
            && !element.as_bytes()[0].is_ascii_digit()
            && element.bytes().all(is_name_char)
    })
}

fn validate_interface_name(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_NAME_LENGTH {
        return false;
    }

    let elements: Vec<&str> = value.split('.').collect();
    if elements.len() < 2 {
        return false;
    }

    elements.iter().all(|element| {
        !element.is_empty()
            && !element.as_bytes()[0].is_ascii_digit()
            && element.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

fn validate_member_name(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_NAME_LENGTH {
        return false;
    }

    if value.contains('.') {
        return false;
    }

    !value.as_bytes()[0].is_ascii_digit()
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_root() {
        assert!(ObjectPath::new("/").is_ok());
    }

    #[test]
    fn object_path_rejects_trailing_slash() {
        assert!(ObjectPath::new("/foo/").is_err());
    }

    #[test]
    fn object_path_rejects_empty_component() {
        assert!(ObjectPath::new("/foo//bar").is_err());
    }

    #[test]
    fn object_path_accepts_nested() {
        assert!(ObjectPath::new("/org/freedesktop/DBus").is_ok());
    }

    #[test]
    fn bus_name_requires_dot() {
        assert!(BusName::new("org.freedesktop.DBus").is_ok());
        assert!(BusName::new("nodot").is_err());
    }

    #[test]
    fn bus_name_unique_allows_leading_digit() {
        assert!(BusName::new(":1.42").is_ok());
    }

    #[test]
    fn interface_name_rejects_leading_digit_element() {
        assert!(InterfaceName::new("org.1foo").is_err());
    }

    #[test]
    fn member_name_rejects_dots() {
        assert!(MemberName::new("Foo.Bar").is_err());
        assert!(MemberName::new("RequestName").is_ok());
    }
}
