//! Match rules: the filter language used by `AddMatch` and, independently,
//! to route incoming signals to local subscribers.

use std::collections::BTreeMap;

use dbus_core::Value;

use crate::message::{Message, MessageKind};

/// A builder for the match rule string sent to `org.freedesktop.DBus`'s
/// `AddMatch`/`RemoveMatch`, also usable directly as an in-process filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub message_type: Option<&'static str>,
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub path: Option<String>,
    pub path_namespace: Option<String>,
    pub destination: Option<String>,
    /// `argN` keys: the N-th body element must be a string equal to the value.
    pub arg: BTreeMap<u8, String>,
    /// `argNpath` keys: the N-th body element must be a string or object
    /// path that is a path-prefix match (or exact match) of the value.
    pub arg_path: BTreeMap<u8, String>,
    /// `arg0namespace`: the 0th body element must be a bus name equal to,
    /// or a namespace prefix (`name.`) of, the value.
    pub arg0namespace: Option<String>,
}

impl MatchRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal() -> Self {
        Self { message_type: Some("signal"), ..Self::default() }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_path_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.path_namespace = Some(namespace.into());
        self
    }

    /// Match the N-th body element (must be a string) against `value`.
    pub fn with_arg(mut self, n: u8, value: impl Into<String>) -> Self {
        self.arg.insert(n, value.into());
        self
    }

    /// Match the N-th body element as a path-prefix of `value`.
    pub fn with_arg_path(mut self, n: u8, value: impl Into<String>) -> Self {
        self.arg_path.insert(n, value.into());
        self
    }

    pub fn with_arg0namespace(mut self, namespace: impl Into<String>) -> Self {
        self.arg0namespace = Some(namespace.into());
        self
    }

    /// Render the rule as the comma-joined `key='value'` string `AddMatch`
    /// expects. Embedded single quotes are escaped as `\'`, matching the
    /// quoting rules the bus daemon's match-rule parser accepts.
    pub fn to_match_string(&self) -> String {
        let mut parts = Vec::new();

        if let Some(ty) = self.message_type {
            parts.push(format!("type='{}'", escape_quote(ty)));
        }
        if let Some(sender) = &self.sender {
            parts.push(format!("sender='{}'", escape_quote(sender)));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{}'", escape_quote(interface)));
        }
        if let Some(member) = &self.member {
            parts.push(format!("member='{}'", escape_quote(member)));
        }
        if let Some(path) = &self.path {
            parts.push(format!("path='{}'", escape_quote(path)));
        }
        if let Some(namespace) = &self.path_namespace {
            parts.push(format!("path_namespace='{}'", escape_quote(namespace)));
        }
        if let Some(destination) = &self.destination {
            parts.push(format!("destination='{}'", escape_quote(destination)));
        }
        for (n, value) in &self.arg {
            parts.push(format!("arg{n}='{}'", escape_quote(value)));
        }
        for (n, value) in &self.arg_path {
            parts.push(format!("arg{n}path='{}'", escape_quote(value)));
        }
        if let Some(namespace) = &self.arg0namespace {
            parts.push(format!("arg0namespace='{}'", escape_quote(namespace)));
        }

        parts.join(",")
    }

    /// Whether `message` matches this rule, used to route messages to the
    /// right local subscriber without waiting on the bus daemon.
    pub fn matches(&self, message: &Message) -> bool {
        if self.message_type == Some("signal") && !matches!(message.kind, MessageKind::Signal { .. }) {
            return false;
        }

        if let Some(sender) = &self.sender {
            if message.sender.as_deref() != Some(sender.as_str()) {
                return false;
            }
        }

        if let Some(interface) = &self.interface {
            if message.interface.as_deref() != Some(interface.as_str()) {
                return false;
            }
        }

        match &message.kind {
            MessageKind::Signal { path, member } | MessageKind::MethodCall { path, member } => {
                if let Some(expected) = &self.member {
                    if member != expected {
                        return false;
                    }
                }
                if let Some(expected) = &self.path {
                    if path != expected {
                        return false;
                    }
                }
                if let Some(namespace) = &self.path_namespace {
                    if !(path == namespace || path.starts_with(&format!("{namespace}/"))) {
                        return false;
                    }
                }
            }
            _ => {}
        }

        for (&n, expected) in &self.arg {
            match body_str(&message.body, n) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }

        for (&n, expected) in &self.arg_path {
            match body_str(&message.body, n) {
                Some(actual) if path_prefix_matches(actual, expected) => {}
                _ => return false,
            }
        }

        if let Some(namespace) = &self.arg0namespace {
            match body_str(&message.body, 0) {
                Some(actual) if actual == namespace || actual.starts_with(&format!("{namespace}.")) => {}
                _ => return false,
            }
        }

        true
    }
}

/// The N-th body element as a string, if it is one (string or object path).
fn body_str(body: &[Value], n: u8) -> Option<&str> {
    match body.get(n as usize)? {
        Value::String(s) | Value::ObjectPath(s) => Some(s.as_str()),
        _ => None,
    }
}

fn path_prefix_matches(actual: &str, expected: &str) -> bool {
    actual == expected
        || actual.strip_suffix('/').map(|stripped| stripped == expected).unwrap_or(false)
        || expected.strip_suffix('/').map(|stripped| stripped == actual).unwrap_or(false)
        || actual.starts_with(&format!("{expected}/"))
        || expected.starts_with(&format!("{actual}/"))
}

fn escape_quote(value: &str) -> String {
    value.replace('\'', r"\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_match_string() {
        let rule = MatchRule::signal().with_interface("org.example.Foo").with_member("Changed");
        assert_eq!(rule.to_match_string(), "type='signal',interface='org.example.Foo',member='Changed'");
    }

    #[test]
    fn matches_signal_by_interface_and_member() {
        let rule = MatchRule::signal().with_interface("org.example.Foo").with_member("Changed");
        let mut message = Message::signal("/org/example/Foo", "org.example.Foo", "Changed");
        message.serial = 1;
        assert!(rule.matches(&message));

        let mut other = Message::signal("/org/example/Foo", "org.example.Foo", "Other");
        other.serial = 2;
        assert!(!rule.matches(&other));
    }

    #[test]
    fn path_namespace_matches_prefix() {
        let rule = MatchRule::signal().with_path_namespace("/org/example");
        let mut message = Message::signal("/org/example/Foo", "org.example.Foo", "Changed");
        message.serial = 1;
        assert!(rule.matches(&message));
    }

    #[test]
    fn escapes_single_quotes_in_rendered_values() {
        let rule = MatchRule::signal().with_sender("org.ex'ample");
        assert_eq!(rule.to_match_string(), r"type='signal',sender='org.ex\'ample'");
    }

    #[test]
    fn arg_matches_string_body_element() {
        use dbus_core::{Signature, Value};

        let rule = MatchRule::signal().with_arg(0, "hello");
        let mut message = Message::signal("/org/example/Foo", "org.example.Foo", "Changed")
            .with_body(Signature::new("s").unwrap(), vec![Value::String("hello".into())]);
        message.serial = 1;
        assert!(rule.matches(&message));

        let mut other = Message::signal("/org/example/Foo", "org.example.Foo", "Changed")
            .with_body(Signature::new("s").unwrap(), vec![Value::String("goodbye".into())]);
        other.serial = 2;
        assert!(!rule.matches(&other));
    }

    #[test]
    fn arg0namespace_matches_prefix() {
        use dbus_core::{Signature, Value};

        let rule = MatchRule::signal().with_arg0namespace("org.example");
        let mut message = Message::signal("/org/example/Foo", "org.example.Foo", "Changed")
            .with_body(Signature::new("s").unwrap(), vec![Value::String("org.example.Widget".into())]);
        message.serial = 1;
        assert!(rule.matches(&message));
    }
}
