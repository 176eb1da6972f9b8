//! Convenience wrappers over `org.freedesktop.DBus` method calls.

use dbus_core::{Signature, Value};

use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};
use crate::match_rule::MatchRule;
use crate::message::Message;
use crate::org_freedesktop_dbus::{self, NameFlag, NameReply, ReleaseNameReply, StartReply};

fn bus_call(member: &str) -> Message {
    Message::method_call(org_freedesktop_dbus::PATH, member)
        .with_interface(org_freedesktop_dbus::INTERFACE)
        .with_destination(org_freedesktop_dbus::DESTINATION)
}

fn expect_string(message: &Message) -> Result<String> {
    match message.body.first() {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn expect_bool(message: &Message) -> Result<bool> {
    match message.body.first() {
        Some(Value::Boolean(b)) => Ok(*b),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn expect_u32(message: &Message) -> Result<u32> {
    match message.body.first() {
        Some(Value::Uint32(v)) => Ok(*v),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

fn expect_strings(message: &Message) -> Result<Vec<String>> {
    match message.body.first() {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(Error::new(ErrorKind::InvalidProtocol)),
            })
            .collect(),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

/// A thin, typed wrapper over the bus daemon's own interface.
pub struct BusClient<'a> {
    connection: &'a Connection,
}

impl<'a> BusClient<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Bus names currently held by this connection. Kept up to date by a
    /// background subscription to `NameAcquired`/`NameLost` installed when
    /// the connection was established.
    pub fn acquired_names(&self) -> Vec<String> {
        self.connection.acquired_names()
    }

    pub async fn request_name(&self, name: &str, flags: NameFlag) -> Result<NameReply> {
        let message = bus_call("RequestName")
            .with_body(Signature::new("su")?, vec![Value::String(name.into()), Value::Uint32(flags.into_u32())]);
        let reply = self.connection.call(message).await?;
        Ok(NameReply::new(expect_u32(&reply)?))
    }

    pub async fn release_name(&self, name: &str) -> Result<ReleaseNameReply> {
        let message = bus_call("ReleaseName").with_body(Signature::new("s")?, vec![Value::String(name.into())]);
        let reply = self.connection.call(message).await?;
        Ok(ReleaseNameReply::new(expect_u32(&reply)?))
    }

    pub async fn start_service_by_name(&self, name: &str) -> Result<StartReply> {
        let message = bus_call("StartServiceByName")
            .with_body(Signature::new("su")?, vec![Value::String(name.into()), Value::Uint32(0)]);
        let reply = self.connection.call(message).await?;
        Ok(StartReply::new(expect_u32(&reply)?))
    }

    pub async fn name_has_owner(&self, name: &str) -> Result<bool> {
        let message = bus_call("NameHasOwner").with_body(Signature::new("s")?, vec![Value::String(name.into())]);
        let reply = self.connection.call(message).await?;
        expect_bool(&reply)
    }

    pub async fn get_name_owner(&self, name: &str) -> Result<String> {
        let message = bus_call("GetNameOwner").with_body(Signature::new("s")?, vec![Value::String(name.into())]);
        let reply = self.connection.call(message).await?;
        expect_string(&reply)
    }

    pub async fn list_names(&self) -> Result<Vec<String>> {
        let reply = self.connection.call(bus_call("ListNames")).await?;
        expect_strings(&reply)
    }

    pub async fn list_activatable_names(&self) -> Result<Vec<String>> {
        let reply = self.connection.call(bus_call("ListActivatableNames")).await?;
        expect_strings(&reply)
    }

    pub async fn list_queued_owners(&self, name: &str) -> Result<Vec<String>> {
        let message = bus_call("ListQueuedOwners").with_body(Signature::new("s")?, vec![Value::String(name.into())]);
        let reply = self.connection.call(message).await?;
        expect_strings(&reply)
    }

    pub async fn get_id(&self) -> Result<String> {
        let reply = self.connection.call(bus_call("GetId")).await?;
        expect_string(&reply)
    }

    pub async fn get_connection_unix_user(&self, name: &str) -> Result<u32> {
        let message =
            bus_call("GetConnectionUnixUser").with_body(Signature::new("s")?, vec![Value::String(name.into())]);
        let reply = self.connection.call(message).await?;
        expect_u32(&reply)
    }

    pub async fn get_connection_unix_process_id(&self, name: &str) -> Result<u32> {
        let message = bus_call("GetConnectionUnixProcessID")
            .with_body(Signature::new("s")?, vec![Value::String(name.into())]);
        let reply = self.connection.call(message).await?;
        expect_u32(&reply)
    }

    /// Register the match rule with the bus daemon and subscribe locally
    /// to the matching signals, in one step.
    pub async fn add_match(&self, rule: MatchRule) -> Result<tokio::sync::mpsc::UnboundedReceiver<Message>> {
        let message =
            bus_call("AddMatch").with_body(Signature::new("s")?, vec![Value::String(rule.to_match_string())]);
        self.connection.call(message).await?;
        Ok(self.connection.subscribe(rule))
    }

    pub async fn remove_match(&self, rule: &MatchRule) -> Result<()> {
        let message =
            bus_call("RemoveMatch").with_body(Signature::new("s")?, vec![Value::String(rule.to_match_string())]);
        self.connection.call(message).await?;
        Ok(())
    }
}
