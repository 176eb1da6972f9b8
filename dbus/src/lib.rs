//! An asynchronous D-Bus client and server library for the Tokio
//! ecosystem.
//!
//! This is a fairly low-level implementation: it gets a caller from a bus
//! address to a dispatched, type-checked [`Message`] and back, without
//! generating proxies from introspection XML.
//!
//! ```no_run
//! use dbus::ConnectionBuilder;
//! use dbus::Message;
//!
//! # async fn example() -> dbus::error::Result<()> {
//! let connection = ConnectionBuilder::session().connect().await?;
//!
//! let message = Message::method_call("/org/freedesktop/DBus", "ListNames")
//!     .with_interface("org.freedesktop.DBus")
//!     .with_destination("org.freedesktop.DBus");
//!
//! let reply = connection.call(message).await?;
//! println!("{:?}", reply.body);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::module_inception)]

#[macro_use]
mod macros;

pub mod error;
#[doc(inline)]
pub use self::error::{Error, Result};

mod protocol;
#[doc(inline)]
pub use self::protocol::{Endianness, Flags, MessageType};

pub mod org_freedesktop_dbus;

mod frame;

pub(crate) mod buf;

mod codec;

pub mod names;
#[doc(inline)]
pub use self::names::{BusName, ErrorName, InterfaceName, MemberName, ObjectPath};

pub mod message;
#[doc(inline)]
pub use self::message::{Message, MessageKind};

pub mod address;

mod transport;
#[doc(inline)]
pub use self::transport::Transport;

mod sasl;
#[doc(inline)]
pub use self::sasl::{AuthServer, AuthServerStep, Mechanism, DEFAULT_MAX_LINE_BYTES, DEFAULT_MAX_REJECTIONS};

mod connection;
#[doc(inline)]
pub use self::connection::{Connection, ConnectionBuilder, ConnectionState};

pub mod match_rule;
#[doc(inline)]
pub use self::match_rule::MatchRule;

mod bus;
#[doc(inline)]
pub use self::bus::BusClient;

pub use dbus_core::{Signature, SignatureError, Type, TypeError, Value};
