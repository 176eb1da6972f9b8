//! A connected, authenticated D-Bus connection: a reader task and a
//! writer task sharing pending-reply slots and signal subscriptions with
//! the [`Connection`] handle the caller holds.

mod builder;
pub(crate) mod connection;
mod dispatcher;

pub use self::builder::ConnectionBuilder;
pub use self::connection::{Connection, ConnectionState};
pub use self::dispatcher::{ExportId, FilterId};
