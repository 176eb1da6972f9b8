//! Core, allocation-only types for the D-Bus type system.
//!
//! This crate knows nothing about sockets, SASL, or connections. It is
//! split out so that the signature and value types can be shared by the
//! codec, the message builders, and (eventually) a derive macro without
//! pulling in I/O.

#![allow(clippy::module_inception)]

#[macro_use]
mod macros;

mod error;
mod signature;
mod ty;
mod value;

pub use error::{SignatureError, TypeError};
pub use signature::{Signature, MAX_CONTAINER_DEPTH, MAX_DEPTH, MAX_SIGNATURE_LENGTH};
pub use ty::Type;
pub use value::Value;
