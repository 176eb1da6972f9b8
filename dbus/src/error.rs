use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use dbus_core::{SignatureError, TypeError};

use crate::connection::ConnectionState;

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// Test if the error indicates that the operation would block.
    #[inline]
    pub(crate) fn would_block(&self) -> bool {
        matches!(self.kind, ErrorKind::WouldBlock)
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<TypeError> for Error {
    #[inline]
    fn from(error: TypeError) -> Self {
        Self::new(ErrorKind::TypeMismatch(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock => Self::new(ErrorKind::WouldBlock),
            _ => Self::new(ErrorKind::Io(error)),
        }
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8Error(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(..) => write!(f, "I/O error"),
            ErrorKind::Signature(..) => write!(f, "signature error"),
            ErrorKind::TypeMismatch(..) => write!(f, "value did not match the expected type"),
            ErrorKind::Utf8Error(..) => write!(f, "UTF-8 error"),
            ErrorKind::InvalidObjectPath(path) => write!(f, "invalid object path {path:?}"),
            ErrorKind::InvalidBusName(name) => write!(f, "invalid bus name {name:?}"),
            ErrorKind::InvalidInterfaceName(name) => write!(f, "invalid interface name {name:?}"),
            ErrorKind::InvalidMemberName(name) => write!(f, "invalid member name {name:?}"),
            ErrorKind::InvalidErrorName(name) => write!(f, "invalid error name {name:?}"),
            ErrorKind::UnsupportedAuthUid => {
                write!(f, "EXTERNAL authentication by UID requires the `libc` feature")
            }
            ErrorKind::WouldBlock => write!(f, "would block"),
            ErrorKind::BufferUnderflow => write!(f, "buffer underflow"),
            ErrorKind::MissingBus => write!(f, "no bus address could be determined"),
            ErrorKind::InvalidAddress(address) => write!(f, "invalid d-bus address: {address}"),
            ErrorKind::AutolaunchUnsupported => {
                write!(f, "autolaunch transports are parsed but not supported")
            }
            ErrorKind::InvalidState(state) => write!(f, "invalid connection state: {state:?}"),
            ErrorKind::AuthFailed(reason) => write!(f, "authentication failed: {reason}"),
            ErrorKind::InvalidSasl => write!(f, "invalid SASL message"),
            ErrorKind::InvalidSaslResponse => write!(f, "invalid SASL command"),
            ErrorKind::SaslLineTooLong(max) => write!(f, "SASL line exceeded the {max}-byte cap"),
            ErrorKind::TooManyRejections(max) => {
                write!(f, "SASL handshake exceeded {max} rejections")
            }
            ErrorKind::InvalidProtocol => write!(f, "invalid protocol"),
            ErrorKind::MissingPath => write!(f, "missing required PATH header"),
            ErrorKind::MissingMember => write!(f, "missing required MEMBER header"),
            ErrorKind::MissingInterface => write!(f, "missing required INTERFACE header"),
            ErrorKind::MissingReplySerial => write!(f, "missing required REPLY_SERIAL header"),
            ErrorKind::ZeroSerial => write!(f, "zero in header serial"),
            ErrorKind::MissingErrorName => write!(f, "missing required ERROR_NAME header"),
            ErrorKind::ForbiddenHeaderField(field) => {
                write!(f, "{field} header field is not allowed on this message type")
            }
            ErrorKind::NotNullTerminated => write!(f, "string is not null terminated"),
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::MessageTooLong => write!(f, "message exceeds the maximum allowed length"),
            ErrorKind::ConnectionClosed => write!(f, "connection is closed"),
            ErrorKind::MethodCallFailed(name, message) => {
                write!(f, "method call returned an error {name}: {message}")
            }
            ErrorKind::TimedOut => write!(f, "operation timed out"),
            ErrorKind::NoReply => write!(f, "dispatcher dropped without delivering a reply"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::TypeMismatch(error) => Some(error),
            ErrorKind::Utf8Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    TypeMismatch(TypeError),
    Utf8Error(Utf8Error),
    InvalidObjectPath(String),
    InvalidBusName(String),
    InvalidInterfaceName(String),
    InvalidMemberName(String),
    InvalidErrorName(String),
    UnsupportedAuthUid,
    WouldBlock,
    BufferUnderflow,
    MissingBus,
    InvalidAddress(String),
    AutolaunchUnsupported,
    InvalidState(ConnectionState),
    AuthFailed(String),
    InvalidSasl,
    InvalidSaslResponse,
    SaslLineTooLong(usize),
    TooManyRejections(u32),
    InvalidProtocol,
    MissingPath,
    MissingMember,
    MissingInterface,
    MissingReplySerial,
    ZeroSerial,
    MissingErrorName,
    ForbiddenHeaderField(&'static str),
    NotNullTerminated,
    ArrayTooLong(u32),
    BodyTooLong(u32),
    MessageTooLong,
    ConnectionClosed,
    MethodCallFailed(String, String),
    TimedOut,
    NoReply,
}
