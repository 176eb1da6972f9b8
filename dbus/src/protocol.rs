//! Wire constants shared by the header codec and the message types.

raw_enum! {
    /// Byte order a message was encoded with.
    #[repr(u8)]
    pub enum Endianness {
        /// Little endian, `l`.
        LITTLE = b'l',
        /// Big endian, `B`.
        BIG = b'B',
    }
}

impl Endianness {
    /// The endianness native to this platform.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endianness = Endianness::LITTLE;

    /// The endianness native to this platform.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endianness = Endianness::BIG;

    pub(crate) const fn into_byte(self) -> u8 {
        self.0
    }
}

impl MessageType {
    pub(crate) const fn into_byte(self) -> u8 {
        self.0
    }
}

impl Flags {
    pub(crate) const fn into_byte(self) -> u8 {
        self.0
    }
}

impl HeaderField {
    pub(crate) const fn into_byte(self) -> u8 {
        self.0
    }
}

raw_enum! {
    /// The kind of a message, found in the fixed header.
    #[repr(u8)]
    pub enum MessageType {
        METHOD_CALL = 1,
        METHOD_RETURN = 2,
        ERROR = 3,
        SIGNAL = 4,
    }
}

raw_set! {
    /// Flags carried in the fixed header.
    #[repr(u8)]
    pub enum Flags {
        EMPTY = 0,
        NO_REPLY_EXPECTED = 1,
        NO_AUTO_START = 2,
        ALLOW_INTERACTIVE_AUTHORIZATION = 4,
    }
}

raw_enum! {
    /// The field code of a variable header field.
    #[repr(u8)]
    pub enum HeaderField {
        PATH = 1,
        INTERFACE = 2,
        MEMBER = 3,
        ERROR_NAME = 4,
        REPLY_SERIAL = 5,
        DESTINATION = 6,
        SENDER = 7,
        SIGNATURE = 8,
        UNIX_FDS = 9,
    }
}

/// Maximum length in bytes of an array body, per the protocol.
pub const MAX_ARRAY_LENGTH: u32 = 1 << 26;

/// Maximum length in bytes of a message body, per the protocol.
pub const MAX_BODY_LENGTH: u32 = 1 << 27;

/// Maximum length in bytes of an entire message, header included.
pub const MAX_MESSAGE_LENGTH: u32 = MAX_BODY_LENGTH;
