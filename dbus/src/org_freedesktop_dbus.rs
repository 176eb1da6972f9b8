//! Constants for talking to the bus daemon itself, `org.freedesktop.DBus`.

/// The bus daemon's own well-known name, also used as the default
/// destination for bus-level method calls.
pub const DESTINATION: &str = "org.freedesktop.DBus";

/// The interface implemented by the bus daemon.
pub const INTERFACE: &str = "org.freedesktop.DBus";

/// The object path the bus daemon answers on.
pub const PATH: &str = "/org/freedesktop/DBus";

raw_set! {
    /// Flags accepted by `RequestName`.
    #[repr(u32)]
    pub enum NameFlag {
        ALLOW_REPLACEMENT = 1,
        REPLACE_EXISTING = 2,
        DO_NOT_QUEUE = 4,
    }
}

impl NameFlag {
    pub const fn into_u32(self) -> u32 {
        self.0
    }
}

raw_enum! {
    /// Reply codes returned by `RequestName`.
    #[repr(u32)]
    pub enum NameReply {
        PRIMARY_OWNER = 1,
        IN_QUEUE = 2,
        EXISTS = 3,
        ALREADY_OWNER = 4,
    }
}

raw_enum! {
    /// Reply codes returned by `ReleaseName`.
    #[repr(u32)]
    pub enum ReleaseNameReply {
        RELEASED = 1,
        NON_EXISTENT = 2,
        NOT_OWNER = 3,
    }
}

raw_enum! {
    /// Reply codes returned by `StartServiceByName`.
    #[repr(u32)]
    pub enum StartReply {
        SUCCESS = 1,
        ALREADY_RUNNING = 2,
    }
}
