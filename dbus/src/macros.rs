macro_rules! raw_enum {
    (
        $(#[$($meta:tt)*])*
        $vis:vis enum $name:ident { $($fields:tt)* }
    ) => {
        ::dbus_core::raw_enum! {
            $(#[$($meta)*])*
            $vis enum $name { $($fields)* }
        }
    }
}

macro_rules! raw_set {
    (
        $(#[$($meta:tt)*])*
        $vis:vis enum $name:ident { $($fields:tt)* }
    ) => {
        ::dbus_core::raw_set! {
            $(#[$($meta)*])*
            $vis enum $name { $($fields)* }
        }
    }
}
