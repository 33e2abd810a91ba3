//! Declarative helpers for wire-level enums and error code tables.

/// Defines `pub const` error codes plus a `get_error_message` lookup.
macro_rules! define_error_codes {
    ($($name:ident = $code:literal => $msg:literal),* $(,)?) => {
        $(
            pub const $name: u32 = $code;
        )*

        /// Returns the human readable message for an error code.
        pub fn get_error_message(code: u32) -> &'static str {
            match code {
                $($code => $msg,)*
                _ => "Unknown Error",
            }
        }
    };
}

/// Defines the DP type tag enum with its one-byte wire values.
macro_rules! define_dp_type {
    ($($name:ident = $val:literal => $label:literal),* $(,)?) => {
        /// Type tag of a Data Point value as carried on the wire.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "UPPERCASE")]
        #[repr(u8)]
        pub enum DpType {
            $($name = $val,)*
        }

        impl DpType {
            pub fn from_u8(val: u8) -> Option<Self> {
                match val {
                    $($val => Some(DpType::$name),)*
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(DpType::$name => $label,)*
                }
            }
        }

        impl std::fmt::Display for DpType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}
