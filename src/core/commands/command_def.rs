// src/core/commands/command_def.rs

//! The macro that generates `RequestType` together with its wire words and
//! argument shape from one table.

macro_rules! define_request_types {
    (
        $(
            $(#[$meta:meta])*
            $variant:ident = $value:literal => [$($word:literal),*], ($min:literal, $max:expr)
        ),* $(,)?
    ) => {
        /// Every command kind the host can submit.
        ///
        /// The discriminants are part of the C ABI.
        #[repr(u32)]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            strum_macros::FromRepr,
            strum_macros::EnumIter,
            strum_macros::IntoStaticStr,
        )]
        pub enum RequestType {
            $(
                $(#[$meta])*
                $variant = $value,
            )*
        }

        impl RequestType {
            /// The command words sent ahead of the caller's arguments.
            pub fn command_words(&self) -> &'static [&'static str] {
                match self {
                    $( RequestType::$variant => &[$($word),*], )*
                }
            }

            /// How many caller arguments the kind accepts.
            pub fn arity(&self) -> Arity {
                match self {
                    $( RequestType::$variant => Arity::new($min, $max), )*
                }
            }
        }
    };
}
