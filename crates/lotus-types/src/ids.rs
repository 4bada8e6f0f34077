//! Type-safe wrappers around chat-platform snowflake identifiers.
//!
//! The chat platform identifies users, channels, messages and roles by
//! 64-bit snowflakes. Each kind gets its own newtype so a message ID can
//! never be handed to an API expecting a user ID. All IDs serialize
//! transparently as bare integers, which is the form stored in snapshots.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a `u64` snowflake with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw snowflake value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the inner snowflake value.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of a platform user (server member).
    UserId
}

define_id! {
    /// Identifier of a text channel.
    ChannelId
}

define_id! {
    /// Identifier of a message within a channel.
    MessageId
}

define_id! {
    /// Identifier of a server role, used for command gating.
    RoleId
}
