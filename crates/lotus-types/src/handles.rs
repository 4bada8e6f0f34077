//! Live platform handles and the two-state references that point at them.
//!
//! A handle is the in-memory view of a platform object obtained from the
//! connector (a channel, a posted message, a server member). Handles are
//! never persisted. The persisted form of each reference is its stable
//! identifier, and after a load every reference starts out in the
//! `Stored` state until the reconciler swaps in a live handle.
//!
//! Equality on [`MessageRef`] and [`Occupant`] compares identifiers only,
//! so a stored reference and its resolved counterpart compare equal.

use std::collections::BTreeSet;

use crate::ids::{ChannelId, MessageId, RoleId, UserId};

/// A live text channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    /// Platform identifier of the channel.
    pub id: ChannelId,
    /// Channel name (the stable key used for persistence and lookup).
    pub name: String,
}

impl ChannelHandle {
    /// Platform mention markup for this channel.
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

/// A live message posted in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    /// Platform identifier of the message.
    pub id: MessageId,
    /// Channel the message lives in.
    pub channel_id: ChannelId,
}

/// A live server member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Platform identifier of the user.
    pub id: UserId,
    /// Name shown in the server.
    pub display_name: String,
    /// Roles held by the member.
    pub roles: BTreeSet<RoleId>,
}

impl Member {
    /// Whether the member holds the given role.
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// Platform mention markup for a user known only by identifier.
pub fn mention_user(id: UserId) -> String {
    format!("<@{id}>")
}

/// Reference to a message: either a bare persisted identifier or a live handle.
#[derive(Debug, Clone, Copy)]
pub enum MessageRef {
    /// Identifier read from a snapshot, not yet fetched from the platform.
    Stored(MessageId),
    /// Message fetched or posted during this process lifetime.
    Live(MessageHandle),
}

impl MessageRef {
    /// The stable identifier, whichever state the reference is in.
    pub const fn id(&self) -> MessageId {
        match self {
            Self::Stored(id) => *id,
            Self::Live(handle) => handle.id,
        }
    }

    /// The live handle, if the reference has been resolved.
    pub const fn live(&self) -> Option<&MessageHandle> {
        match self {
            Self::Stored(_) => None,
            Self::Live(handle) => Some(handle),
        }
    }
}

impl PartialEq for MessageRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for MessageRef {}

/// The holder of a spot: either a bare user identifier or a resolved member.
#[derive(Debug, Clone)]
pub enum Occupant {
    /// User identifier read from a snapshot, or one that could not be
    /// resolved against the server's member list.
    Stored(UserId),
    /// Member resolved through the connector.
    Live(Member),
}

impl Occupant {
    /// The stable user identifier, whichever state the occupant is in.
    pub const fn user_id(&self) -> UserId {
        match self {
            Self::Stored(id) => *id,
            Self::Live(member) => member.id,
        }
    }

    /// Whether the occupant has been resolved to a live member.
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Platform mention markup for the occupant.
    pub fn mention(&self) -> String {
        mention_user(self.user_id())
    }
}

impl PartialEq for Occupant {
    fn eq(&self, other: &Self) -> bool {
        self.user_id() == other.user_id()
    }
}

impl Eq for Occupant {}

impl From<Member> for Occupant {
    fn from(member: Member) -> Self {
        Self::Live(member)
    }
}

impl From<UserId> for Occupant {
    fn from(id: UserId) -> Self {
        Self::Stored(id)
    }
}
