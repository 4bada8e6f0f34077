//! Chat-platform connector trait.
//!
//! The store and the reconciler never talk to the chat platform directly.
//! Everything they need (channel enumeration, message send / fetch / edit /
//! delete, channel purge, member lookup, direct messages) goes through
//! [`ChatPlatform`]. A production connector wraps the platform's gateway
//! client; [`InMemoryPlatform`] backs the tests and the console mode.

pub mod memory;

use async_trait::async_trait;
use lotus_types::{ChannelHandle, ChannelId, Member, MessageHandle, MessageId, UserId};

pub use memory::InMemoryPlatform;

/// Errors reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The referenced channel, message or user does not exist.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing object.
        what: String,
    },
}

impl PlatformError {
    /// Whether the error means the target object is gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// The operations the tracker needs from the chat platform.
///
/// All methods are async and their futures are `Send`, so callers may hold
/// them across `.await` points inside spawned tasks.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own user, used to ignore its own messages.
    fn current_user(&self) -> UserId;

    /// Every text channel of the connected server.
    async fn channels(&self) -> Result<Vec<ChannelHandle>, PlatformError>;

    /// Post a message to a channel.
    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageHandle, PlatformError>;

    /// Fetch a previously posted message by identifier.
    ///
    /// Returns [`PlatformError::NotFound`] if the message was deleted.
    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<MessageHandle, PlatformError>;

    /// Replace the content of a message.
    async fn edit_message(&self, message: MessageHandle, content: &str) -> Result<(), PlatformError>;

    /// Delete a message.
    async fn delete_message(&self, message: MessageHandle) -> Result<(), PlatformError>;

    /// Delete every message in a channel, returning how many were removed.
    async fn purge_channel(&self, channel: ChannelId) -> Result<usize, PlatformError>;

    /// Look up a server member; `Ok(None)` if the user is not a member.
    async fn resolve_member(&self, user: UserId) -> Result<Option<Member>, PlatformError>;

    /// Open (or reuse) the private channel with a user and post to it.
    async fn send_direct(&self, user: UserId, content: &str) -> Result<MessageHandle, PlatformError>;
}
