//! In-memory chat platform.
//!
//! Keeps channels, messages, members and direct messages in a mutex-guarded
//! map and allocates snowflakes from a counter. Used by the test suites and
//! by the bot's console mode, where there is no real server to talk to.
//! Outbound traffic is logged at `info` so the console shows what a real
//! server would display.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lotus_types::{ChannelHandle, ChannelId, Member, MessageHandle, MessageId, UserId};
use tracing::info;

use super::{ChatPlatform, PlatformError};

/// Snowflakes below this value are left for callers (user IDs in tests).
const FIRST_ALLOCATED_ID: u64 = 1_000_000;

#[derive(Debug)]
struct MemoryChannel {
    name: String,
    messages: BTreeMap<MessageId, String>,
}

#[derive(Debug)]
struct MemoryState {
    next_id: u64,
    channels: BTreeMap<ChannelId, MemoryChannel>,
    members: BTreeMap<UserId, Member>,
    direct: BTreeMap<UserId, Vec<String>>,
    deleted: Vec<MessageId>,
}

impl MemoryState {
    const fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn channel_mut(&mut self, id: ChannelId) -> Result<&mut MemoryChannel, PlatformError> {
        self.channels.get_mut(&id).ok_or_else(|| PlatformError::NotFound {
            what: format!("channel {id}"),
        })
    }
}

/// A chat platform living entirely in process memory.
#[derive(Debug)]
pub struct InMemoryPlatform {
    bot_user: UserId,
    state: Mutex<MemoryState>,
}

impl InMemoryPlatform {
    /// Create a platform with the given bot user and no channels.
    pub const fn new(bot_user: UserId) -> Self {
        Self {
            bot_user,
            state: Mutex::new(MemoryState {
                next_id: FIRST_ALLOCATED_ID,
                channels: BTreeMap::new(),
                members: BTreeMap::new(),
                direct: BTreeMap::new(),
                deleted: Vec::new(),
            }),
        }
    }

    /// Create a platform with one empty channel per name.
    pub fn with_channels<'a>(bot_user: UserId, names: impl IntoIterator<Item = &'a str>) -> Self {
        let platform = Self::new(bot_user);
        for name in names {
            platform.add_channel(name);
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an empty channel and return its handle.
    pub fn add_channel(&self, name: &str) -> ChannelHandle {
        let mut state = self.lock();
        let id = ChannelId::new(state.allocate());
        state.channels.insert(
            id,
            MemoryChannel {
                name: name.to_owned(),
                messages: BTreeMap::new(),
            },
        );
        ChannelHandle {
            id,
            name: name.to_owned(),
        }
    }

    /// Register a server member.
    pub fn add_member(&self, member: Member) {
        self.lock().members.insert(member.id, member);
    }

    /// Remove a server member (simulates a user leaving the server).
    pub fn remove_member(&self, user: UserId) {
        self.lock().members.remove(&user);
    }

    /// Handle of the channel with the given name.
    pub fn channel_by_name(&self, name: &str) -> Option<ChannelHandle> {
        self.lock()
            .channels
            .iter()
            .find(|(_, channel)| channel.name == name)
            .map(|(&id, channel)| ChannelHandle {
                id,
                name: channel.name.clone(),
            })
    }

    /// Contents of every message in a channel, oldest first.
    pub fn messages_in(&self, name: &str) -> Vec<String> {
        self.lock()
            .channels
            .values()
            .find(|channel| channel.name == name)
            .map(|channel| channel.messages.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Current content of a message, wherever it lives.
    pub fn message_content(&self, id: MessageId) -> Option<String> {
        self.lock()
            .channels
            .values()
            .find_map(|channel| channel.messages.get(&id).cloned())
    }

    /// Messages sent privately to a user, oldest first.
    pub fn direct_messages(&self, user: UserId) -> Vec<String> {
        self.lock().direct.get(&user).cloned().unwrap_or_default()
    }

    /// Identifiers of messages deleted one by one (not by purge), in order.
    pub fn deleted_messages(&self) -> Vec<MessageId> {
        self.lock().deleted.clone()
    }

    /// Post a message as some other user, returning its handle.
    ///
    /// Returns `None` if the channel does not exist.
    pub fn inject_message(&self, channel: ChannelId, content: &str) -> Option<MessageHandle> {
        let mut state = self.lock();
        let id = MessageId::new(state.allocate());
        let target = state.channels.get_mut(&channel)?;
        target.messages.insert(id, content.to_owned());
        Some(MessageHandle {
            id,
            channel_id: channel,
        })
    }

    /// Drop a message without going through the connector (simulates a
    /// moderator deleting it by hand). Returns whether it existed.
    pub fn remove_message(&self, id: MessageId) -> bool {
        self.lock()
            .channels
            .values_mut()
            .any(|channel| channel.messages.remove(&id).is_some())
    }
}

#[async_trait]
impl ChatPlatform for InMemoryPlatform {
    fn current_user(&self) -> UserId {
        self.bot_user
    }

    async fn channels(&self) -> Result<Vec<ChannelHandle>, PlatformError> {
        Ok(self
            .lock()
            .channels
            .iter()
            .map(|(&id, channel)| ChannelHandle {
                id,
                name: channel.name.clone(),
            })
            .collect())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        content: &str,
    ) -> Result<MessageHandle, PlatformError> {
        let mut state = self.lock();
        let id = MessageId::new(state.allocate());
        let target = state.channel_mut(channel)?;
        target.messages.insert(id, content.to_owned());
        info!(channel = %target.name, message = %id, "send:\n{content}");
        Ok(MessageHandle {
            id,
            channel_id: channel,
        })
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<MessageHandle, PlatformError> {
        let mut state = self.lock();
        if state.channel_mut(channel)?.messages.contains_key(&message) {
            Ok(MessageHandle {
                id: message,
                channel_id: channel,
            })
        } else {
            Err(PlatformError::NotFound {
                what: format!("message {message}"),
            })
        }
    }

    async fn edit_message(&self, message: MessageHandle, content: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let body = state
            .channel_mut(message.channel_id)?
            .messages
            .get_mut(&message.id)
            .ok_or_else(|| PlatformError::NotFound {
                what: format!("message {}", message.id),
            })?;
        content.clone_into(body);
        info!(message = %message.id, "edit:\n{content}");
        Ok(())
    }

    async fn delete_message(&self, message: MessageHandle) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let removed = state
            .channel_mut(message.channel_id)?
            .messages
            .remove(&message.id);
        if removed.is_none() {
            return Err(PlatformError::NotFound {
                what: format!("message {}", message.id),
            });
        }
        state.deleted.push(message.id);
        Ok(())
    }

    async fn purge_channel(&self, channel: ChannelId) -> Result<usize, PlatformError> {
        let mut state = self.lock();
        let target = state.channel_mut(channel)?;
        let count = target.messages.len();
        target.messages.clear();
        Ok(count)
    }

    async fn resolve_member(&self, user: UserId) -> Result<Option<Member>, PlatformError> {
        Ok(self.lock().members.get(&user).cloned())
    }

    async fn send_direct(&self, user: UserId, content: &str) -> Result<MessageHandle, PlatformError> {
        let mut state = self.lock();
        let id = MessageId::new(state.allocate());
        state
            .direct
            .entry(user)
            .or_default()
            .push(content.to_owned());
        info!(user = %user, "direct:\n{content}");
        // Direct channels share the user's snowflake; nothing is ever fetched from them.
        Ok(MessageHandle {
            id,
            channel_id: ChannelId::new(user.into_inner()),
        })
    }
}
