//! Console event source for running the bot without a chat server.
//!
//! Each stdin line is one inbound message:
//!
//! ```text
//! <channel> <user-id>[!] <text>
//! epl-layer-1 42 >signin 3 5
//! epl-layer-1 7! >reset          (trailing ! grants the admin role)
//! ```
//!
//! Unknown channels and users are created on first use. Everything the bot
//! sends back is logged by the in-memory platform.

use std::collections::BTreeSet;

use lotus_core::platform::{ChatPlatform, InMemoryPlatform};
use lotus_types::{Member, RoleId, UserId};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{error, warn};

use crate::context::{BotContext, Inbound};
use crate::error::BotError;

/// The bot's own user in console mode.
pub const CONSOLE_BOT_USER: UserId = UserId::new(1);

/// A console line that does not follow `<channel> <user-id>[!] <text>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected `<channel> <user-id>[!] <text>`, got {line:?}")]
pub struct MalformedLine {
    /// The rejected input.
    pub line: String,
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    /// Channel name the message is posted in.
    pub channel: String,
    /// Author of the message.
    pub user: UserId,
    /// Whether the author holds the admin role.
    pub admin: bool,
    /// Message text.
    pub text: String,
}

/// Split a console line into channel, author and text.
///
/// # Errors
///
/// Returns [`MalformedLine`] if the channel or a numeric user ID is missing.
pub fn parse_line(line: &str) -> Result<ConsoleLine, MalformedLine> {
    let malformed = || MalformedLine {
        line: line.to_owned(),
    };
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let channel = parts.next().filter(|c| !c.is_empty()).ok_or_else(malformed)?;
    let user_token = parts.next().ok_or_else(malformed)?;
    let text = parts.next().map(str::trim).unwrap_or_default();

    let (raw_id, admin) = user_token
        .strip_suffix('!')
        .map_or((user_token, false), |id| (id, true));
    let Ok(id) = raw_id.parse::<u64>() else {
        return Err(malformed());
    };

    Ok(ConsoleLine {
        channel: channel.to_owned(),
        user: UserId::new(id),
        admin,
        text: text.to_owned(),
    })
}

/// Post the line's message on the platform and describe it as an event.
async fn to_inbound(
    platform: &InMemoryPlatform,
    admin_role: RoleId,
    line: ConsoleLine,
) -> Option<Inbound> {
    let channel = platform
        .channel_by_name(&line.channel)
        .unwrap_or_else(|| platform.add_channel(&line.channel));

    let mut author = match platform.resolve_member(line.user).await {
        Ok(Some(member)) => member,
        Ok(None) | Err(_) => Member {
            id: line.user,
            display_name: format!("user-{}", line.user),
            roles: BTreeSet::new(),
        },
    };
    // The admin role lasts for this line only.
    if line.admin {
        author.roles.insert(admin_role);
    } else {
        author.roles.remove(&admin_role);
    }
    platform.add_member(author.clone());

    let message = platform.inject_message(channel.id, &line.text)?;
    Some(Inbound {
        channel,
        author,
        message,
        content: line.text,
    })
}

/// Feed stdin lines to the bot until end of input.
///
/// # Errors
///
/// Returns [`BotError::Events`] if stdin cannot be read. Bad lines and
/// failed commands are logged and skipped.
pub async fn run(context: &BotContext<InMemoryPlatform>) -> Result<(), BotError> {
    let admin_role = context.config().bot.admin_role_id;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = match parse_line(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Ignoring console input");
                continue;
            }
        };
        let Some(event) = to_inbound(context.platform(), admin_role, parsed).await else {
            continue;
        };
        if let Err(e) = context.handle(&event).await {
            error!(
                error = %e,
                channel = %event.channel.name,
                content = %event.content,
                "Command failed"
            );
        }
    }
    Ok(())
}
