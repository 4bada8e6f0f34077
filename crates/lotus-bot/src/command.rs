//! Prefix command parsing.

/// A recognized command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reserve the listed spot numbers (raw, unvalidated arguments).
    SignIn(Vec<String>),
    /// Release every spot the author holds in the layer.
    SignOut,
    /// Record that the layer's lotus was just picked.
    Picked,
    /// Free every spot in the layer. Admin only.
    Reset,
    /// List the available commands.
    Help,
}

/// A prefixed message whose command name is not known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand {
    /// The name that was sent.
    pub name: String,
}

impl Command {
    /// Whether the command needs the configured admin role.
    pub const fn requires_admin(&self) -> bool {
        matches!(self, Self::Reset)
    }
}

/// Parse a message body.
///
/// Returns `None` when the message is not a command at all (no prefix, or
/// a bare prefix), `Some(Err(_))` for an unknown command name.
pub fn parse(prefix: &str, content: &str) -> Option<Result<Command, UnknownCommand>> {
    let body = content.trim_start().strip_prefix(prefix)?;
    let mut words = body.split_whitespace();
    let name = words.next()?;

    let command = match name {
        "signin" => Command::SignIn(words.map(str::to_owned).collect()),
        "signout" => Command::SignOut,
        "picked" => Command::Picked,
        "reset" => Command::Reset,
        "help" => Command::Help,
        _ => {
            return Some(Err(UnknownCommand {
                name: name.to_owned(),
            }));
        }
    };
    Some(Ok(command))
}

/// Text of the `help` reply.
pub fn help_text(prefix: &str) -> String {
    format!(
        "**Lotus bot commands**\n\
         `{prefix}signin <spot> [<spot>...]` - reserve spots in this layer\n\
         `{prefix}signout` - release your spots in this layer\n\
         `{prefix}picked` - the lotus in this layer was just picked\n\
         `{prefix}reset` - free every spot in this layer (admin)\n\
         `{prefix}help` - show this message"
    )
}
