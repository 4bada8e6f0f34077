//! Text views of a layer and the step that pushes them to the platform.
//!
//! Each layer channel carries two bot messages: a status message (pick
//! timer, free count, next window) and a table message (one line per spot).
//! Both are edited in place whenever the layer changes.

use chrono::{DateTime, Utc};
use lotus_types::{Layer, Spot};
use tracing::debug;

use crate::config::TimerConfig;
use crate::platform::{ChatPlatform, PlatformError};
use crate::store::LayerLocation;

/// Timestamp layout used in views.
const DATE_FMT: &str = "%d/%m/%Y at %H:%M";

/// Shown where a time is not known yet.
const UNKNOWN: &str = "¯\\_(ツ)_/¯";

/// Title of the table message.
const TABLE_TITLE: &str = "Lotus Spots";

/// Content of the placeholder messages posted before the first render.
pub const PLACEHOLDER: &str = "I'm bootin' baby!";

/// Errors that can occur while pushing views to the platform.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The layer's channel or messages have not been bound yet.
    #[error("layer {channel_name} has no live status/table messages")]
    Unbound {
        /// Channel of the unbound layer.
        channel_name: String,
    },

    /// Editing a message failed.
    #[error("failed to edit layer message: {0}")]
    Platform(#[from] PlatformError),
}

/// Emoji shortcode for a spot number (`:one:` .. `:keycap_ten:`, `#n` beyond).
pub fn number_emoji(number: u32) -> String {
    let name = match number {
        1 => "one",
        2 => "two",
        3 => "three",
        4 => "four",
        5 => "five",
        6 => "six",
        7 => "seven",
        8 => "eight",
        9 => "nine",
        10 => "keycap_ten",
        _ => return format!("#{number}"),
    };
    format!(":{name}:")
}

/// One line of the table view.
pub fn table_line(spot: &Spot) -> String {
    let holder = spot
        .occupant()
        .map_or_else(|| String::from("FREE"), lotus_types::Occupant::mention);
    format!(
        "{} | **__{}__** - {holder}",
        number_emoji(spot.number()),
        spot.name()
    )
}

/// Short label used when confirming a spot to a user.
pub fn spot_label(spot: &Spot) -> String {
    format!("{} - **__{}__**", number_emoji(spot.number()), spot.name())
}

/// The table view: a title and one line per spot, ordered by number.
pub fn table_view(layer: &Layer) -> String {
    let mut out = format!("**{TABLE_TITLE}**");
    for spot in layer.spots() {
        out.push('\n');
        out.push_str(&table_line(spot));
    }
    out
}

/// The status view: last pick, free count and the next pick window.
pub fn status_view(zone: &str, number: u32, layer: &Layer, timer: &TimerConfig) -> String {
    let fmt = |at: DateTime<Utc>| at.format(DATE_FMT).to_string();
    let picked = layer.last_event_time;
    let last = picked.map_or_else(|| UNKNOWN.to_owned(), fmt);
    let opens = picked
        .and_then(|at| at.checked_add_signed(timer.window_start()))
        .map_or_else(|| UNKNOWN.to_owned(), fmt);
    let closes = picked
        .and_then(|at| at.checked_add_signed(timer.window_end()))
        .map_or_else(|| UNKNOWN.to_owned(), fmt);

    format!(
        "**{zone} | Layer {number}**\n\
         **Lotus was last picked:** {last}\n\
         **Free spots:** {free}\n\
         ```diff\n\
         + Next lotus window opens:\n\
         + {opens}\n\
         - Next lotus window closes:\n\
         - {closes}\n\
         ```",
        free = layer.free_spot_count(),
    )
}

/// Edit the layer's status and table messages to match its current state.
///
/// # Errors
///
/// Returns [`RenderError::Unbound`] if either message is not live and
/// [`RenderError::Platform`] if an edit fails.
pub async fn refresh_layer<P: ChatPlatform>(
    platform: &P,
    location: LayerLocation<'_>,
    timer: &TimerConfig,
) -> Result<(), RenderError> {
    let layer = location.layer;
    let (Some(status), Some(table)) = (
        layer.status_message.as_ref().and_then(|m| m.live()).copied(),
        layer.table_message.as_ref().and_then(|m| m.live()).copied(),
    ) else {
        return Err(RenderError::Unbound {
            channel_name: layer.channel_name.clone(),
        });
    };

    let status_text = status_view(location.zone, location.number, layer, timer);
    let table_text = table_view(layer);
    platform.edit_message(status, &status_text).await?;
    platform.edit_message(table, &table_text).await?;

    debug!(
        zone = location.zone,
        layer = location.number,
        free = layer.free_spot_count(),
        "Layer views refreshed"
    );
    Ok(())
}
