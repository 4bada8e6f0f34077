//! The Zone / Layer / Spot tree.
//!
//! A [`Zone`] is a named game area split into parallel [`Layer`]s, and every
//! layer carries the same fixed set of [`Spot`]s. The tree shape is decided
//! by configuration when the tree is built; afterwards only spot occupants,
//! the pick timer and the platform references change.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::handles::{ChannelHandle, MessageRef, Occupant};
use crate::ids::UserId;

// ---------------------------------------------------------------------------
// Spot
// ---------------------------------------------------------------------------

/// A single reservable slot within a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spot {
    name: String,
    number: u32,
    occupant: Option<Occupant>,
}

impl Spot {
    /// Create a spot with the given occupant.
    pub const fn new(name: String, number: u32, occupant: Option<Occupant>) -> Self {
        Self {
            name,
            number,
            occupant,
        }
    }

    /// Create an unoccupied spot.
    pub const fn free(name: String, number: u32) -> Self {
        Self::new(name, number, None)
    }

    /// Display name of the spot.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based number of the spot, unique within its layer.
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Current holder of the spot.
    pub const fn occupant(&self) -> Option<&Occupant> {
        self.occupant.as_ref()
    }

    /// Whether nobody holds the spot.
    pub const fn is_free(&self) -> bool {
        self.occupant.is_none()
    }

    /// Whether the given user holds the spot.
    pub fn is_held_by(&self, user: UserId) -> bool {
        self.occupant
            .as_ref()
            .is_some_and(|occupant| occupant.user_id() == user)
    }

    /// Replace the holder of the spot, returning the previous one.
    pub const fn set_occupant(&mut self, occupant: Option<Occupant>) -> Option<Occupant> {
        std::mem::replace(&mut self.occupant, occupant)
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// One instance of a zone with its own channel and spot reservations.
///
/// `channel` is transient and excluded from equality. The message references
/// compare by identifier, so a freshly loaded layer equals the layer it was
/// saved from.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Name of the platform channel backing this layer.
    pub channel_name: String,
    /// Live channel handle, bound by the reconciler.
    pub channel: Option<ChannelHandle>,
    /// Message showing the spot table.
    pub table_message: Option<MessageRef>,
    /// Message showing the pick timer and free count.
    pub status_message: Option<MessageRef>,
    /// When the lotus in this layer was last picked.
    pub last_event_time: Option<DateTime<Utc>>,
    spots: BTreeMap<u32, Spot>,
}

impl Layer {
    /// Create a layer with no platform references and no timer.
    ///
    /// Spots are keyed by their number. A later spot with a number that is
    /// already present replaces the earlier one, so callers validate
    /// uniqueness up front.
    pub fn new(channel_name: String, spots: impl IntoIterator<Item = Spot>) -> Self {
        Self {
            channel_name,
            channel: None,
            table_message: None,
            status_message: None,
            last_event_time: None,
            spots: spots.into_iter().map(|s| (s.number, s)).collect(),
        }
    }

    /// All spots ordered by number.
    pub fn spots(&self) -> impl Iterator<Item = &Spot> {
        self.spots.values()
    }

    /// Look up a spot by number.
    pub fn spot(&self, number: u32) -> Option<&Spot> {
        self.spots.get(&number)
    }

    /// Look up a spot by number for mutation.
    pub fn spot_mut(&mut self, number: u32) -> Option<&mut Spot> {
        self.spots.get_mut(&number)
    }

    /// Iterate spots mutably, ordered by number.
    pub fn spots_mut(&mut self) -> impl Iterator<Item = &mut Spot> {
        self.spots.values_mut()
    }

    /// Number of configured spots.
    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    /// Numbers of spots nobody holds, ascending.
    pub fn free_spot_numbers(&self) -> Vec<u32> {
        self.spots
            .values()
            .filter(|s| s.is_free())
            .map(Spot::number)
            .collect()
    }

    /// Count of spots nobody holds.
    pub fn free_spot_count(&self) -> usize {
        self.spots.values().filter(|s| s.is_free()).count()
    }

    /// Whether both the table and the status message have an identifier.
    pub const fn has_message_ids(&self) -> bool {
        self.table_message.is_some() && self.status_message.is_some()
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.channel_name == other.channel_name
            && self.table_message == other.table_message
            && self.status_message == other.status_message
            && self.last_event_time == other.last_event_time
            && self.spots == other.spots
    }
}

impl Eq for Layer {}

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

/// A named game area made of parallel layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Zone name, unique across the store.
    pub name: String,
    /// Layers keyed by their 1-based number.
    pub layers: BTreeMap<u32, Layer>,
}

impl Zone {
    /// Create a zone from its layers.
    pub const fn new(name: String, layers: BTreeMap<u32, Layer>) -> Self {
        Self { name, layers }
    }
}
