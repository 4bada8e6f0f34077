//! Snapshot records: the persisted form of the Zone / Layer / Spot tree.
//!
//! Each in-memory type has a record counterpart holding only scalars and
//! stable identifiers. Encoding goes through `From<&T>` and decoding through
//! `TryFrom<Record>`, so every kind of value in the document has exactly one
//! conversion in each direction.
//!
//! | In memory | In the document |
//! |-----------|-----------------|
//! | `DateTime<Utc>` | RFC 3339 string |
//! | [`Occupant`] | user ID |
//! | [`MessageRef`] | message ID |
//! | [`ChannelHandle`] | channel name |
//!
//! Decoded references are always in the `Stored` state.
//!
//! [`ChannelHandle`]: crate::handles::ChannelHandle

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handles::{MessageRef, Occupant};
use crate::ids::{MessageId, UserId};
use crate::model::{Layer, Spot, Zone};
use crate::timestamp::iso8601_option;

/// Errors raised when a structurally valid document describes an invalid tree.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// A spot is stored under a key that differs from its own number.
    #[error("spot keyed {key} in layer {channel_name} claims number {number}")]
    SpotKeyMismatch {
        /// Channel name of the offending layer.
        channel_name: String,
        /// Map key the spot was stored under.
        key: u32,
        /// Number recorded inside the spot.
        number: u32,
    },
}

/// The whole persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Zones keyed by name.
    pub state: BTreeMap<String, ZoneRecord>,
    /// Whether the reconciler had completed when the snapshot was taken.
    #[serde(default)]
    pub initialized: bool,
    /// Start time of the process that wrote the snapshot.
    #[serde(default, with = "iso8601_option")]
    pub boot_time: Option<DateTime<Utc>>,
}

/// Persisted form of a [`Zone`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    /// Layers keyed by number.
    pub layers: BTreeMap<u32, LayerRecord>,
}

/// Persisted form of a [`Layer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Name of the backing channel.
    pub channel_name: String,
    /// Name of the bound channel at save time, `None` if unbound.
    #[serde(default)]
    pub channel: Option<String>,
    /// Identifier of the table message.
    #[serde(default)]
    pub table_message: Option<MessageId>,
    /// Identifier of the status message.
    #[serde(default)]
    pub status_message: Option<MessageId>,
    /// Last pick time.
    #[serde(default, with = "iso8601_option")]
    pub timer: Option<DateTime<Utc>>,
    /// Spots keyed by number.
    pub spots: BTreeMap<u32, SpotRecord>,
}

/// Persisted form of a [`Spot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRecord {
    /// Spot name.
    pub name: String,
    /// Spot number.
    pub number: u32,
    /// Identifier of the holder, `None` if free.
    #[serde(default)]
    pub player: Option<UserId>,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

impl From<&Spot> for SpotRecord {
    fn from(spot: &Spot) -> Self {
        Self {
            name: spot.name().to_owned(),
            number: spot.number(),
            player: spot.occupant().map(Occupant::user_id),
        }
    }
}

impl From<&Layer> for LayerRecord {
    fn from(layer: &Layer) -> Self {
        Self {
            channel_name: layer.channel_name.clone(),
            channel: layer.channel.as_ref().map(|c| c.name.clone()),
            table_message: layer.table_message.as_ref().map(MessageRef::id),
            status_message: layer.status_message.as_ref().map(MessageRef::id),
            timer: layer.last_event_time,
            spots: layer
                .spots()
                .map(|s| (s.number(), SpotRecord::from(s)))
                .collect(),
        }
    }
}

impl From<&Zone> for ZoneRecord {
    fn from(zone: &Zone) -> Self {
        Self {
            layers: zone
                .layers
                .iter()
                .map(|(&number, layer)| (number, LayerRecord::from(layer)))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

impl From<SpotRecord> for Spot {
    fn from(record: SpotRecord) -> Self {
        Self::new(record.name, record.number, record.player.map(Occupant::Stored))
    }
}

impl TryFrom<LayerRecord> for Layer {
    type Error = DecodeError;

    fn try_from(record: LayerRecord) -> Result<Self, Self::Error> {
        let mut spots = Vec::with_capacity(record.spots.len());
        for (key, spot) in record.spots {
            if key != spot.number {
                return Err(DecodeError::SpotKeyMismatch {
                    channel_name: record.channel_name,
                    key,
                    number: spot.number,
                });
            }
            spots.push(Spot::from(spot));
        }

        let mut layer = Self::new(record.channel_name, spots);
        layer.table_message = record.table_message.map(MessageRef::Stored);
        layer.status_message = record.status_message.map(MessageRef::Stored);
        layer.last_event_time = record.timer;
        Ok(layer)
    }
}

impl ZoneRecord {
    /// Rebuild the zone, taking its name from the document key.
    pub fn into_zone(self, name: String) -> Result<Zone, DecodeError> {
        let layers = self
            .layers
            .into_iter()
            .map(|(number, layer)| Layer::try_from(layer).map(|l| (number, l)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Zone::new(name, layers))
    }
}

impl SnapshotDocument {
    /// Encode a zone tree together with the store flags.
    pub fn encode<'a>(
        zones: impl IntoIterator<Item = &'a Zone>,
        initialized: bool,
        boot_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            state: zones
                .into_iter()
                .map(|zone| (zone.name.clone(), ZoneRecord::from(zone)))
                .collect(),
            initialized,
            boot_time,
        }
    }

    /// Decode the zone tree, keyed by zone name.
    pub fn decode_zones(self) -> Result<BTreeMap<String, Zone>, DecodeError> {
        self.state
            .into_iter()
            .map(|(name, record)| record.into_zone(name.clone()).map(|zone| (name, zone)))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use super::*;
    use crate::handles::{ChannelHandle, Member, MessageHandle};
    use crate::ids::ChannelId;

    fn populated_zone() -> Zone {
        let mut layer = Layer::new(
            String::from("epl-layer-1"),
            [
                Spot::free(String::from("Cauldron 1"), 1),
                Spot::free(String::from("Naxx"), 2),
            ],
        );
        layer.channel = Some(ChannelHandle {
            id: ChannelId::new(500),
            name: String::from("epl-layer-1"),
        });
        layer.table_message = Some(MessageRef::Live(MessageHandle {
            id: MessageId::new(11),
            channel_id: ChannelId::new(500),
        }));
        layer.status_message = Some(MessageRef::Stored(MessageId::new(12)));
        layer.last_event_time = Some(Utc.with_ymd_and_hms(2023, 5, 1, 10, 0, 0).unwrap());
        layer.spot_mut(1).unwrap().set_occupant(Some(Occupant::Live(Member {
            id: UserId::new(77),
            display_name: String::from("Ada"),
            roles: BTreeSet::new(),
        })));

        Zone::new(
            String::from("Eastern-Plaguelands"),
            BTreeMap::from([(1, layer)]),
        )
    }

    #[test]
    fn handles_are_written_as_identifiers() {
        let zone = populated_zone();
        let doc = SnapshotDocument::encode([&zone], true, None);
        let json = serde_json::to_value(&doc).unwrap();

        let layer = &json["state"]["Eastern-Plaguelands"]["layers"]["1"];
        assert_eq!(layer["channel"], "epl-layer-1");
        assert_eq!(layer["table_message"], 11);
        assert_eq!(layer["status_message"], 12);
        assert_eq!(layer["timer"], "2023-05-01T10:00:00Z");
        assert_eq!(layer["spots"]["1"]["player"], 77);
        assert!(layer["spots"]["2"]["player"].is_null());
    }

    #[test]
    fn decoded_references_are_stored_and_equal_to_originals() {
        let zone = populated_zone();
        let doc = SnapshotDocument::encode([&zone], false, None);
        let json = serde_json::to_string(&doc).unwrap();
        let restored: SnapshotDocument = serde_json::from_str(&json).unwrap();
        let zones = restored.decode_zones().unwrap();

        let decoded = zones.get("Eastern-Plaguelands").unwrap();
        assert_eq!(decoded, &zone);

        let layer = decoded.layers.get(&1).unwrap();
        assert!(layer.channel.is_none());
        assert!(layer.table_message.unwrap().live().is_none());
        assert!(!layer.spot(1).unwrap().occupant().unwrap().is_live());
    }

    #[test]
    fn mismatched_spot_key_is_rejected() {
        let json = r#"{
            "state": {"Z": {"layers": {"1": {
                "channel_name": "z-1",
                "spots": {"3": {"name": "Mill", "number": 5, "player": null}}
            }}}},
            "initialized": false,
            "boot_time": null
        }"#;
        let doc: SnapshotDocument = serde_json::from_str(json).unwrap();
        assert_eq!(
            doc.decode_zones(),
            Err(DecodeError::SpotKeyMismatch {
                channel_name: String::from("z-1"),
                key: 3,
                number: 5,
            })
        );
    }
}
