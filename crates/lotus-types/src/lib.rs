//! Shared type definitions for the lotus spot tracker.
//!
//! This crate holds the Zone / Layer / Spot data model, the typed platform
//! identifiers, the live handle types the connector hands out, and the
//! snapshot records that define what is written to disk.
//!
//! # Modules
//!
//! - [`ids`] -- Snowflake newtypes for users, channels, messages and roles
//! - [`handles`] -- Live platform handles and the `Stored`/`Live` references
//! - [`model`] -- The Zone / Layer / Spot tree
//! - [`snapshot`] -- Persisted records and their encode/decode contract
//! - [`timestamp`] -- ISO-8601 timestamp codec

pub mod handles;
pub mod ids;
pub mod model;
pub mod snapshot;
pub mod timestamp;

// Re-export all public types at crate root for convenience.
pub use handles::{ChannelHandle, Member, MessageHandle, MessageRef, Occupant, mention_user};
pub use ids::{ChannelId, MessageId, RoleId, UserId};
pub use model::{Layer, Spot, Zone};
pub use snapshot::{DecodeError, LayerRecord, SnapshotDocument, SpotRecord, ZoneRecord};
