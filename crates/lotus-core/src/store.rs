//! The state store: sole owner of the Zone / Layer / Spot tree.
//!
//! Exactly one [`StateStore`] exists per process. It is built once at
//! startup (from a snapshot or from configuration) and then handed by
//! reference to everything that needs it; there is no global accessor.
//! Callers serialize mutations and the following [`StateStore::save`]
//! through a single writer (the bot holds the store behind a mutex).
//!
//! # Persistence
//!
//! ```text
//! StateStore --to_document()--> SnapshotDocument --serde_json--> <path>.tmp --rename--> <path>
//! <path> --serde_json--> SnapshotDocument --from_document()--> StateStore (references Stored)
//! ```
//!
//! The whole tree is rewritten on every save. The rename makes each save
//! atomic, so a reader never observes a partially written snapshot.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lotus_types::{DecodeError, Layer, SnapshotDocument, Spot, Zone};
use tracing::{debug, info, warn};

use crate::config::{LotusConfig, ZoneConfig};

// =========================================================================
// Error types
// =========================================================================

/// Errors that can occur while reading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The snapshot exists but could not be read.
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        /// Snapshot location.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The snapshot was read but does not describe a valid tree.
    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt {
        /// Snapshot location.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors that can occur while writing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// The tree could not be serialized.
    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The snapshot file could not be written or moved into place.
    #[error("failed to write snapshot {path}: {source}")]
    Io {
        /// File that was being written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// No layer is backed by the given channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no layer uses channel {channel_name}")]
pub struct LayerNotFound {
    /// The channel name that was looked up.
    pub channel_name: String,
}

// =========================================================================
// Lookup results
// =========================================================================

/// A layer together with its position in the tree.
#[derive(Debug, Clone, Copy)]
pub struct LayerLocation<'a> {
    /// Name of the owning zone.
    pub zone: &'a str,
    /// Layer number within the zone.
    pub number: u32,
    /// The layer itself.
    pub layer: &'a Layer,
}

/// A mutable layer together with its position in the tree.
#[derive(Debug)]
pub struct LayerLocationMut<'a> {
    /// Name of the owning zone.
    pub zone: &'a str,
    /// Layer number within the zone.
    pub number: u32,
    /// The layer itself.
    pub layer: &'a mut Layer,
}

// =========================================================================
// StateStore
// =========================================================================

/// The full tracker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStore {
    zones: BTreeMap<String, Zone>,
    initialized: bool,
    boot_time: Option<DateTime<Utc>>,
}

impl StateStore {
    /// Build a fresh tree from configuration.
    ///
    /// Every spot is free, no layer has a channel, messages or a timer,
    /// and the store is not initialized.
    pub fn initialize_fresh(config: &LotusConfig) -> Self {
        let zones = config
            .zones
            .iter()
            .map(|zone| (zone.name.clone(), build_zone(zone)))
            .collect();
        Self {
            zones,
            initialized: false,
            boot_time: None,
        }
    }

    /// Read a snapshot from disk.
    ///
    /// Returns `Ok(None)` when no snapshot exists; the caller then builds
    /// a fresh tree. All platform references come back in the `Stored`
    /// state and must be rebound by the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Corrupt`] if the file is not a valid snapshot
    /// and [`LoadError::Io`] for any other read failure.
    pub fn load(path: &Path) -> Result<Option<Self>, LoadError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found");
                return Ok(None);
            }
            Err(source) => {
                return Err(LoadError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let document: SnapshotDocument =
            serde_json::from_str(&contents).map_err(|e| LoadError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let store = Self::from_document(document).map_err(|e| LoadError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        info!(
            path = %path.display(),
            zones = store.zones.len(),
            was_initialized = store.initialized,
            "Snapshot loaded"
        );
        Ok(Some(store))
    }

    /// Load the snapshot at `path`, or build a fresh tree if there is none.
    ///
    /// The returned store is never initialized (the reconciler has not run
    /// in this process yet) and carries `boot_time`. Differences between the
    /// loaded tree and the configuration are logged, not migrated.
    ///
    /// # Errors
    ///
    /// Propagates [`LoadError`] from [`load`](Self::load).
    pub fn open(
        path: &Path,
        config: &LotusConfig,
        boot_time: DateTime<Utc>,
    ) -> Result<Self, LoadError> {
        let mut store = if let Some(store) = Self::load(path)? {
            for problem in store.config_drift(config) {
                warn!(path = %path.display(), problem, "Snapshot differs from configuration");
            }
            store
        } else {
            info!("Building fresh state from configuration");
            Self::initialize_fresh(config)
        };
        store.initialized = false;
        store.boot_time = Some(boot_time);
        Ok(store)
    }

    /// Write the whole tree to `path`, replacing any previous snapshot.
    ///
    /// The document is written to a sibling `.tmp` file, flushed, and
    /// renamed over `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError`] if serialization or any file operation fails.
    pub fn save(&self, path: &Path) -> Result<(), SaveError> {
        let bytes = serde_json::to_vec_pretty(&self.to_document())?;
        let tmp_path = temp_path(path);

        let write = |target: &Path| -> std::io::Result<()> {
            let mut file = File::create(target)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        write(&tmp_path).map_err(|source| SaveError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| SaveError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "Snapshot saved");
        Ok(())
    }

    /// Encode the tree into its persisted form.
    pub fn to_document(&self) -> SnapshotDocument {
        SnapshotDocument::encode(self.zones.values(), self.initialized, self.boot_time)
    }

    /// Rebuild a store from its persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if a spot's key disagrees with its number.
    pub fn from_document(document: SnapshotDocument) -> Result<Self, DecodeError> {
        let initialized = document.initialized;
        let boot_time = document.boot_time;
        Ok(Self {
            zones: document.decode_zones()?,
            initialized,
            boot_time,
        })
    }

    // -------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------

    /// Find the layer whose channel is named `channel_name`.
    ///
    /// The tree holds tens of layers at most, so this is a linear scan.
    pub fn find_layer_by_channel_name(
        &self,
        channel_name: &str,
    ) -> Result<LayerLocation<'_>, LayerNotFound> {
        self.layers()
            .find(|location| location.layer.channel_name == channel_name)
            .ok_or_else(|| LayerNotFound {
                channel_name: channel_name.to_owned(),
            })
    }

    /// Mutable twin of [`find_layer_by_channel_name`](Self::find_layer_by_channel_name).
    pub fn find_layer_by_channel_name_mut(
        &mut self,
        channel_name: &str,
    ) -> Result<LayerLocationMut<'_>, LayerNotFound> {
        self.layers_mut()
            .find(|location| location.layer.channel_name == channel_name)
            .ok_or_else(|| LayerNotFound {
                channel_name: channel_name.to_owned(),
            })
    }

    /// Every layer in zone-name then layer-number order.
    pub fn layers(&self) -> impl Iterator<Item = LayerLocation<'_>> {
        self.zones.iter().flat_map(|(zone, z)| {
            z.layers.iter().map(move |(&number, layer)| LayerLocation {
                zone: zone.as_str(),
                number,
                layer,
            })
        })
    }

    /// Every layer, mutably, in zone-name then layer-number order.
    pub fn layers_mut(&mut self) -> impl Iterator<Item = LayerLocationMut<'_>> {
        self.zones.iter_mut().flat_map(|(zone, z)| {
            z.layers.iter_mut().map(move |(&number, layer)| LayerLocationMut {
                zone: zone.as_str(),
                number,
                layer,
            })
        })
    }

    /// Whether the reconciler has completed in this process.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Record that the reconciler has completed.
    pub const fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// When the current process started.
    pub const fn boot_time(&self) -> Option<DateTime<Utc>> {
        self.boot_time
    }

    // -------------------------------------------------------------------
    // Configuration drift
    // -------------------------------------------------------------------

    /// Describe every way the tree differs from what `config` would build.
    ///
    /// An empty result means the snapshot matches the configuration.
    pub fn config_drift(&self, config: &LotusConfig) -> Vec<String> {
        let mut problems = Vec::new();

        for zone_cfg in &config.zones {
            let Some(zone) = self.zones.get(&zone_cfg.name) else {
                problems.push(format!("zone {} is configured but not stored", zone_cfg.name));
                continue;
            };
            for number in zone_cfg.layer_numbers() {
                let Some(layer) = zone.layers.get(&number) else {
                    problems.push(format!("{} layer {number} is not stored", zone_cfg.name));
                    continue;
                };
                let expected = zone_cfg.channel_name(number);
                if layer.channel_name != expected {
                    problems.push(format!(
                        "{} layer {number} uses channel {} instead of {expected}",
                        zone_cfg.name, layer.channel_name
                    ));
                }
                let stored: Vec<(u32, &str)> =
                    layer.spots().map(|s| (s.number(), s.name())).collect();
                let configured: Vec<(u32, &str)> = sorted_spots(zone_cfg);
                if stored != configured {
                    problems.push(format!(
                        "{} layer {number} spots differ from configuration",
                        zone_cfg.name
                    ));
                }
            }
            if zone.layers.len() != zone_cfg.layer_numbers().count() {
                problems.push(format!(
                    "{} stores {} layers, configuration has {}",
                    zone_cfg.name,
                    zone.layers.len(),
                    zone_cfg.layers
                ));
            }
        }

        for name in self.zones.keys() {
            if !config.zones.iter().any(|z| &z.name == name) {
                problems.push(format!("zone {name} is stored but not configured"));
            }
        }
        problems
    }
}

fn build_zone(config: &ZoneConfig) -> Zone {
    let layers = config
        .layer_numbers()
        .map(|number| {
            let spots = config
                .spots
                .iter()
                .map(|spot| Spot::free(spot.name.clone(), spot.number));
            (number, Layer::new(config.channel_name(number), spots))
        })
        .collect();
    Zone::new(config.name.clone(), layers)
}

fn sorted_spots(config: &ZoneConfig) -> Vec<(u32, &str)> {
    let mut spots: Vec<(u32, &str)> = config
        .spots
        .iter()
        .map(|s| (s.number, s.name.as_str()))
        .collect();
    spots.sort_unstable_by_key(|&(number, _)| number);
    spots
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
