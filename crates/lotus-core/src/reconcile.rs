//! Startup reconciliation: rebinding persisted identifiers to live handles.
//!
//! After a load every channel, message and occupant in the tree is a bare
//! identifier. The [`Reconciler`] runs once, after the platform connection
//! is up and before any command is served:
//!
//! ```text
//! 1. bind channels     name -> ChannelHandle          missing channel   => fatal
//! 2. bind messages     all IDs present? fetch both     missing message   => fatal
//!                      otherwise purge + post two placeholders per layer
//! 3. bind occupants    UserId -> Member                unknown member    => warn, keep ID
//! 4. render            edit status + table messages
//! 5. mark initialized and save
//! ```
//!
//! Every connector call is bounded by the configured timeout so a stuck
//! request fails startup instead of hanging it.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use lotus_types::{ChannelHandle, ChannelId, Layer, MessageId, MessageRef, Occupant, UserId};
use tracing::{error, info, warn};

use crate::config::TimerConfig;
use crate::platform::{ChatPlatform, PlatformError};
use crate::render::{self, PLACEHOLDER, RenderError};
use crate::store::{SaveError, StateStore};

/// Posted in a layer channel whose bot message has vanished.
const MISSING_MESSAGE_NOTICE: &str =
    "Couldn't find my info message in here - ask an admin to check the bot!";

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A configured layer channel does not exist on the server.
    #[error("channel {channel_name} not found (server has: {available:?})")]
    ChannelMissing {
        /// The missing channel.
        channel_name: String,
        /// Channel names the server does have.
        available: Vec<String>,
    },

    /// A previously recorded layer message could not be fetched.
    #[error("{zone} layer {layer}: message {message} is gone")]
    MessageMissing {
        /// Zone of the layer.
        zone: String,
        /// Layer number.
        layer: u32,
        /// The message that could not be fetched.
        message: MessageId,
    },

    /// A connector call did not finish in time.
    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        /// Description of the call.
        operation: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// A connector call failed.
    #[error("{operation} failed: {source}")]
    Platform {
        /// Description of the call.
        operation: String,
        /// The underlying connector error.
        source: PlatformError,
    },

    /// Rendering the initial views failed.
    #[error("initial render failed: {0}")]
    Render(#[from] RenderError),

    /// Persisting the reconciled state failed.
    #[error("failed to persist reconciled state: {0}")]
    Save(#[from] SaveError),
}

/// What the reconciler did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Number of layers bound.
    pub layers: usize,
    /// Whether layer channels were purged and fresh messages posted.
    pub recreated_messages: bool,
    /// Occupants resolved to live members.
    pub members_resolved: usize,
    /// Occupants left as bare identifiers.
    pub members_unresolved: Vec<UserId>,
}

/// Runs the startup resynchronization against a connector.
#[derive(Debug)]
pub struct Reconciler<'a, P> {
    platform: &'a P,
    timeout: Duration,
    timer: &'a TimerConfig,
}

impl<'a, P: ChatPlatform> Reconciler<'a, P> {
    /// Create a reconciler bounding each connector call by `timeout`.
    pub const fn new(platform: &'a P, timeout: Duration, timer: &'a TimerConfig) -> Self {
        Self {
            platform,
            timeout,
            timer,
        }
    }

    /// Rebind every handle in `store`, render all layers, then mark the
    /// store initialized and save it to `path`.
    ///
    /// # Errors
    ///
    /// Any [`ReconcileError`] is fatal: the process must not serve commands
    /// against a tree that disagrees with the platform.
    pub async fn run(
        &self,
        store: &mut StateStore,
        path: &Path,
    ) -> Result<ReconcileReport, ReconcileError> {
        let layers = self.bind_channels(store).await?;

        let resumed = store.layers().all(|location| location.layer.has_message_ids());
        if resumed {
            self.fetch_messages(store).await?;
        } else {
            warn!("Layer messages were not initialized, posting fresh ones");
            self.recreate_messages(store).await?;
        }

        let (members_resolved, members_unresolved) = self.resolve_occupants(store).await;

        for location in store.layers() {
            self.bounded(
                "render layer",
                render::refresh_layer(self.platform, location, self.timer),
            )
            .await??;
        }

        store.mark_initialized();
        store.save(path)?;

        let report = ReconcileReport {
            layers,
            recreated_messages: !resumed,
            members_resolved,
            members_unresolved,
        };
        info!(
            layers = report.layers,
            recreated_messages = report.recreated_messages,
            members_resolved = report.members_resolved,
            members_unresolved = report.members_unresolved.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Step 1: attach a live channel to every layer.
    async fn bind_channels(&self, store: &mut StateStore) -> Result<usize, ReconcileError> {
        let channels: BTreeMap<String, ChannelHandle> = self
            .call("list channels", self.platform.channels())
            .await?
            .into_iter()
            .map(|channel| (channel.name.clone(), channel))
            .collect();

        let mut bound = 0_usize;
        for location in store.layers_mut() {
            let layer = location.layer;
            let Some(channel) = channels.get(&layer.channel_name) else {
                error!(channel = %layer.channel_name, "Configured layer channel not found");
                return Err(ReconcileError::ChannelMissing {
                    channel_name: layer.channel_name.clone(),
                    available: channels.keys().cloned().collect(),
                });
            };
            layer.channel = Some(channel.clone());
            bound = bound.saturating_add(1);
        }
        Ok(bound)
    }

    /// Step 2, resumed state: fetch both recorded messages of every layer.
    async fn fetch_messages(&self, store: &mut StateStore) -> Result<(), ReconcileError> {
        for location in store.layers_mut() {
            let layer = location.layer;
            let channel = bound_channel(layer)?;
            for slot in [&mut layer.table_message, &mut layer.status_message] {
                let Some(reference) = slot.as_ref() else {
                    continue;
                };
                let id = reference.id();
                let fetched = self
                    .bounded("fetch layer message", self.platform.fetch_message(channel, id))
                    .await?;
                match fetched {
                    Ok(handle) => *slot = Some(MessageRef::Live(handle)),
                    Err(e) if e.is_not_found() => {
                        error!(
                            zone = location.zone,
                            layer = location.number,
                            message = %id,
                            "Recorded layer message is gone"
                        );
                        // Best effort: the process is about to stop anyway.
                        if let Err(notice_err) = self
                            .call(
                                "post missing-message notice",
                                self.platform.send_message(channel, MISSING_MESSAGE_NOTICE),
                            )
                            .await
                        {
                            warn!(error = %notice_err, "Could not post missing-message notice");
                        }
                        return Err(ReconcileError::MessageMissing {
                            zone: location.zone.to_owned(),
                            layer: location.number,
                            message: id,
                        });
                    }
                    Err(source) => {
                        return Err(ReconcileError::Platform {
                            operation: String::from("fetch layer message"),
                            source,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Step 2, fresh state: wipe every layer channel and post placeholders.
    async fn recreate_messages(&self, store: &mut StateStore) -> Result<(), ReconcileError> {
        for location in store.layers_mut() {
            let layer = location.layer;
            let channel = bound_channel(layer)?;

            let purged = self
                .call("purge layer channel", self.platform.purge_channel(channel))
                .await?;
            let status = self
                .call(
                    "post status message",
                    self.platform.send_message(channel, PLACEHOLDER),
                )
                .await?;
            let table = self
                .call(
                    "post table message",
                    self.platform.send_message(channel, PLACEHOLDER),
                )
                .await?;

            layer.status_message = Some(MessageRef::Live(status));
            layer.table_message = Some(MessageRef::Live(table));
            info!(
                zone = location.zone,
                layer = location.number,
                purged,
                "Layer messages recreated"
            );
        }
        Ok(())
    }

    /// Step 3: swap stored occupant IDs for live members where possible.
    ///
    /// Failures never abort startup: the spot keeps the bare identifier,
    /// which still renders as a mention and still blocks the spot.
    async fn resolve_occupants(&self, store: &mut StateStore) -> (usize, Vec<UserId>) {
        let mut resolved = 0_usize;
        let mut unresolved = Vec::new();

        for location in store.layers_mut() {
            for spot in location.layer.spots_mut() {
                let Some(Occupant::Stored(user)) = spot.occupant().cloned() else {
                    continue;
                };
                match self
                    .call("resolve member", self.platform.resolve_member(user))
                    .await
                {
                    Ok(Some(member)) => {
                        spot.set_occupant(Some(Occupant::Live(member)));
                        resolved = resolved.saturating_add(1);
                    }
                    Ok(None) => {
                        warn!(user = %user, spot = spot.number(), "Failed to find member");
                        unresolved.push(user);
                    }
                    Err(e) => {
                        warn!(user = %user, spot = spot.number(), error = %e, "Member lookup failed");
                        unresolved.push(user);
                    }
                }
            }
        }
        (resolved, unresolved)
    }

    /// Await a connector call under the timeout and map its error.
    async fn call<T: Send>(
        &self,
        operation: &str,
        future: impl Future<Output = Result<T, PlatformError>> + Send,
    ) -> Result<T, ReconcileError> {
        self.bounded(operation, future)
            .await?
            .map_err(|source| ReconcileError::Platform {
                operation: operation.to_owned(),
                source,
            })
    }

    /// Await any future under the timeout, leaving its output untouched.
    async fn bounded<T: Send>(
        &self,
        operation: &str,
        future: impl Future<Output = T> + Send,
    ) -> Result<T, ReconcileError> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|elapsed| {
                warn!(operation, %elapsed, "Connector call timed out");
                ReconcileError::Timeout {
                    operation: operation.to_owned(),
                    timeout: self.timeout,
                }
            })
    }
}

fn bound_channel(layer: &Layer) -> Result<ChannelId, ReconcileError> {
    layer
        .channel
        .as_ref()
        .map(|channel| channel.id)
        .ok_or_else(|| ReconcileError::ChannelMissing {
            channel_name: layer.channel_name.clone(),
            available: Vec::new(),
        })
}
