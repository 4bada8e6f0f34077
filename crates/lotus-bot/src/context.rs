//! Shared bot state and the inbound message handler.
//!
//! [`BotContext`] owns the platform connector, the configuration and the
//! one [`StateStore`] of the process. The store sits behind a
//! [`tokio::sync::Mutex`]: a command holds the lock from lookup through
//! mutation, save and render, so no two commands interleave.
//!
//! ```text
//! message -> own? ignore -> allowed channel? -> prefixed? -> initialized?
//!         -> known command? (reply) -> role ok? (reply) -> run -> save -> render
//! ```
//!
//! A change that cannot be saved is rolled back before the error is
//! returned, so the in-memory tree never runs ahead of the snapshot.

use std::collections::BTreeSet;
use std::fmt::Display;

use chrono::Utc;
use lotus_core::config::LotusConfig;
use lotus_core::platform::ChatPlatform;
use lotus_core::render;
use lotus_core::signin::{self, Confirmation};
use lotus_core::store::StateStore;
use lotus_types::{ChannelHandle, Layer, Member, MessageHandle, Occupant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::command::{self, Command};
use crate::error::CommandError;

const UNKNOWN_COMMAND_REPLY: &str =
    "I do not recognize that command. Learn to type. Or read. Or both.";
const MISSING_ROLE_REPLY: &str = "You do not have the permissions to use that command. Newb.";
const NO_LAYER_REPLY: &str = "There is no lotus layer behind this channel.";
const UNSAVED_REPLY: &str = "Your request could not be saved, so nothing changed. Try again later.";

/// A message received from the platform.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Channel the message was posted in.
    pub channel: ChannelHandle,
    /// Who posted it.
    pub author: Member,
    /// The message itself, for deletion.
    pub message: MessageHandle,
    /// Raw message text.
    pub content: String,
}

/// Everything a command handler needs.
#[derive(Debug)]
pub struct BotContext<P> {
    platform: P,
    config: LotusConfig,
    authorized: BTreeSet<String>,
    store: Mutex<StateStore>,
}

impl<P: ChatPlatform> BotContext<P> {
    /// Wrap a reconciled store for serving commands.
    pub fn new(platform: P, config: LotusConfig, store: StateStore) -> Self {
        let authorized = config.authorized_channels();
        Self {
            platform,
            config,
            authorized,
            store: Mutex::new(store),
        }
    }

    /// The platform connector.
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// The loaded configuration.
    pub const fn config(&self) -> &LotusConfig {
        &self.config
    }

    /// Handle one inbound message.
    ///
    /// Messages that come from the bot itself, arrive in a channel outside
    /// the allow-list or are not commands are ignored. User mistakes are
    /// answered on the platform and are not errors.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if persisting, rendering or a platform call
    /// fails. A failed save undoes the change before returning.
    pub async fn handle(&self, event: &Inbound) -> Result<(), CommandError> {
        if event.author.id == self.platform.current_user() {
            return Ok(());
        }
        if !self.authorized.contains(&event.channel.name) {
            warn!(
                channel = %event.channel.name,
                author = %event.author.id,
                "Got message from unallowed channel"
            );
            return Ok(());
        }
        let Some(parsed) = command::parse(&self.config.bot.prefix, &event.content) else {
            return Ok(());
        };

        let mut store = self.store.lock().await;
        if !store.is_initialized() {
            warn!(content = %event.content, "Command before initialization dropped");
            return Ok(());
        }

        let command = match parsed {
            Ok(command) => command,
            Err(unknown) => {
                warn!(command = %unknown.name, content = %event.content, "Unrecognized command");
                return self.reply(event, UNKNOWN_COMMAND_REPLY).await;
            }
        };
        if command.requires_admin() && !event.author.has_role(self.config.bot.admin_role_id) {
            warn!(
                author = %event.author.display_name,
                content = %event.content,
                "Missing role for command"
            );
            return self.reply(event, MISSING_ROLE_REPLY).await;
        }

        let result = match command {
            Command::SignIn(args) => self.sign_in(&mut store, event, &args).await,
            Command::SignOut => self.sign_out(&mut store, event).await,
            Command::Picked => self.picked(&mut store, event).await,
            Command::Reset => self.reset(&mut store, event).await,
            Command::Help => {
                self.reply(event, &command::help_text(&self.config.bot.prefix))
                    .await
            }
        };
        match result {
            Err(CommandError::NoLayer(e)) => {
                info!(error = %e, "Layer command outside a layer channel");
                self.reply(event, NO_LAYER_REPLY).await
            }
            other => other,
        }
    }

    async fn sign_in(
        &self,
        store: &mut StateStore,
        event: &Inbound,
        args: &[String],
    ) -> Result<(), CommandError> {
        let location = store.find_layer_by_channel_name_mut(&event.channel.name)?;
        let before = location.layer.clone();
        let occupant = Occupant::Live(event.author.clone());
        let reply = match signin::sign_in(location, args, &occupant) {
            Ok(confirmation) => {
                self.commit_or_notify(store, event, before).await?;
                confirmation_text("Sign in confirmed.", &confirmation)
            }
            Err(e) => {
                info!(author = %event.author.id, reason = %e, "Sign-in rejected");
                rejection_text(event, &e, e.free_spots())
            }
        };
        self.platform.send_direct(event.author.id, &reply).await?;
        self.platform.delete_message(event.message).await?;
        Ok(())
    }

    async fn sign_out(&self, store: &mut StateStore, event: &Inbound) -> Result<(), CommandError> {
        let location = store.find_layer_by_channel_name_mut(&event.channel.name)?;
        let before = location.layer.clone();
        let reply = match signin::sign_out(location, event.author.id) {
            Ok(confirmation) => {
                self.commit_or_notify(store, event, before).await?;
                confirmation_text("Sign out confirmed.", &confirmation)
            }
            Err(e) => rejection_text(event, &e, &e.free),
        };
        self.platform.send_direct(event.author.id, &reply).await?;
        self.platform.delete_message(event.message).await?;
        Ok(())
    }

    async fn picked(&self, store: &mut StateStore, event: &Inbound) -> Result<(), CommandError> {
        let location = store.find_layer_by_channel_name_mut(&event.channel.name)?;
        let before = location.layer.clone();
        signin::record_pick(location, Utc::now());
        self.commit(store, &event.channel.name, before).await?;
        self.platform.delete_message(event.message).await?;
        Ok(())
    }

    async fn reset(&self, store: &mut StateStore, event: &Inbound) -> Result<(), CommandError> {
        let location = store.find_layer_by_channel_name_mut(&event.channel.name)?;
        let before = location.layer.clone();
        let cleared = signin::reset_layer(location);
        self.commit(store, &event.channel.name, before).await?;
        self.reply(event, &format!("Layer reset, {cleared} spots freed."))
            .await
    }

    /// Persist the whole tree, then refresh the views of the changed layer.
    ///
    /// If the save fails the layer is put back to `before`.
    async fn commit(
        &self,
        store: &mut StateStore,
        channel_name: &str,
        before: Layer,
    ) -> Result<(), CommandError> {
        if let Err(e) = store.save(&self.config.bot.state_path) {
            *store.find_layer_by_channel_name_mut(channel_name)?.layer = before;
            warn!(error = %e, channel = channel_name, "Save failed, change rolled back");
            return Err(e.into());
        }
        let location = store.find_layer_by_channel_name(channel_name)?;
        render::refresh_layer(&self.platform, location, &self.config.timer).await?;
        Ok(())
    }

    /// [`Self::commit`], telling the requester privately when nothing was kept.
    async fn commit_or_notify(
        &self,
        store: &mut StateStore,
        event: &Inbound,
        before: Layer,
    ) -> Result<(), CommandError> {
        let result = self.commit(store, &event.channel.name, before).await;
        if matches!(result, Err(CommandError::Save(_))) {
            let notice = self.platform.send_direct(event.author.id, UNSAVED_REPLY).await;
            if let Err(e) = notice {
                warn!(error = %e, author = %event.author.id, "Could not report failed save");
            }
        }
        result
    }

    async fn reply(&self, event: &Inbound, text: &str) -> Result<(), CommandError> {
        self.platform.send_message(event.channel.id, text).await?;
        Ok(())
    }
}

fn confirmation_text(header: &str, confirmation: &Confirmation) -> String {
    let spots: Vec<String> = confirmation.spots.iter().map(render::spot_label).collect();
    format!(
        "{header}\nZone: {} | Layer: {}\n{}",
        confirmation.zone,
        confirmation.layer,
        spots.join("\n")
    )
}

fn rejection_text(event: &Inbound, reason: &dyn Display, free: &[u32]) -> String {
    format!(
        "You sent `{}` in {}\nRequest rejected: {reason}\nYou can choose from the following: {free:?}",
        event.content,
        event.channel.mention()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use lotus_core::platform::InMemoryPlatform;
    use lotus_core::reconcile::Reconciler;
    use lotus_types::{RoleId, UserId};
    use tempfile::TempDir;

    use super::*;

    const BOT: UserId = UserId::new(1);

    fn member(id: u64, roles: &[RoleId]) -> Member {
        Member {
            id: UserId::new(id),
            display_name: format!("user-{id}"),
            roles: roles.iter().copied().collect(),
        }
    }

    fn platform() -> InMemoryPlatform {
        InMemoryPlatform::with_channels(
            BOT,
            ["epl-layer-1", "epl-layer-2", "lotus-timer-callouts", "general"],
        )
    }

    fn config(dir: &TempDir) -> LotusConfig {
        let mut config = LotusConfig::default();
        config.bot.state_path = dir.path().join("state.json");
        config
    }

    async fn ready() -> (BotContext<InMemoryPlatform>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let platform = platform();
        let mut store = StateStore::open(&config.bot.state_path, &config, Utc::now()).unwrap();
        Reconciler::new(&platform, config.bot.platform_timeout(), &config.timer)
            .run(&mut store, &config.bot.state_path)
            .await
            .unwrap();
        (BotContext::new(platform, config, store), dir)
    }

    /// A reconciled context whose snapshot path cannot be written.
    async fn unwritable() -> (BotContext<InMemoryPlatform>, TempDir) {
        let (context, dir) = ready().await;
        let BotContext {
            platform,
            mut config,
            store,
            ..
        } = context;
        config.bot.state_path = dir.path().join("missing").join("state.json");
        (BotContext::new(platform, config, store.into_inner()), dir)
    }

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn post(
        context: &BotContext<InMemoryPlatform>,
        channel: &str,
        author: &Member,
        content: &str,
    ) -> Inbound {
        let channel = context.platform().channel_by_name(channel).unwrap();
        let message = context.platform().inject_message(channel.id, content).unwrap();
        Inbound {
            channel,
            author: author.clone(),
            message,
            content: content.to_owned(),
        }
    }

    fn saved(context: &BotContext<InMemoryPlatform>) -> StateStore {
        StateStore::load(&context.config().bot.state_path)
            .unwrap()
            .unwrap()
    }

    fn table_text(context: &BotContext<InMemoryPlatform>, channel: &str) -> String {
        let store = saved(context);
        let id = store
            .find_layer_by_channel_name(channel)
            .unwrap()
            .layer
            .table_message
            .unwrap()
            .id();
        context.platform().message_content(id).unwrap()
    }

    #[tokio::test]
    async fn sign_in_is_confirmed_privately() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);
        let event = post(&context, "epl-layer-1", &ada, ">signin 3");

        context.handle(&event).await.unwrap();

        assert_eq!(
            context.platform().direct_messages(ada.id),
            vec!["Sign in confirmed.\nZone: Eastern-Plaguelands | Layer: 1\n:three: - **__Naxx__**"]
        );
        assert_eq!(context.platform().deleted_messages(), vec![event.message.id]);
        let store = saved(&context);
        let layer = store.find_layer_by_channel_name("epl-layer-1").unwrap().layer;
        assert!(layer.spot(3).unwrap().is_held_by(ada.id));
        assert!(table_text(&context, "epl-layer-1").contains(":three: | **__Naxx__** - <@42>"));
    }

    #[tokio::test]
    async fn taken_spot_is_explained_with_free_list() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);
        let bob = member(43, &[]);
        context
            .handle(&post(&context, "epl-layer-1", &ada, ">signin 3"))
            .await
            .unwrap();

        let event = post(&context, "epl-layer-1", &bob, ">signin 3 4");
        context.handle(&event).await.unwrap();

        let dms = context.platform().direct_messages(bob.id);
        assert_eq!(dms.len(), 1);
        let dm = dms.first().unwrap();
        assert!(dm.starts_with(&format!(
            "You sent `>signin 3 4` in {}\n",
            event.channel.mention()
        )));
        assert!(dm.contains("spot 3 is already taken"));
        assert!(dm.ends_with("You can choose from the following: [1, 2, 4, 5, 6, 7, 8, 9, 10]"));
        assert!(context.platform().deleted_messages().contains(&event.message.id));

        let store = saved(&context);
        let layer = store.find_layer_by_channel_name("epl-layer-1").unwrap().layer;
        assert!(layer.spot(4).unwrap().is_free());
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let (context, _dir) = ready().await;
        let bot = member(BOT.into_inner(), &[]);

        context
            .handle(&post(&context, "epl-layer-1", &bot, ">signin 1"))
            .await
            .unwrap();

        assert!(context.platform().direct_messages(BOT).is_empty());
        assert!(context.platform().deleted_messages().is_empty());
    }

    #[tokio::test]
    async fn unallowed_channel_is_ignored() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);

        context
            .handle(&post(&context, "general", &ada, ">signin 1"))
            .await
            .unwrap();

        assert!(context.platform().direct_messages(ada.id).is_empty());
        assert_eq!(context.platform().messages_in("general"), vec![">signin 1"]);
    }

    #[tokio::test]
    async fn unallowed_channel_chatter_is_logged() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        context
            .handle(&post(&context, "general", &ada, "anyone up for lotus?"))
            .await
            .unwrap();

        assert!(logs.contents().contains("Got message from unallowed channel"));
        assert_eq!(context.platform().messages_in("general"), vec!["anyone up for lotus?"]);
    }

    #[tokio::test]
    async fn failed_save_rolls_back_and_tells_the_requester() {
        let (context, _dir) = unwritable().await;
        let ada = member(42, &[]);
        let event = post(&context, "epl-layer-1", &ada, ">signin 3");

        let err = context.handle(&event).await.unwrap_err();

        assert!(matches!(err, CommandError::Save(_)));
        {
            let store = context.store.lock().await;
            let layer = store.find_layer_by_channel_name("epl-layer-1").unwrap().layer;
            assert!(layer.spot(3).unwrap().is_free());
        }
        assert_eq!(context.platform().direct_messages(ada.id), vec![UNSAVED_REPLY]);
        assert!(context.platform().deleted_messages().is_empty());
    }

    #[tokio::test]
    async fn failed_save_undoes_pick_and_reset() {
        let (context, _dir) = unwritable().await;
        let admin = member(7, &[context.config().bot.admin_role_id]);
        {
            let mut store = context.store.lock().await;
            let location = store.find_layer_by_channel_name_mut("epl-layer-2").unwrap();
            location
                .layer
                .spot_mut(4)
                .unwrap()
                .set_occupant(Some(Occupant::Stored(UserId::new(42))));
        }

        let picked = context
            .handle(&post(&context, "epl-layer-2", &admin, ">picked"))
            .await;
        let reset = context
            .handle(&post(&context, "epl-layer-2", &admin, ">reset"))
            .await;

        assert!(matches!(picked, Err(CommandError::Save(_))));
        assert!(matches!(reset, Err(CommandError::Save(_))));
        let store = context.store.lock().await;
        let layer = store.find_layer_by_channel_name("epl-layer-2").unwrap().layer;
        assert!(layer.last_event_time.is_none());
        assert!(layer.spot(4).unwrap().is_held_by(UserId::new(42)));
    }

    #[tokio::test]
    async fn unknown_command_gets_a_reply() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);

        context
            .handle(&post(&context, "epl-layer-2", &ada, ">dance"))
            .await
            .unwrap();

        let messages = context.platform().messages_in("epl-layer-2");
        assert_eq!(messages.last().map(String::as_str), Some(UNKNOWN_COMMAND_REPLY));
    }

    #[tokio::test]
    async fn reset_needs_admin_role() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);
        let admin = member(7, &[context.config().bot.admin_role_id]);
        context
            .handle(&post(&context, "epl-layer-1", &ada, ">signin 1 2"))
            .await
            .unwrap();

        context
            .handle(&post(&context, "epl-layer-1", &ada, ">reset"))
            .await
            .unwrap();
        let messages = context.platform().messages_in("epl-layer-1");
        assert!(messages.iter().any(|m| m == MISSING_ROLE_REPLY));
        assert_eq!(
            saved(&context)
                .find_layer_by_channel_name("epl-layer-1")
                .unwrap()
                .layer
                .free_spot_count(),
            8
        );

        context
            .handle(&post(&context, "epl-layer-1", &admin, ">reset"))
            .await
            .unwrap();
        let messages = context.platform().messages_in("epl-layer-1");
        assert!(messages.iter().any(|m| m == "Layer reset, 2 spots freed."));
        assert_eq!(
            saved(&context)
                .find_layer_by_channel_name("epl-layer-1")
                .unwrap()
                .layer
                .free_spot_count(),
            10
        );
    }

    #[tokio::test]
    async fn layer_command_in_timer_channel_is_answered() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);

        context
            .handle(&post(&context, "lotus-timer-callouts", &ada, ">signin 1"))
            .await
            .unwrap();

        let messages = context.platform().messages_in("lotus-timer-callouts");
        assert_eq!(messages.last().map(String::as_str), Some(NO_LAYER_REPLY));
        assert!(context.platform().direct_messages(ada.id).is_empty());
    }

    #[tokio::test]
    async fn sign_out_releases_own_spots() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);
        context
            .handle(&post(&context, "epl-layer-2", &ada, ">signin 5 6"))
            .await
            .unwrap();

        context
            .handle(&post(&context, "epl-layer-2", &ada, ">signout"))
            .await
            .unwrap();

        let dms = context.platform().direct_messages(ada.id);
        assert_eq!(
            dms.last().map(String::as_str),
            Some(
                "Sign out confirmed.\nZone: Eastern-Plaguelands | Layer: 2\n\
                 :five: - **__Mill__**\n:six: - **__Noxious Glade__**"
            )
        );
        assert!(!table_text(&context, "epl-layer-2").contains("<@42>"));

        context
            .handle(&post(&context, "epl-layer-2", &ada, ">signout"))
            .await
            .unwrap();
        let dms = context.platform().direct_messages(ada.id);
        assert!(dms.last().unwrap().contains("do not hold any spot"));
    }

    #[tokio::test]
    async fn picked_starts_the_timer() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);
        let event = post(&context, "epl-layer-1", &ada, ">picked");

        context.handle(&event).await.unwrap();

        let store = saved(&context);
        let location = store.find_layer_by_channel_name("epl-layer-1").unwrap();
        assert!(location.layer.last_event_time.is_some());
        let status_id = location.layer.status_message.unwrap().id();
        let status = context.platform().message_content(status_id).unwrap();
        assert!(!status.contains("¯\\_(ツ)_/¯"));
        assert!(context.platform().deleted_messages().contains(&event.message.id));
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let (context, _dir) = ready().await;
        let ada = member(42, &[]);

        context
            .handle(&post(&context, "lotus-timer-callouts", &ada, ">help"))
            .await
            .unwrap();

        let messages = context.platform().messages_in("lotus-timer-callouts");
        assert!(messages.last().unwrap().starts_with("**Lotus bot commands**"));
    }

    #[tokio::test]
    async fn commands_before_initialization_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let store = StateStore::open(&config.bot.state_path, &config, Utc::now()).unwrap();
        let context = BotContext::new(platform(), config, store);
        let ada = member(42, &[]);

        context
            .handle(&post(&context, "epl-layer-1", &ada, ">signin 1"))
            .await
            .unwrap();

        assert!(context.platform().direct_messages(ada.id).is_empty());
        assert!(!context.config().bot.state_path.exists());
    }
}
