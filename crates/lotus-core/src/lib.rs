//! Core of the lotus spot tracker: state, workflow and startup sync.
//!
//! The tree of zones, layers and spots is owned by a single
//! [`StateStore`](store::StateStore). Commands mutate it through the
//! [`signin`] workflow, every mutation is followed by a snapshot save, and
//! the [`reconcile`] step rebinds the loaded tree to the live platform once
//! per process.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `lotus-config.yaml`.
//! - [`platform`] -- [`ChatPlatform`] trait and [`InMemoryPlatform`].
//! - [`reconcile`] -- Startup rebinding of channels, messages and members.
//! - [`render`] -- Status and table views of a layer.
//! - [`signin`] -- Sign-in, sign-out, reset and pick recording.
//! - [`store`] -- The state store and its snapshot persistence.
//!
//! [`ChatPlatform`]: platform::ChatPlatform
//! [`InMemoryPlatform`]: platform::InMemoryPlatform

pub mod config;
pub mod platform;
pub mod reconcile;
pub mod render;
pub mod signin;
pub mod store;
