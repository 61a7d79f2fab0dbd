//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Paginated listing and item lookup on the remote store
//! - [`IChannelApi`] - Opening and stopping push-notification channels
//! - [`ISnapshotCache`] - Durable last-known item metadata
//! - [`IChannelRegistry`] - Durable channel descriptors keyed by scope
//! - [`IEventEmitter`] - Delivery of reconciled change events

pub mod channel_api;
pub mod channel_registry;
pub mod event_emitter;
pub mod remote_store;
pub mod snapshot_cache;

pub use channel_api::IChannelApi;
pub use channel_registry::IChannelRegistry;
pub use event_emitter::IEventEmitter;
pub use remote_store::{IRemoteStore, ItemPage};
pub use snapshot_cache::{CacheCounts, ISnapshotCache};
