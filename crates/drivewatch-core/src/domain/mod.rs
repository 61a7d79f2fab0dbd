//! Domain entities and business logic
//!
//! This module contains the core domain types for drivewatch:
//! - Newtypes for type-safe identifiers and validated domain types
//! - Remote items and the change events derived from them
//! - Channel descriptors, inbound notifications, and token signing
//! - The pure snapshot diff planner
//! - Domain-specific error types

pub mod channel;
pub mod diff;
pub mod errors;
pub mod event;
pub mod item;
pub mod newtypes;
pub mod notification;
pub mod signing;

// Re-export commonly used types
pub use channel::{ChannelDescriptor, ChannelRequest};
pub use diff::{
    plan_reconciliation, CacheBatch, ReconcilePlan, ScopeListing, ScopeState, SnapshotIndex,
};
pub use errors::{DomainError, RemoteError};
pub use event::{ChangeEvent, DeletionCause};
pub use item::{Item, ItemKind};
pub use newtypes::*;
pub use notification::{Notification, ResourceState};
pub use signing::ChannelSigner;
