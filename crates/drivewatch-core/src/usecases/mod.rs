//! Use cases (interactors) for drivewatch
//!
//! This module contains the application use cases that orchestrate
//! domain entities and port interfaces. Use cases are thin coordinators
//! that delegate business rules to domain methods and I/O to ports.
//!
//! ## Use Cases
//!
//! - [`ValidateNotificationUseCase`] - Authenticity and freshness checks on inbound notifications
//! - [`ReconcileScopeUseCase`] - List, diff, emit, and commit one scope
//! - [`ChannelManager`] - Channel creation, renewal, and retirement

pub mod manage_channels;
pub mod reconcile_scope;
pub mod validate_notification;

pub use manage_channels::{
    ChannelError, ChannelManager, ChannelSettings, ChannelSyncReport, WatchOutcome,
};
pub use reconcile_scope::{ReconcileError, ReconcileOutcome, ReconcileScopeUseCase};
pub use validate_notification::{NotificationError, ValidateNotificationUseCase};
