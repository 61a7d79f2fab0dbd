//! drivewatch Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Item`, `ChannelDescriptor`, `Notification`, `ChangeEvent`
//! - **Diff planner** - pure computation of change events and cache batches
//! - **Use cases** - `ValidateNotificationUseCase`, `ReconcileScopeUseCase`, `ChannelManager`
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `IChannelApi`,
//!   `ISnapshotCache`, `IChannelRegistry`, `IEventEmitter`
//!
//! # Architecture
//!
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! Use cases orchestrate domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
