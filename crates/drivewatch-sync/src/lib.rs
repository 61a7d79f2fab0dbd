//! Drivewatch Sync - Reconciliation runtime
//!
//! Provides:
//! - Coalescing reconcile queue with a bounded worker pool
//! - Per-scope mutual exclusion
//! - Notification handling with replay guard and renewal delegation
//! - Periodic channel maintenance and catch-up reconciliation
//! - Inbound HTTP endpoint, event sinks, and Prometheus metrics
//!
//! ## Modules
//!
//! - [`dispatcher`] - Reconcile queue and worker pool
//! - [`emitter`] - Log and HTTP event sinks
//! - [`metrics`] - Prometheus registry
//! - [`notifications`] - Notification handler
//! - [`scheduler`] - Channel scheduler
//! - [`scope_lock`] - Keyed async locks
//! - [`server`] - Public and loopback control HTTP endpoints
//! - [`service`] - Wiring of all of the above

pub mod dispatcher;
pub mod emitter;
pub mod metrics;
pub mod notifications;
pub mod scheduler;
pub mod scope_lock;
pub mod server;
pub mod service;

pub use dispatcher::{Enqueued, ReconcileDispatcher, ReconcileQueue};
pub use emitter::{build_emitter, LogEventEmitter, WebhookEventEmitter};
pub use metrics::WatchMetrics;
pub use notifications::{NotificationDisposition, NotificationHandler};
pub use scheduler::{ChannelScheduler, SchedulerHandle};
pub use service::{RunningService, WatchComponents, WatchService};
