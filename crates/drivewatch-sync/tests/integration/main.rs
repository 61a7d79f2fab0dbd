//! Integration tests for drivewatch-sync
//!
//! Runs the whole engine (scheduler, dispatcher, notification handler,
//! HTTP endpoint) against the in-memory fakes from drivewatch-core.

mod common;

mod test_dispatcher;
mod test_notifications;
mod test_scheduler;
mod test_server;
