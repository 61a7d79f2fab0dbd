//! Integration tests for drivewatch-gdrive
//!
//! Uses wiremock to simulate the Drive v3 API and verifies the
//! DriveProvider port implementations end to end: listing, item lookups,
//! channel create/stop, and error classification.

mod common;

mod test_channels;
mod test_errors;
mod test_listing;
