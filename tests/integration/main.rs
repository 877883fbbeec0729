// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for rolling-upgrade
//!
//! These tests start real server containers and require a container engine
//! (`docker` by default) able to pull the server images. Tests are marked
//! with #[ignore] and must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored --test-threads=1
//! ```
//!
//! Versions default to two published releases and can be overridden with
//! `ROLLING_UPGRADE_FROM` / `ROLLING_UPGRADE_TO` (any form the command line
//! accepts, e.g. `image://...` or `file://...`). `ROLLING_UPGRADE_ENGINE`
//! selects another engine such as `podman`.
//! Note: Tests run sequentially to avoid port and name conflicts.


// Test modules
mod driver_tests;
mod upgrade_tests;

pub use env::*;
