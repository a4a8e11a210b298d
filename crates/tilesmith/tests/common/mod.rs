//! Shared test utilities for tilesmith integration tests.
//!
//! This module provides:
//! - Fake fetcher, toolchain and dataset bridge that count invocations
//! - `TestHarness` wiring them into a `TileService` over temp directories

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
