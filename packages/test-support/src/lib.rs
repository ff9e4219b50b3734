//! Shared test utilities for the workspace.
//!
//! Currently this is only the unified logging initialization used by unit
//! and integration tests across packages.

pub mod logging;
