//! Shared test support for the workspace.
//!
//! Container fixtures are started once per test process and shared:
//! - PostgreSQL (attribute-entity store)
//! - Redis (decision and marker stores)
//!
//! A fixture returns `None` when Docker is unavailable so callers can skip.
//! The doubles module holds in-process stand-ins for failure and timing
//! scenarios.

mod doubles;
mod fixtures;

pub use doubles::*;
pub use fixtures::*;
