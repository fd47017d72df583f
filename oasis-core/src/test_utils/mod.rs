//! Test utilities shared by unit and integration tests
//!
//! Deterministic identities and messages, a builder for log records, and
//! dialers with scripted failure behaviour for exercising the supervisor.

pub mod async_helpers;
pub mod dialers;
pub mod fixtures;
pub mod stores;

pub use async_helpers::*;
pub use dialers::*;
pub use fixtures::*;
pub use stores::*;
