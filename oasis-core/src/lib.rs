//! Log-access core for a Scuttlebutt front-end
//!
//! A supervised connection to the log store, a typed accessor over its
//! remote methods, thread reconstruction and per-viewer privacy gating.
//!
//! ```no_run
//! use oasis_core::config::Config;
//! use oasis_core::privacy::Viewer;
//! use oasis_core::service::Oasis;
//! use oasis_core::store::LatestFilter;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let oasis = Oasis::from_config(&config)?;
//! let latest = oasis
//!     .store()
//!     .latest(LatestFilter::default(), &Viewer::Anonymous)
//!     .await?;
//! println!("{} messages", latest.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod privacy;
pub mod rpc;
pub mod service;
pub mod store;
pub mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod thread;

pub use error::{AccessError, AccessResult, ConnectionError};
pub use logging::{init_logging, LogLevel};
pub use model::{BlobId, FeedId, GatedMessage, Message, MsgKey};
pub use privacy::{GateMode, PrivacyGate, Viewer};
pub use service::Oasis;
pub use thread::{Thread, ThreadEngine};
