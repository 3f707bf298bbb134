//! Tableload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the tableload workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the run-level [`LoadError`] and its [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`], the
//!   single place where the global tracing subscriber is installed
//!
//! # Example
//!
//! ```no_run
//! use tableload_common::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     info!("ready to load");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{LoadError, Result};
