//! govdata common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient plumbing shared by the govdata workspace members:
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Environment**: small helpers for reading configuration from the environment
//!
//! # Example
//!
//! ```no_run
//! use govdata_common::{env, logging};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = logging::init_logging(&logging::LogConfig::from_env()?)?;
//!     let host = env::var_or("DB_HOST", "localhost");
//!     tracing::info!(%host, "configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod logging;

pub use logging::{init_logging, LogConfig, LogGuard, LogLevel};
