//! # Tether Configuration
//!
//! Typed configuration for the session synchronization core. Every component
//! has its own section with serde defaults, so an empty file is a valid
//! configuration.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_config::TetherConfig;
//!
//! # async fn example() -> Result<(), tether_config::ConfigError> {
//! let config = TetherConfig::load_from_file("tether.toml").await?;
//! let timeout = config.permission.timeout();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod components;
mod loader;

pub use components::*;
pub use loader::{ConfigError, ConfigResult, TetherConfig};
