//! # vipsbind
//!
//! Host-facing library for the vipsbind lifetime bridge:
//! - **bridge**: the [`Bridge`] service owning one handle registry, one native
//!   heap and the vector type table, with explicit init and shutdown
//! - **config**: [`BridgeConfig`] loaded from JSON or the environment
//! - **error**: common error type wrapping the core errors
//! - **tracing**: logging setup with vipsbind segment prefixes
//!
//! The registry and marshaler themselves live in `vipsbind-core`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vipsbind::{Bridge, BridgeConfig};
//!
//! vipsbind::tracing::init();
//! let bridge = Bridge::init(BridgeConfig::from_env()?, library)?;
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod tracing;

// Re-export commonly used items at crate root
pub use bridge::{Bridge, ShutdownReport};
pub use config::BridgeConfig;
pub use error::{Error, Result};
