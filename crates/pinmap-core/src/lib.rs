//! # pinmap-core
//!
//! Core types and utilities shared across all pinmap crates.
//!
//! This crate provides:
//! - Version ranges reduced to registry lookup shapes
//! - Package targets, exact packages and install targets
//! - PinmapError enum for unified error handling
//! - URL and integrity helpers
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types (Version, PackageTarget, etc.)
//! - `error`: Error types and result aliases
//! - `utils`: Utility functions and helpers

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{PinmapError, PinmapResult};
pub use types::{
    DependencyKind, ExactPackage, InstallRequest, InstallTarget, LookupKind, PackageTarget,
    PkgSpecifier, Version, VersionRange,
};
