//! Project configuration for pinmap
//!
//! This crate owns everything pinmap persists or reads from the project
//! directory: the package.json manifest (with its formatting preserved), the
//! `pinmap.lock` resolution table, and the option structs that govern an
//! install transaction.

pub mod json;
pub mod lock;
pub mod options;

// Re-export main types
pub use json::{BrowserField, ExportsTarget, JsonStyle, Manifest, PackageConfig};
pub use lock::{load_lockfile, save_lockfile, LockResolutions, LOCKFILE_NAME};
pub use options::{ConfigLayering, ConfigLoader, ConfigSource, InstallOptions, ProjectConfig};

use pinmap_core::error::PinmapError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, PinmapError>;
