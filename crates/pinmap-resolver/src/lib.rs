//! Resolution, installation and tracing engine for pinmap
//!
//! This crate turns package specifiers into a lockfile and an import map:
//! the [`Resolver`] answers version, config and exports questions against a
//! CDN, the [`Installer`] keeps the lock table, and the [`Tracer`] follows
//! real module imports to decide what the import map needs.

pub mod analyze;
pub mod exports;
pub mod graph;
pub mod importmap;
pub mod install;
pub mod resolve;
pub mod semver;
pub mod trace;

// Re-export main types
pub use analyze::{analyze_source, Analysis};
pub use graph::{EdgeKind, TraceGraph};
pub use importmap::ImportMap;
pub use install::{InstallTransaction, Installer};
pub use resolve::Resolver;
pub use trace::{TraceEntry, TraceOptions, TraceResult, Tracer};

use pinmap_core::error::PinmapError;

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, PinmapError>;
