//! Core data types for package resolution.
//!
//! - Version and range types
//! - Package identities and install targets
//! - Dependency field kinds

pub mod dependency;
pub mod package;
pub mod version;

// Re-export all public types
pub use dependency::DependencyKind;
pub use package::{ExactPackage, InstallRequest, InstallTarget, PackageTarget, PkgSpecifier, DEFAULT_REGISTRY};
pub use version::{format_ranges, LookupKind, PartialVersion, Version, VersionError, VersionRange};
