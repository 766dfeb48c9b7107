//! Utility functions and helpers.
//!
//! Common functionality used across multiple pinmap crates.

pub mod hash;
pub mod url;

// Re-export commonly used utilities
pub use self::hash::sri_sha384;
pub use self::url::{is_plain, is_relative, is_url, relative_url, resolve_url, with_trailing_slash};
