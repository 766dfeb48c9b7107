//! Registry access for pinmap
//!
//! This crate provides the fetch layer every resolver operation goes through:
//! a bounded pool of in-flight HTTP (and `file:`) fetches, the `Provider`
//! contract that maps packages to CDN URLs and answers version lookups, and
//! the request-coalescing cache used for package configs, version lookups and
//! module analyses.

pub mod cache;
pub mod client;
pub mod provider;

// Re-export main types
pub use cache::{CacheStats, CoalescingCache};
pub use client::{FetchClient, FetchResponse};
pub use provider::{CdnProvider, Provider, ProviderSet};

use pinmap_core::error::PinmapError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, PinmapError>;
