//! Error types and result aliases for pinmap operations.
//!
//! Every failure that can abort an install or trace transaction is a variant
//! of [`PinmapError`]. Variants raised while following an import carry the
//! referencing module URL so callers can print the import chain.

use thiserror::Error;

/// Unified error type for all pinmap operations
#[derive(Error, Debug)]
pub enum PinmapError {
    // Target errors
    #[error("Invalid specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    #[error("Unable to resolve {target} to a valid version{}", imported_from(.parent))]
    ResolutionNotFound {
        target: String,
        parent: Option<String>,
    },

    #[error("No installation found for '{name}'{} while the lockfile is frozen", imported_from(.parent))]
    NotInstalled {
        name: String,
        parent: Option<String>,
    },

    // Trace errors
    #[error("Unable to resolve \"{specifier}\"{}", imported_from(.parent))]
    UnresolvedSpecifier {
        specifier: String,
        parent: Option<String>,
    },

    #[error("No '{subpath}' exports subpath defined in {package_url}{}", imported_from(.parent))]
    NoExportMatch {
        subpath: String,
        package_url: String,
        parent: Option<String>,
    },

    #[error("Unable to fetch {url}: {message}")]
    FetchFailed {
        url: String,
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unable to analyze {url}: {message}")]
    ModuleParse { url: String, message: String },

    // Store errors
    #[error("Invalid lockfile {path}: {message}")]
    InvalidLockfile { path: String, message: String },

    #[error("Failed to parse package.json at {path}: {message}")]
    ManifestParse { path: String, message: String },

    #[error("Invalid options: {reason}")]
    InvalidOptions { reason: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for pinmap operations
pub type PinmapResult<T> = Result<T, PinmapError>;

fn imported_from(parent: &Option<String>) -> String {
    match parent {
        Some(parent) => format!(" imported from {}", parent),
        None => String::new(),
    }
}

impl PinmapError {
    /// Create a fetch error from a transport failure
    pub fn fetch<E>(url: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::FetchFailed {
            url: url.into(),
            status: None,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a fetch error for an unexpected HTTP status
    pub fn status(url: impl Into<String>, status: u16) -> Self {
        let message = if status == 404 {
            "Module not found".to_string()
        } else {
            format!("server responded with status {}", status)
        };
        Self::FetchFailed {
            url: url.into(),
            status: Some(status),
            message,
            source: None,
        }
    }

    /// Create an IO error from std::io::Error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create an invalid specifier error
    pub fn invalid_specifier(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpecifier {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal invariant error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get a user-friendly suggestion for fixing this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            PinmapError::ResolutionNotFound { .. } => {
                Some("Check the package name and version range against the registry")
            },
            PinmapError::NotInstalled { .. } => {
                Some("Run without --freeze to allow new packages to be added to the lockfile")
            },
            PinmapError::UnresolvedSpecifier { .. } => {
                Some("Add the package to the dependencies of the importing package.json")
            },
            PinmapError::NoExportMatch { .. } => {
                Some("Import a subpath that the package lists in its \"exports\" field")
            },
            PinmapError::FetchFailed { .. } => Some("Check your internet connection and try again"),
            PinmapError::InvalidLockfile { .. } => {
                Some("Delete the lockfile to regenerate it from package.json")
            },
            _ => None,
        }
    }
}
