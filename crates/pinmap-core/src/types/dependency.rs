//! Dependency field kinds.
//!
//! A package.json declares dependencies in four maps; the kind decides which
//! map a new dependency is saved into and the order lookups walk them in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Normal runtime dependency
    Normal,
    /// Development-only dependency
    Dev,
    /// Peer dependency (must be provided by consumer)
    Peer,
    /// Optional dependency (can be missing)
    Optional,
}

impl DependencyKind {
    /// Order in which manifest fields are consulted when resolving a name
    pub const LOOKUP_ORDER: [DependencyKind; 4] = [
        DependencyKind::Normal,
        DependencyKind::Peer,
        DependencyKind::Optional,
        DependencyKind::Dev,
    ];

    /// The package.json field holding this kind
    pub fn field_name(&self) -> &'static str {
        match self {
            DependencyKind::Normal => "dependencies",
            DependencyKind::Dev => "devDependencies",
            DependencyKind::Peer => "peerDependencies",
            DependencyKind::Optional => "optionalDependencies",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" | "dependencies" | "prod" => Ok(DependencyKind::Normal),
            "dev" | "devDependencies" => Ok(DependencyKind::Dev),
            "peer" | "peerDependencies" => Ok(DependencyKind::Peer),
            "optional" | "optionalDependencies" => Ok(DependencyKind::Optional),
            other => Err(format!("unknown dependency kind '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        assert_eq!(DependencyKind::Normal.field_name(), "dependencies");
        assert_eq!(DependencyKind::Optional.to_string(), "optionalDependencies");
        assert_eq!("peer".parse::<DependencyKind>(), Ok(DependencyKind::Peer));
        assert!("bogus".parse::<DependencyKind>().is_err());
    }

    #[test]
    fn test_lookup_order_puts_dev_last() {
        assert_eq!(DependencyKind::LOOKUP_ORDER[0], DependencyKind::Normal);
        assert_eq!(DependencyKind::LOOKUP_ORDER[3], DependencyKind::Dev);
    }
}
