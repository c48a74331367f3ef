//! Component manifests: identity and dependency declaration
//!
//! A manifest is immutable once registered — it is produced once by a
//! component's static `manifest()` function and never mutated afterward,
//! per the design note replacing attribute-reflection scanning with
//! explicit manifest declaration.

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::ids::ComponentId;

/// Semantic version, major.minor.patch with an optional pre-release tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Major version component
    pub major: u32,
    /// Minor version component
    pub minor: u32,
    /// Patch version component
    pub patch: u32,
    /// Pre-release identifier, e.g. `"rc.1"`
    pub pre_release: Option<String>,
}

impl Version {
    /// Builds a stable (non-pre-release) version
    #[must_use]
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Compares ignoring pre-release tags, used for `>=`/`<=` constraint checks
    fn cmp_numeric(&self, other: &Self) -> std::cmp::Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

/// A version constraint over major.minor.patch, pre-release aware
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VersionConstraint {
    /// Any version
    Any,
    /// Version must be greater than or equal to the bound
    AtLeast(Version),
    /// Version must be less than or equal to the bound
    AtMost(Version),
    /// Version must fall within `[min, max]` inclusive
    Range(Version, Version),
    /// Version must match exactly, including any pre-release tag
    Exact(Version),
}

impl VersionConstraint {
    /// Whether `candidate` satisfies this constraint
    #[must_use]
    pub fn is_satisfied_by(&self, candidate: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::AtLeast(min) => candidate.cmp_numeric(min) != std::cmp::Ordering::Less,
            Self::AtMost(max) => candidate.cmp_numeric(max) != std::cmp::Ordering::Greater,
            Self::Range(min, max) => {
                candidate.cmp_numeric(min) != std::cmp::Ordering::Less
                    && candidate.cmp_numeric(max) != std::cmp::Ordering::Greater
            }
            Self::Exact(exact) => candidate == exact,
        }
    }
}

/// How a component's dependency tree is isolated from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IsolationLevel {
    /// Shares the host's load context entirely
    None,
    /// Standard separation; no independent dependency resolution
    #[default]
    Standard,
    /// Dedicated load context resolving dependencies independently of the
    /// host except for an allow-listed set of shared package prefixes
    Plugin,
}

/// A declared dependency on another component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Id of the required component
    pub component_id: ComponentId,
    /// Version constraint the dependency must satisfy
    pub version: VersionConstraint,
    /// Whether the dependency's absence is tolerated (no edge failure)
    pub optional: bool,
}

/// Declared name of a service a component exports or imports, used to
/// resolve dependency edges that are not expressed by explicit component id
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 256),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom)
)]
pub struct ServiceName(String);

/// Identity and dependency declaration of a loadable component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentManifest {
    /// Stable identity of the component
    pub id: ComponentId,
    /// Human-readable name
    pub name: String,
    /// Component version
    pub version: Version,
    /// Explicit dependencies by component id
    pub dependencies: Vec<DependencySpec>,
    /// Services this component exports; used to satisfy other components'
    /// import-based dependency edges
    pub exports: Vec<ServiceName>,
    /// Services this component requires by capability rather than by id
    pub imports: Vec<ServiceName>,
    /// Free-form classification tags
    pub tags: Vec<String>,
    /// Optional human-readable description
    pub description: Option<String>,
    /// Optional author attribution
    pub author: Option<String>,
    /// Minimum compatible framework version
    pub min_framework_version: Option<Version>,
    /// Maximum compatible framework version
    pub max_framework_version: Option<Version>,
    /// Isolation level this component requires
    pub isolation: IsolationLevel,
}

impl ComponentManifest {
    /// Whether `framework_version` falls within this manifest's declared bounds
    #[must_use]
    pub fn is_compatible_with_framework(&self, framework_version: &Version) -> bool {
        if let Some(min) = &self.min_framework_version {
            if framework_version.cmp_numeric(min) == std::cmp::Ordering::Less {
                return false;
            }
        }
        if let Some(max) = &self.max_framework_version {
            if framework_version.cmp_numeric(max) == std::cmp::Ordering::Greater {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_constraint() {
        let constraint = VersionConstraint::AtLeast(Version::new(1, 2, 0));
        assert!(constraint.is_satisfied_by(&Version::new(1, 2, 0)));
        assert!(constraint.is_satisfied_by(&Version::new(2, 0, 0)));
        assert!(!constraint.is_satisfied_by(&Version::new(1, 1, 9)));
    }

    #[test]
    fn range_constraint() {
        let constraint = VersionConstraint::Range(Version::new(1, 0, 0), Version::new(2, 0, 0));
        assert!(constraint.is_satisfied_by(&Version::new(1, 5, 0)));
        assert!(!constraint.is_satisfied_by(&Version::new(2, 0, 1)));
    }

    #[test]
    fn framework_bounds() {
        let manifest = ComponentManifest {
            id: ComponentId::generate(),
            name: "demo".into(),
            version: Version::new(1, 0, 0),
            dependencies: vec![],
            exports: vec![],
            imports: vec![],
            tags: vec![],
            description: None,
            author: None,
            min_framework_version: Some(Version::new(2, 0, 0)),
            max_framework_version: Some(Version::new(3, 0, 0)),
            isolation: IsolationLevel::Standard,
        };
        assert!(manifest.is_compatible_with_framework(&Version::new(2, 5, 0)));
        assert!(!manifest.is_compatible_with_framework(&Version::new(1, 9, 0)));
        assert!(!manifest.is_compatible_with_framework(&Version::new(3, 0, 1)));
    }
}
