use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::WardenError;

/// Software version with semantic (not lexical) ordering.
///
/// Accepts a leading `v` and zero-pads versions with fewer than three
/// numeric components, so `v2.5`, `2.5` and `2.5.0` are the same version.
/// Build metadata is ignored by equality as well as by ordering.
#[derive(Debug, Clone)]
pub struct FleetVersion(semver::Version);

impl FleetVersion {
    /// Parse a version string.
    pub fn parse(s: &str) -> Result<Self, WardenError> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        // Split off pre-release/build suffixes before padding the core.
        let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
        let (core, suffix) = trimmed.split_at(split_at);
        let parts = core.split('.').count();
        let padded = match parts {
            1 => format!("{}.0.0{}", core, suffix),
            2 => format!("{}.0{}", core, suffix),
            _ => trimmed.to_string(),
        };

        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|e| WardenError::InvalidArgument(format!("invalid version '{}': {}", s, e)))
    }

    /// Version of the running binary.
    pub fn current() -> Self {
        Self(semver::Version::new(
            env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        ))
    }
}

impl FromStr for FleetVersion {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for FleetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FleetVersion {}

impl Hash for FleetVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.major.hash(state);
        self.0.minor.hash(state);
        self.0.patch.hash(state);
        self.0.pre.hash(state);
    }
}

impl PartialOrd for FleetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FleetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_precedence(&other.0)
    }
}

impl std::fmt::Display for FleetVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_prefix() {
        assert_eq!(
            FleetVersion::parse("v2.5.0").unwrap(),
            FleetVersion::parse("2.5.0").unwrap()
        );
    }

    #[test]
    fn test_semantic_not_lexical() {
        let older = FleetVersion::parse("2.9.0").unwrap();
        let newer = FleetVersion::parse("2.10.0").unwrap();
        assert!(older < newer);
        assert!("2.9.0" > "2.10.0");
    }

    #[test]
    fn test_short_versions_are_padded() {
        assert_eq!(
            FleetVersion::parse("3").unwrap(),
            FleetVersion::parse("3.0.0").unwrap()
        );
        assert_eq!(FleetVersion::parse("v3.1").unwrap().to_string(), "3.1.0");
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        let rc = FleetVersion::parse("2.5.0-rc.1").unwrap();
        let release = FleetVersion::parse("2.5.0").unwrap();
        assert!(rc < release);
    }

    #[test]
    fn test_build_metadata_ignored() {
        let tagged = FleetVersion::parse("2.5.0+build.7").unwrap();
        let plain = FleetVersion::parse("2.5.0").unwrap();
        assert_eq!(tagged.cmp(&plain), Ordering::Equal);
        assert_eq!(tagged, plain);

        let mut seen = std::collections::HashSet::new();
        seen.insert(tagged);
        assert!(seen.contains(&plain));
    }

    #[test]
    fn test_invalid_version() {
        assert!(FleetVersion::parse("not-a-version").is_err());
        assert!(FleetVersion::parse("").is_err());
    }

    #[test]
    fn test_current_matches_package() {
        assert_eq!(
            FleetVersion::current().to_string(),
            env!("CARGO_PKG_VERSION")
        );
    }
}
