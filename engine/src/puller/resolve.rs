//! Version ordering
//!
//! Versions are compared by semver precedence, which ignores build metadata.
//! Listings that differ only in build metadata keep their published order.
//! A source that publishes a
//! version string we cannot order is broken, so that is fatal rather than
//! silently ignored.

use pluck_sdk::{canonical_version, PullError, VersionMetadata};
use semver::Version;

/// Parse a version with or without a leading `v`
pub fn parse_version(raw: &str) -> Result<Version, PullError> {
    Version::parse(canonical_version(raw.trim()))
        .map_err(|e| PullError::Fatal(format!("Unparsable version '{}': {}", raw, e)))
}

/// All listed versions, newest first
pub fn newest_first(listing: &[VersionMetadata]) -> Result<Vec<Version>, PullError> {
    let mut versions = listing
        .iter()
        .map(|metadata| parse_version(&metadata.version))
        .collect::<Result<Vec<_>, _>>()?;
    versions.sort_by(|a, b| b.cmp_precedence(a));
    Ok(versions)
}

/// Highest version in a listing, or `None` if it is empty
pub fn latest(listing: &[VersionMetadata]) -> Result<Option<Version>, PullError> {
    Ok(newest_first(listing)?.into_iter().next())
}
