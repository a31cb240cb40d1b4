//! Staleness checks of local roots against the server's update manifest.
//!
//! Everything here is a pure comparison, safe to call in a scan loop.

use serde::{Deserialize, Serialize};

use crate::local_db_model::BundleSummary;
use crate::server_model::ManifestEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdatePolicy {
    /// Update iff the manifest hash differs from the local one. Falls back to
    /// [`UpdatePolicy::ModifiedAt`] when either side has no hash.
    #[default]
    ContentHash,
    /// Update iff the server copy was modified strictly later than the local one.
    ModifiedAt,
}

/// Manifest entry describing the same logical root. Local roots without a uuid never match.
pub fn matching_entry<'m>(
    manifest: &'m [ManifestEntry],
    local: &BundleSummary,
) -> Option<&'m ManifestEntry> {
    if local.uuid.is_empty() {
        return None;
    }
    manifest.iter().find(|it| it.uuid == local.uuid)
}

pub fn has_update(policy: UpdatePolicy, manifest: &[ManifestEntry], local: &BundleSummary) -> bool {
    let Some(entry) = matching_entry(manifest, local) else {
        return false;
    };

    match policy {
        UpdatePolicy::ContentHash => {
            match entry.hash.as_deref().filter(|hash| !hash.is_empty()) {
                Some(hash) if !local.hash.is_empty() => hash != local.hash,
                _ => is_newer(entry, local),
            }
        }
        UpdatePolicy::ModifiedAt => is_newer(entry, local),
    }
}

fn is_newer(entry: &ManifestEntry, local: &BundleSummary) -> bool {
    entry
        .modified_at
        .map_or(false, |modified_at| modified_at > local.modified_at)
}

pub fn is_bundle_local(local: &[BundleSummary], uuid: &str) -> bool {
    !uuid.is_empty() && local.iter().any(|it| it.uuid == uuid)
}

pub fn bundles_with_updates<'l>(
    policy: UpdatePolicy,
    manifest: &[ManifestEntry],
    local: &'l [BundleSummary],
) -> Vec<&'l BundleSummary> {
    local
        .iter()
        .filter(|it| has_update(policy, manifest, it))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(value: &str) -> DateTime<Utc> {
        value.parse().unwrap()
    }

    fn local(uuid: &str, hash: &str) -> BundleSummary {
        BundleSummary {
            id: 1,
            uuid: uuid.to_string(),
            name: "Bundle".to_string(),
            language: "EN".to_string(),
            hash: hash.to_string(),
            modified_at: at("2023-05-01T12:00:00Z"),
            size: 0,
        }
    }

    fn entry(uuid: &str, hash: Option<&str>, modified_at: Option<&str>) -> ManifestEntry {
        ManifestEntry {
            uuid: uuid.to_string(),
            hash: hash.map(str::to_string),
            name: None,
            modified_at: modified_at.map(at),
        }
    }

    #[test]
    fn equal_hashes_mean_no_update() {
        let manifest = [entry("a", Some("h1"), None)];
        assert!(!has_update(UpdatePolicy::ContentHash, &manifest, &local("a", "h1")));
    }

    #[test]
    fn different_hash_means_update() {
        let manifest = [entry("b", Some("x"), None), entry("a", Some("h2"), None)];
        assert!(has_update(UpdatePolicy::ContentHash, &manifest, &local("a", "h1")));
    }

    #[test]
    fn unknown_uuid_means_no_update() {
        let manifest = [entry("other", Some("h2"), Some("2030-01-01T00:00:00Z"))];
        assert!(!has_update(UpdatePolicy::ContentHash, &manifest, &local("a", "h1")));
        assert!(!has_update(UpdatePolicy::ModifiedAt, &manifest, &local("a", "h1")));
        assert!(!has_update(UpdatePolicy::ContentHash, &[], &local("a", "h1")));
    }

    #[test]
    fn legacy_bundle_without_uuid_never_matches() {
        let manifest = [entry("", Some("h2"), None)];
        assert!(!has_update(UpdatePolicy::ContentHash, &manifest, &local("", "h1")));
    }

    #[test]
    fn missing_hash_falls_back_to_modified_at() {
        let newer = [entry("a", None, Some("2023-06-01T00:00:00Z"))];
        let older = [entry("a", Some(""), Some("2023-04-01T00:00:00Z"))];
        assert!(has_update(UpdatePolicy::ContentHash, &newer, &local("a", "h1")));
        assert!(!has_update(UpdatePolicy::ContentHash, &older, &local("a", "h1")));

        let local_without_hash = local("a", "");
        let manifest = [entry("a", Some("h9"), Some("2023-06-01T00:00:00Z"))];
        assert!(has_update(UpdatePolicy::ContentHash, &manifest, &local_without_hash));
        let manifest = [entry("a", None, None)];
        assert!(!has_update(UpdatePolicy::ContentHash, &manifest, &local_without_hash));
    }

    #[test]
    fn modified_at_ties_are_not_updates() {
        let tie = [entry("a", Some("other"), Some("2023-05-01T12:00:00Z"))];
        assert!(!has_update(UpdatePolicy::ModifiedAt, &tie, &local("a", "h1")));

        let newer = [entry("a", Some("h1"), Some("2023-05-01T12:00:01Z"))];
        assert!(has_update(UpdatePolicy::ModifiedAt, &newer, &local("a", "h1")));
    }

    #[test]
    fn scan_helpers() {
        let locals = [local("a", "h1"), local("b", "h2"), local("c", "h3")];
        let manifest = [entry("a", Some("h1"), None), entry("b", Some("new"), None)];

        let stale = bundles_with_updates(UpdatePolicy::ContentHash, &manifest, &locals);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].uuid, "b");

        assert!(is_bundle_local(&locals, "c"));
        assert!(!is_bundle_local(&locals, "d"));
        assert!(!is_bundle_local(&locals, ""));
    }
}
