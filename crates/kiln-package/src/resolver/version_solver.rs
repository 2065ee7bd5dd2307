use crate::constraint::{parse_tag_version, VersionRange};
use semver::Version;

/// Pick the highest-versioned tag satisfying every range
///
/// Tags that do not parse as versions are ignored. When two tags parse to the
/// same version (`1.2.0` and `v1.2.0`) the lexicographically smaller tag wins
/// so the choice never depends on listing order.
pub fn max_satisfying_tag(tags: &[String], ranges: &[&VersionRange]) -> Option<(String, Version)> {
    let mut best: Option<(String, Version)> = None;

    for tag in tags {
        let Some(version) = parse_tag_version(tag) else {
            continue;
        };
        if !ranges.iter().all(|range| range.matches(&version)) {
            continue;
        }

        let better = match &best {
            None => true,
            Some((best_tag, best_version)) => {
                version > *best_version || (version == *best_version && tag < best_tag)
            }
        };
        if better {
            best = Some((tag.clone(), version));
        }
    }

    best
}

/// All versions published as tags, ascending
pub fn available_versions(tags: &[String]) -> Vec<Version> {
    let mut versions: Vec<Version> = tags.iter().filter_map(|t| parse_tag_version(t)).collect();
    versions.sort();
    versions.dedup();
    versions
}
