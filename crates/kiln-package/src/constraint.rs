//! Version constraints and concrete revisions

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version constraint declared by a package reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Exactly this tag
    Tag(String),
    /// Highest tag whose version satisfies the range
    Range(VersionRange),
    /// Current tip of a branch
    Branch(String),
    /// Exactly this commit
    Commit(String),
}

impl VersionConstraint {
    /// Pins name one specific revision (tags and commits)
    pub fn is_pin(&self) -> bool {
        matches!(self, Self::Tag(_) | Self::Commit(_))
    }

    /// Check if a resolved revision satisfies this constraint
    pub fn matches(&self, revision: &ResolvedRevision) -> bool {
        match self {
            Self::Tag(tag) => matches!(&revision.spec, RevisionSpec::Tag(t) if t == tag),
            Self::Commit(commit) => commits_match(commit, &revision.commit),
            Self::Range(range) => revision
                .version
                .as_ref()
                .is_some_and(|v| range.matches(v)),
            Self::Branch(branch) => {
                matches!(&revision.spec, RevisionSpec::Branch(b) if b == branch)
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "tag {}", tag),
            Self::Range(range) => write!(f, "version {}", range),
            Self::Branch(branch) => write!(f, "branch {}", branch),
            Self::Commit(commit) => write!(f, "commit {}", commit),
        }
    }
}

/// Semantic version range with the text it was parsed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    req: VersionReq,
}

impl VersionRange {
    /// Parse a version range
    ///
    /// Accepts everything `semver::VersionReq` accepts (`^1.2`, `~1.2.3`,
    /// `>=1.0, <2.0`, bare `1.2.3` meaning `^1.2.3`, `*`) plus
    /// whitespace-separated comparators such as `>=1.0 <2.0`.
    pub fn parse(s: &str) -> Result<Self, semver::Error> {
        let raw = s.trim().to_string();
        let req = match VersionReq::parse(&raw) {
            Ok(req) => req,
            Err(err) => {
                let joined = join_comparators(&raw);
                if joined == raw {
                    return Err(err);
                }
                VersionReq::parse(&joined)?
            }
        };
        Ok(Self { raw, req })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    pub fn requirement(&self) -> &VersionReq {
        &self.req
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// `>=1.0 <2.0` -> `>=1.0, <2.0`
fn join_comparators(raw: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for token in raw.split_whitespace() {
        let is_operator_only = token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^'));
        match parts.last_mut() {
            Some(last) if last.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) => {
                last.push_str(token);
            }
            _ if is_operator_only || token.starts_with(['<', '>', '=', '~', '^']) => {
                parts.push(token.trim_end_matches(',').to_string());
            }
            Some(last) => {
                last.push_str(token);
            }
            None => parts.push(token.to_string()),
        }
    }
    parts
        .iter()
        .map(|p| p.trim_end_matches(',').to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a tag name as a version (`v1.2.3`, `1.2`, `2`)
pub fn parse_tag_version(tag: &str) -> Option<Version> {
    let stripped = tag.strip_prefix(['v', 'V']).unwrap_or(tag);
    if let Ok(version) = Version::parse(stripped) {
        return Some(version);
    }

    // Lenient forms without a full major.minor.patch triple
    let mut numbers = stripped.split('.');
    let major = numbers.next()?.parse::<u64>().ok()?;
    let minor = match numbers.next() {
        Some(n) => n.parse::<u64>().ok()?,
        None => 0,
    };
    if numbers.next().is_some() {
        return None;
    }
    Some(Version::new(major, minor, 0))
}

/// Commit ids match when one is an abbreviation of the other
pub fn commits_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    !a.is_empty() && !b.is_empty() && (a.starts_with(&b) || b.starts_with(&a))
}

/// What to ask the version-control tool for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum RevisionSpec {
    Tag(String),
    Branch(String),
    Commit(String),
}

impl RevisionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tag(_) => "tag",
            Self::Branch(_) => "branch",
            Self::Commit(_) => "commit",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Tag(n) | Self::Branch(n) | Self::Commit(n) => n,
        }
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

/// The concrete revision chosen for a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRevision {
    /// The tag, branch or commit that was selected
    pub spec: RevisionSpec,
    /// Commit the selection points at
    pub commit: String,
    /// Version parsed from the tag, if any
    pub version: Option<Version>,
}

impl ResolvedRevision {
    pub fn new(spec: RevisionSpec, commit: impl Into<String>) -> Self {
        let version = match &spec {
            RevisionSpec::Tag(tag) => parse_tag_version(tag),
            _ => None,
        };
        Self {
            spec,
            commit: commit.into(),
            version,
        }
    }

    /// Branch tips move; tags and commits do not
    pub fn is_mutable(&self) -> bool {
        matches!(self.spec, RevisionSpec::Branch(_))
    }
}

impl fmt::Display for ResolvedRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.spec {
            RevisionSpec::Commit(_) => write!(f, "commit {}", self.commit),
            spec => write!(f, "{} ({})", spec, self.commit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("^1.2.3", "1.9.0", true)]
    #[case("^1.2.3", "2.0.0", false)]
    #[case("~1.2.3", "1.2.9", true)]
    #[case("~1.2.3", "1.3.0", false)]
    #[case(">=1.0, <2.0", "1.2.0", true)]
    #[case(">=1.0 <2.0", "1.2.0", true)]
    #[case(">= 1.0 < 2.0", "2.0.0", false)]
    #[case("1.2.3", "1.4.0", true)]
    #[case("*", "7.0.0", true)]
    fn test_range_matches(#[case] range: &str, #[case] version: &str, #[case] expected: bool) {
        let range = VersionRange::parse(range).unwrap();
        assert_eq!(range.matches(&Version::parse(version).unwrap()), expected);
    }

    #[test]
    fn test_range_keeps_raw_text() {
        let range = VersionRange::parse(">=1.0 <2.0").unwrap();
        assert_eq!(range.to_string(), ">=1.0 <2.0");
    }

    #[test]
    fn test_invalid_range() {
        assert!(VersionRange::parse("not a version").is_err());
    }

    #[rstest]
    #[case("1.2.3", Some(Version::new(1, 2, 3)))]
    #[case("v2.0.1", Some(Version::new(2, 0, 1)))]
    #[case("1.2", Some(Version::new(1, 2, 0)))]
    #[case("4", Some(Version::new(4, 0, 0)))]
    #[case("release-1", None)]
    #[case("1.2.3.4", None)]
    fn test_parse_tag_version(#[case] tag: &str, #[case] expected: Option<Version>) {
        assert_eq!(parse_tag_version(tag), expected);
    }

    #[test]
    fn test_commits_match_abbreviations() {
        assert!(commits_match("abc123", "abc123def456"));
        assert!(commits_match("ABC123", "abc123"));
        assert!(!commits_match("abc123", "def456"));
        assert!(!commits_match("", "abc"));
    }

    #[test]
    fn test_resolved_revision_mutability() {
        let branch = ResolvedRevision::new(RevisionSpec::Branch("main".into()), "aaaa");
        let tag = ResolvedRevision::new(RevisionSpec::Tag("v1.0.0".into()), "bbbb");
        assert!(branch.is_mutable());
        assert!(!tag.is_mutable());
        assert_eq!(tag.version, Some(Version::new(1, 0, 0)));
    }

    #[test]
    fn test_constraint_matches_revision() {
        let revision = ResolvedRevision::new(RevisionSpec::Tag("1.2.0".into()), "abc123ff");
        assert!(VersionConstraint::Tag("1.2.0".into()).matches(&revision));
        assert!(VersionConstraint::Commit("abc123".into()).matches(&revision));
        assert!(VersionConstraint::Range(VersionRange::parse("^1.0").unwrap()).matches(&revision));
        assert!(!VersionConstraint::Branch("main".into()).matches(&revision));
    }
}
