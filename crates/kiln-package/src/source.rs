//! Source locations and their normalized identity

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Where a package's repository lives
///
/// Two locations are the same package when their identities match: the scheme
/// is dropped, `git@host:path` is treated like `ssh://git@host/path`, host and
/// path are lowercased, and trailing `/` and `.git` are removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceLocation {
    raw: String,
    identity: String,
}

impl SourceLocation {
    /// Parse and normalize a repository URL or local path
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("source location must not be empty".to_string());
        }

        let identity = normalize(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            identity,
        })
    }

    /// The location as written in the manifest
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Normalized identity used for equality and hashing
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Repository name without `.git`, preserving case (e.g. `Alamofire`)
    pub fn stem(&self) -> &str {
        let trimmed = self.raw.trim_end_matches('/');
        let last = trimmed
            .rsplit(['/', ':', '\\'])
            .next()
            .unwrap_or(trimmed);
        last.strip_suffix(".git").unwrap_or(last)
    }

    /// Short stable hash of the identity, used in on-disk names
    pub fn identity_hash(&self) -> String {
        let digest = Sha256::digest(self.identity.as_bytes());
        format!("{:x}", digest)[..12].to_string()
    }
}

fn normalize(raw: &str) -> Result<String, String> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else if let Some(rewritten) = scp_to_ssh(raw) {
        rewritten
    } else {
        return Ok(format!("file:{}", normalize_path(raw)));
    };

    let url = url::Url::parse(&candidate).map_err(|e| format!("invalid URL '{}': {}", raw, e))?;
    if url.scheme() == "file" {
        return Ok(format!("file:{}", normalize_path(url.path())));
    }

    let host = url
        .host_str()
        .ok_or_else(|| format!("URL '{}' has no host", raw))?
        .to_lowercase();
    Ok(format!("{}/{}", host, normalize_path(url.path())))
}

/// `git@github.com:User/Repo.git` -> `ssh://git@github.com/User/Repo.git`
fn scp_to_ssh(raw: &str) -> Option<String> {
    let (host, path) = raw.split_once(':')?;
    // Single letters are Windows drive prefixes, not hosts.
    if host.len() < 2 || host.contains('/') || host.contains('\\') || path.starts_with("//") {
        return None;
    }
    Some(format!("ssh://{}/{}", host, path.trim_start_matches('/')))
}

fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let joined = segments.join("/").to_lowercase();
    joined
        .strip_suffix(".git")
        .map(str::to_string)
        .unwrap_or(joined)
}

impl PartialEq for SourceLocation {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for SourceLocation {}

impl Hash for SourceLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl PartialOrd for SourceLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourceLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity.cmp(&other.identity)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for SourceLocation {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceLocation> for String {
    fn from(value: SourceLocation) -> Self {
        value.raw
    }
}
