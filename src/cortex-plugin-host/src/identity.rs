//! Plugin identities and reference parsing.
//!
//! A plugin is identified by `owner/repo/name@branch`: the repository on the
//! code host, the plugin's directory inside that repository, and the branch the
//! archive is taken from.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_BRANCH, PluginError, Result};

/// Identity of one installable plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub owner: String,
    pub repo: String,
    pub name: String,
    pub branch: String,
}

impl Identity {
    /// Create an identity, defaulting the branch to `master`.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        name: impl Into<String>,
        branch: Option<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            name: name.into(),
            branch: branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        }
    }

    /// Parse `owner/repo/name` or `owner/repo/name@branch`.
    ///
    /// In strict mode the `@branch` suffix is mandatory.
    pub fn parse(text: &str, strict: bool) -> Result<Self> {
        let text = text.trim();

        let (path, branch) = match text.split_once('@') {
            Some((path, branch)) => {
                if branch.is_empty() {
                    return Err(PluginError::parse_error(text, "branch cannot be empty"));
                }
                (path, Some(branch.to_string()))
            }
            None if strict => {
                return Err(PluginError::parse_error(
                    text,
                    "expected owner/repo/name@branch",
                ));
            }
            None => (text, None),
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() != 3 {
            return Err(PluginError::parse_error(
                text,
                format!("expected 3 path segments, found {}", segments.len()),
            ));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PluginError::parse_error(text, "path segments cannot be empty"));
        }
        if segments.iter().any(|s| matches!(*s, "." | "..")) {
            return Err(PluginError::parse_error(text, "path segments cannot be '.' or '..'"));
        }

        Ok(Self::new(segments[0], segments[1], segments[2], branch))
    }

    /// Directory this plugin is extracted into below `root`.
    pub fn install_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.owner).join(&self.repo).join(format!(
            "{}-{}",
            escape(&self.name, &['-', '\\']),
            escape(&self.branch, BRANCH_RESERVED)
        ))
    }

    /// File name of the cached archive shared by every plugin of this repo/branch.
    pub fn cache_key(&self) -> String {
        format!(
            "{}-{}-{}.zip",
            escape(&self.owner, &['-', '\\']),
            escape(&self.repo, &['-', '\\']),
            escape(&self.branch, BRANCH_RESERVED)
        )
    }

    /// Activation key, unique across owner, repo, name and branch.
    pub fn extension_id(&self) -> ExtensionId {
        ExtensionId(format!(
            "plugins.{}.{}.{}-{}.{}",
            escape(&self.owner, &['.']),
            escape(&self.repo, &['.']),
            escape(&self.name, &['.', '-']),
            escape(&self.branch, &['.', '/', '\\']),
            escape(&self.name, &['.'])
        ))
    }

    /// Browser link to the plugin's source tree.
    pub fn link(&self) -> String {
        format!(
            "https://github.com/{}/{}/tree/{}/{}",
            self.owner, self.repo, self.branch, self.name
        )
    }

    fn sort_key(&self) -> (String, &str, &str, &str, &str) {
        (
            self.name.to_lowercase(),
            &self.owner,
            &self.repo,
            &self.name,
            &self.branch,
        )
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}@{}", self.owner, self.repo, self.name, self.branch)
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Process-unique key a plugin is activated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(String);

impl ExtensionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const BRANCH_RESERVED: &[char] = &['/', '\\'];

// Percent-encodes `%` and every char in `reserved`, so distinct inputs never
// share an encoding and separators stay unambiguous.
fn escape(text: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '%' || reserved.contains(&c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}
