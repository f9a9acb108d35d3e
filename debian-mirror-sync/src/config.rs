// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Sync configuration. */

use {
    crate::{
        error::{MirrorSyncError, Result},
        io::DEFAULT_FETCH_TIMEOUT,
        race::DEFAULT_STAGGER,
    },
    serde::{Deserialize, Serialize},
    std::{path::PathBuf, time::Duration},
};

/// Default repository path.
pub const DEFAULT_REPO: &str = "dists/stable/main/binary-amd64";

/// Default mirror list filename.
pub const DEFAULT_MIRROR_LIST: &str = "mirrorlist.txt";

/// Default keyring location.
pub const DEFAULT_KEYRING: &str = "keys/";

/// A repository path split into its distribution and component parts.
///
/// `dists/stable/main/binary-amd64` has distribution `dists/stable` and component
/// `main/binary-amd64`. `Release` files live in the distribution directory and list
/// paths relative to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RepoPath {
    distribution: String,
    component: String,
}

impl RepoPath {
    /// Parse a repository path.
    ///
    /// Leading and trailing `/` are ignored. At least 2 path components are required.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim().trim_matches('/');
        let parts = trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        if parts.len() < 2 {
            return Err(MirrorSyncError::InvalidRepoPath(path.to_string()));
        }

        Ok(Self {
            distribution: parts[0..2].join("/"),
            component: parts[2..].join("/"),
        })
    }

    /// The distribution directory. e.g. `dists/stable`.
    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    /// The component path within the distribution. e.g. `main/binary-amd64`.
    ///
    /// Empty when the repository path names only a distribution.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// The full normalized path.
    pub fn full_path(&self) -> String {
        if self.component.is_empty() {
            self.distribution.clone()
        } else {
            format!("{}/{}", self.distribution, self.component)
        }
    }

    /// Express a distribution relative path relative to the component instead.
    ///
    /// Returns [None] for paths outside the component.
    pub fn component_relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.component.is_empty() {
            Some(path)
        } else {
            path.strip_prefix(self.component.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        }
    }
}

/// Parse the content of a mirror list file.
///
/// One mirror per line. Blank lines and `#` comments are ignored. Trailing `/`
/// are stripped.
pub fn parse_mirror_list(data: &str) -> Vec<String> {
    data.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_end_matches('/').to_string())
        .collect()
}

/// Read a mirror list file.
pub fn read_mirror_list(path: impl Into<PathBuf>) -> Result<Vec<String>> {
    let path = path.into();
    let data = std::fs::read_to_string(&path)
        .map_err(|e| MirrorSyncError::RepositoryIoPath(format!("{}", path.display()), e))?;

    Ok(parse_mirror_list(&data))
}

/// Describes a sync operation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Repository path relative to each mirror.
    pub repo: String,

    /// File listing mirror prefixes.
    pub mirrors: PathBuf,

    /// Output root directory.
    pub output: PathBuf,

    /// Skip `Release` signature verification.
    pub insecure: bool,

    /// Write the full repository tree including `Release` files.
    pub tree: bool,

    /// Keyring file or directory of key files.
    pub keyring: PathBuf,

    /// Deadline for individual fetches, in milliseconds.
    pub timeout_ms: u64,

    /// Delay between launching mirror queries, in milliseconds.
    pub stagger_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repo: DEFAULT_REPO.to_string(),
            mirrors: PathBuf::from(DEFAULT_MIRROR_LIST),
            output: PathBuf::from("."),
            insecure: false,
            tree: false,
            keyring: PathBuf::from(DEFAULT_KEYRING),
            timeout_ms: DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
            stagger_ms: DEFAULT_STAGGER.as_millis() as u64,
        }
    }
}

impl SyncConfig {
    /// The parsed repository path.
    pub fn repo_path(&self) -> Result<RepoPath> {
        RepoPath::parse(&self.repo)
    }

    /// Per-fetch deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between mirror query launches.
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}
