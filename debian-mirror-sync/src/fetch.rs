// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Checksum verified downloads with mirror fallback.

Files listed in a `Release` file are fetched from the mirror that served the
winning `Release` first, then from the remaining mirrors in list order. Content is
only returned if its size and checksum match the declaration.
*/

use {
    crate::{
        error::MirrorSyncError,
        io::{ChecksumHasher, DEFAULT_FETCH_TIMEOUT},
        mirror::Mirror,
        release::{ChecksumType, FileEntry},
    },
    log::{info, warn},
    std::time::Duration,
    thiserror::Error,
};

/// Why content obtained from a single mirror was rejected.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("fetch failed: {0}")]
    Transport(MirrorSyncError),

    #[error("size mismatch: expected {expected} bytes; got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("{label} mismatch: expected {expected}; got {actual}")]
    ChecksumMismatch {
        label: String,
        expected: String,
        actual: String,
    },

    #[error("unknown checksum type {0}")]
    UnknownChecksum(String),
}

/// Verified content of a path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifiedContent {
    /// Path relative to the distribution directory.
    pub path: String,

    /// Prefix of the mirror that served the content.
    pub mirror: String,

    /// The content.
    pub data: Vec<u8>,
}

/// Every mirror failed to provide valid content for a path.
#[derive(Debug, Error)]
#[error("unable to obtain {path} from {} mirrors", attempts.len())]
pub struct FetchFailure {
    /// Path relative to the distribution directory.
    pub path: String,

    /// Mirror prefix and failure for each mirror tried, in trial order.
    pub attempts: Vec<(String, AttemptError)>,
}

/// Result of fetching a path.
pub type DownloadOutcome = std::result::Result<VerifiedContent, FetchFailure>;

/// Check content against a file's declared size and last listed checksum.
///
/// Checksum comparison is case-insensitive.
pub fn verify_content(entry: &FileEntry, data: &[u8]) -> std::result::Result<(), AttemptError> {
    if data.len() as u64 != entry.size() {
        return Err(AttemptError::SizeMismatch {
            expected: entry.size(),
            actual: data.len() as u64,
        });
    }

    let (label, expected) = entry.verification_checksum();

    let checksum = ChecksumType::from_field_name(label)
        .ok_or_else(|| AttemptError::UnknownChecksum(label.to_string()))?;

    let actual = ChecksumHasher::hex_digest(checksum, data);

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(AttemptError::ChecksumMismatch {
            label: label.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Order mirrors for fetching: the winner first, then the others in list order.
///
/// A winner not present in `mirrors` is ignored.
pub fn trial_order<'a>(mirrors: &'a [Mirror], winner: Option<&str>) -> Vec<&'a Mirror> {
    let first = winner.and_then(|winner| mirrors.iter().find(|m| m.prefix() == winner));

    first
        .into_iter()
        .chain(
            mirrors
                .iter()
                .filter(move |m| Some(m.prefix()) != first.map(|f| f.prefix())),
        )
        .collect()
}

/// Fetches files of a distribution, verifying checksums.
pub struct ChecksumFetcher<'a> {
    mirrors: Vec<&'a Mirror>,
    distribution: String,
    timeout: Duration,
}

impl<'a> ChecksumFetcher<'a> {
    /// Construct an instance fetching from `<mirror>/<distribution>/<path>`.
    ///
    /// `winner` is the prefix of the mirror tried first.
    pub fn new(mirrors: &'a [Mirror], winner: Option<&str>, distribution: impl ToString) -> Self {
        Self {
            mirrors: trial_order(mirrors, winner),
            distribution: distribution.to_string().trim_matches('/').to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Set the deadline for each individual fetch.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mirrors in the order they are tried.
    pub fn mirrors(&self) -> &[&'a Mirror] {
        &self.mirrors
    }

    fn mirror_path(&self, path: &str) -> String {
        if self.distribution.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.distribution, path)
        }
    }

    /// Obtain verified content for a path declared by `entry`.
    pub async fn fetch(&self, path: &str, entry: &FileEntry) -> DownloadOutcome {
        let mirror_path = self.mirror_path(path);
        let mut attempts = vec![];

        for (i, mirror) in self.mirrors.iter().enumerate() {
            let res = match mirror.fetch(&mirror_path, self.timeout).await {
                Ok(data) => verify_content(entry, &data).map(|_| data),
                Err(e) => Err(AttemptError::Transport(e)),
            };

            match res {
                Ok(data) => {
                    if i > 0 {
                        info!("{}: obtained from fallback mirror {}", path, mirror);
                    } else {
                        info!("{}: obtained from {}", path, mirror);
                    }

                    return Ok(VerifiedContent {
                        path: path.to_string(),
                        mirror: mirror.prefix().to_string(),
                        data,
                    });
                }
                Err(e) => {
                    warn!("{}: rejected content from {}: {}", path, mirror, e);
                    attempts.push((mirror.prefix().to_string(), e));
                }
            }
        }

        Err(FetchFailure {
            path: path.to_string(),
            attempts,
        })
    }
}
