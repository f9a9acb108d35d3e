// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::signature::VerificationError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum MirrorSyncError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0:?}")]
    WalkDir(#[from] walkdir::Error),

    #[error("repository I/O error on path {0}: {1:?}")]
    RepositoryIoPath(String, std::io::Error),

    #[error("timed out fetching {0}")]
    FetchTimeout(String),

    #[error("Release file line {0}: header line lacks a `:` separator: {1}")]
    ReleaseHeaderMissingColon(usize, String),

    #[error("Release file line {0}: checksum record outside of a checksum section")]
    ReleaseRecordOutsideSection(usize),

    #[error("Release file line {0}: checksum record has {1} fields; expected 3")]
    ReleaseRecordFieldCount(usize, usize),

    #[error("Release file line {0}: invalid file size {1}")]
    ReleaseRecordBadSize(usize, String),

    #[error("Release file declares mismatching sizes for {path}: {first} vs {second}")]
    ReleaseSizeMismatch {
        path: String,
        first: u64,
        second: u64,
    },

    #[error("signature verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("no trusted keys loaded from {0}")]
    KeyringEmpty(String),

    #[error("no mirror produced a valid Release file")]
    NoValidRelease,

    #[error("mirror list is empty")]
    NoMirrors,

    #[error("invalid repository path (expected at least 2 components): {0}")]
    InvalidRepoPath(String),

    #[error("unsupported mirror URL scheme: {0}")]
    UnsupportedMirrorScheme(String),

    #[error("all {0} selected files failed to download")]
    AllFetchesFailed(usize),

    #[error("{0}")]
    Other(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, MirrorSyncError>;
