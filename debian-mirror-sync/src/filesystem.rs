// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mirrors backed by a local filesystem. */

use {
    crate::{
        error::{MirrorSyncError, Result},
        io::DataResolver,
    },
    async_trait::async_trait,
    futures::{io::BufReader, AsyncRead},
    std::{
        path::{Path, PathBuf},
        pin::Pin,
    },
    url::Url,
};

/// A readable mirror rooted at a directory.
#[derive(Clone, Debug)]
pub struct FilesystemMirrorReader {
    root_dir: PathBuf,
}

impl FilesystemMirrorReader {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    /// Construct an instance from a `file://` URL.
    pub fn from_url(url: &Url) -> Result<Self> {
        let path = url
            .to_file_path()
            .map_err(|_| MirrorSyncError::Other(format!("not a local path URL: {}", url)))?;

        Ok(Self::new(path))
    }

    /// The directory this mirror reads from.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[async_trait]
impl DataResolver for FilesystemMirrorReader {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.root_dir.join(path.trim_start_matches('/'));

        let f = async_std::fs::File::open(&path)
            .await
            .map_err(|e| MirrorSyncError::RepositoryIoPath(format!("{}", path.display()), e))?;

        Ok(Box::pin(BufReader::new(f)))
    }
}
