// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Writing synchronized content to a local directory. */

use {
    crate::error::{MirrorSyncError, Result},
    chrono::{DateTime, Utc},
    filetime::FileTime,
    std::path::{Component, Path, PathBuf},
};

/// What happened when writing a path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    /// The file was created or its content replaced.
    Written,

    /// The file already had the desired content. Only its times were set.
    Unchanged,
}

/// The sibling path content is staged at before being renamed over `path`.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    name.push(".partial");

    path.with_file_name(name)
}

/// Replace the content of `path` so readers never observe a partial file.
async fn write_replace(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = partial_path(path);

    let res = match async_std::fs::write(&temp_path, data).await {
        Ok(()) => async_std::fs::rename(&temp_path, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = res {
        let _ = async_std::fs::remove_file(&temp_path).await;

        return Err(MirrorSyncError::RepositoryIoPath(
            format!("{}", path.display()),
            e,
        ));
    }

    Ok(())
}

/// Writes files under a root directory and stamps them with a fixed time.
#[derive(Clone, Debug)]
pub struct FilesystemOutputWriter {
    root_dir: PathBuf,
}

impl FilesystemOutputWriter {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    /// The root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Resolve a relative path to its filesystem location.
    ///
    /// Absolute paths and paths escaping the root are refused.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(MirrorSyncError::Other(format!(
                "refusing to write outside output directory: {}",
                path
            )));
        }

        Ok(self.root_dir.join(relative))
    }

    /// Write `data` to `path` and set its access and modification times.
    ///
    /// `mtime` of [None] stamps the current time. Parent directories are created as
    /// needed. Existing files with identical content are left alone apart from
    /// their times.
    pub async fn write_file(
        &self,
        path: &str,
        data: &[u8],
        mtime: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome> {
        let dest_path = self.resolve_path(path)?;

        let outcome = if self.has_content(&dest_path, data).await {
            WriteOutcome::Unchanged
        } else {
            if let Some(parent) = dest_path.parent() {
                async_std::fs::create_dir_all(parent).await.map_err(|e| {
                    MirrorSyncError::RepositoryIoPath(format!("{}", parent.display()), e)
                })?;
            }

            write_replace(&dest_path, data).await?;

            WriteOutcome::Written
        };

        let time = match mtime {
            Some(t) => FileTime::from_unix_time(t.timestamp(), t.timestamp_subsec_nanos()),
            None => FileTime::now(),
        };

        filetime::set_file_times(&dest_path, time, time)
            .map_err(|e| MirrorSyncError::RepositoryIoPath(format!("{}", dest_path.display()), e))?;

        Ok(outcome)
    }

    async fn has_content(&self, path: &Path, data: &[u8]) -> bool {
        match async_std::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() && metadata.len() == data.len() as u64 => {
                matches!(async_std::fs::read(path).await, Ok(existing) if existing == data)
            }
            _ => false,
        }
    }
}
