// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Mirror definitions.

A mirror is identified by its prefix string as written in the mirror list. The
prefix also determines how content is fetched from it.
*/

use {
    crate::{
        error::{MirrorSyncError, Result},
        filesystem::FilesystemMirrorReader,
        io::DataResolver,
    },
    std::{fmt::Formatter, sync::Arc, time::Duration},
    url::Url,
};

/// A [DataResolver] that can be shared across tasks.
pub type SharedResolver = Arc<dyn DataResolver + Send + Sync>;

/// A named source of repository content.
#[derive(Clone)]
pub struct Mirror {
    prefix: String,
    resolver: SharedResolver,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl std::fmt::Display for Mirror {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.prefix)
    }
}

impl Mirror {
    /// Construct an instance from a prefix and the resolver serving it.
    pub fn new(prefix: impl ToString, resolver: SharedResolver) -> Self {
        Self {
            prefix: prefix.to_string().trim_end_matches('/').to_string(),
            resolver,
        }
    }

    /// Construct an instance from a mirror list entry.
    ///
    /// Entries containing `://` are URLs. `http` and `https` URLs are fetched over
    /// the network with requests bounded by `timeout`. `file` URLs and anything
    /// that isn't a URL are local directories.
    #[cfg_attr(not(feature = "http"), allow(unused_variables))]
    pub fn from_prefix(prefix: &str, timeout: Duration) -> Result<Self> {
        let prefix = prefix.trim().trim_end_matches('/');

        let resolver: SharedResolver = if prefix.contains("://") {
            let url = Url::parse(prefix)?;

            match url.scheme() {
                #[cfg(feature = "http")]
                "http" | "https" => Arc::new(crate::http::HttpMirrorClient::with_timeout(
                    url.clone(),
                    timeout,
                )?),
                "file" => Arc::new(FilesystemMirrorReader::from_url(&url)?),
                scheme => {
                    return Err(MirrorSyncError::UnsupportedMirrorScheme(scheme.to_string()));
                }
            }
        } else {
            Arc::new(FilesystemMirrorReader::new(prefix))
        };

        Ok(Self::new(prefix, resolver))
    }

    /// The prefix identifying this mirror.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fetch a path relative to this mirror, bounded by a deadline.
    pub async fn fetch(&self, path: &str, deadline: Duration) -> Result<Vec<u8>> {
        self.resolver.get_path_bytes(path, deadline).await
    }
}
