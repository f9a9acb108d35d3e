// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP mirror client. */

use {
    crate::{
        error::{MirrorSyncError, Result},
        io::{DataResolver, DEFAULT_FETCH_TIMEOUT},
    },
    async_trait::async_trait,
    futures::{stream::TryStreamExt, AsyncRead},
    reqwest::{Client, ClientBuilder, IntoUrl, Url},
    std::{pin::Pin, time::Duration},
};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("debian-mirror-sync/", env!("CARGO_PKG_VERSION"));

fn io_error(path: &str, message: String) -> MirrorSyncError {
    MirrorSyncError::RepositoryIoPath(
        path.to_string(),
        std::io::Error::new(std::io::ErrorKind::Other, message),
    )
}

async fn fetch_url(
    client: &Client,
    root_url: &Url,
    path: &str,
) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
    let url = root_url.join(path.trim_start_matches('/'))?;

    let res = client
        .get(url)
        .send()
        .await
        .map_err(|e| io_error(path, format!("error sending HTTP request: {:?}", e)))?;
    let res = res
        .error_for_status()
        .map_err(|e| io_error(path, format!("bad HTTP status code: {:?}", e)))?;

    Ok(Box::pin(
        res.bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
            .into_async_read(),
    ))
}

/// Client for a mirror served via HTTP.
///
/// Instances are bound to a base URL. Paths are resolved relative to it, so
/// `https://deb.debian.org/debian` + `dists/stable/Release` fetches
/// `https://deb.debian.org/debian/dists/stable/Release`.
#[derive(Debug)]
pub struct HttpMirrorClient {
    client: Client,
    root_url: Url,
}

impl HttpMirrorClient {
    /// Construct an instance bound to a URL with the default request timeout.
    pub fn new(url: impl IntoUrl) -> Result<Self> {
        Self::with_timeout(url, DEFAULT_FETCH_TIMEOUT)
    }

    /// Construct an instance whose requests give up after `timeout`.
    pub fn with_timeout(url: impl IntoUrl, timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Self::new_client(client, url)
    }

    /// Construct an instance using the given [Client] and URL.
    pub fn new_client(client: Client, url: impl IntoUrl) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Trailing URLs are significant to the Url type when we .join(). So ensure
        // the URL has a trailing path.
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self { client, root_url })
    }

    /// The base URL of this mirror.
    pub fn url(&self) -> &Url {
        &self.root_url
    }
}

#[async_trait]
impl DataResolver for HttpMirrorClient {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        fetch_url(&self.client, &self.root_url, path).await
    }
}
