// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository mirror synchronization.

This crate keeps a local copy of a Debian repository's indices in sync with a set
of upstream mirrors. Mirrors frequently lag behind each other, and some serve
stale or broken content. So rather than trusting any single mirror, a sync:

1. Queries every mirror for the distribution's `Release` file and keeps the one with
   the newest `Date` whose detached signature verifies against a trusted keyring.
   See [race].
2. Downloads every file the winning `Release` declares for the configured
   component, accepting content only when its checksum matches. Mirrors are tried
   winner first, then in list order. See [fetch].
3. Writes verified content to disk, optionally with `by-hash` copies, and sets file
   times to the `Release` date. See [output].

[sync::MirrorSync] ties these together.

# A Tour of Functionality

[release::ReleaseSnapshot] parses `Release` files. [signature] verifies detached
signatures against any [signature::Keyring]; [keyring::PgpKeyring] is the standard
implementation, loaded from armored or binary key files.

Content is obtained through the [io::DataResolver] trait. [http::HttpMirrorClient]
fetches from HTTP mirrors and [filesystem::FilesystemMirrorReader] from local
directories. [mirror::Mirror] binds a mirror list entry to its resolver.

[config::SyncConfig] describes a sync and can be deserialized from YAML.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>. Please file issues
and pull requests there.
*/

pub mod config;
pub mod error;
pub mod fetch;
pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;
pub mod io;
pub mod keyring;
pub mod mirror;
pub mod output;
pub mod race;
pub mod release;
pub mod signature;
#[cfg(test)]
mod signing_key;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil {
    use {
        crate::{
            error::{MirrorSyncError, Result},
            io::DataResolver,
            mirror::Mirror,
        },
        async_trait::async_trait,
        futures::AsyncRead,
        std::{
            collections::HashMap,
            pin::Pin,
            sync::{Arc, Mutex},
            time::Duration,
        },
    };

    /// A resolver serving content from memory, optionally after a delay.
    #[derive(Default)]
    pub struct MemoryResolver {
        files: HashMap<String, Vec<u8>>,
        delays: HashMap<String, Duration>,
        requests: Mutex<Vec<String>>,
    }

    impl MemoryResolver {
        pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
            self.files.insert(path.to_string(), data.into());
            self
        }

        pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
            self.delays.insert(path.to_string(), delay);
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests
                .lock()
                .map(|requests| requests.clone())
                .unwrap_or_default()
        }

        pub fn into_mirror(self, prefix: &str) -> Mirror {
            Mirror::new(prefix, Arc::new(self))
        }
    }

    #[async_trait]
    impl DataResolver for MemoryResolver {
        async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(path.to_string());
            }

            if let Some(delay) = self.delays.get(path) {
                tokio::time::sleep(*delay).await;
            }

            let data = self.files.get(path).cloned().ok_or_else(|| {
                MirrorSyncError::RepositoryIoPath(
                    path.to_string(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                )
            })?;

            Ok(Box::pin(futures::io::Cursor::new(data)))
        }
    }

    /// A minimal `Release` file with the given `Date`.
    pub fn release_with_date(date: &str) -> Vec<u8> {
        format!("Origin: Debian\nSuite: stable\nDate: {}\n", date).into_bytes()
    }
}
