// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Trusted key storage backed by OpenPGP public keys. */

use {
    crate::{
        error::{MirrorSyncError, Result},
        signature::{format_key_id, Keyring, SigningKey},
    },
    log::{info, warn},
    pgp::{
        packet::Subpacket,
        types::{KeyId, KeyTrait},
        Deserializable, Signature, SignedPublicKey,
    },
    std::{io::Cursor, path::Path},
};

/// Whether binding signatures allow a key to make signatures.
///
/// Keys whose binding signatures carry no key flags at all are treated as usable.
fn can_sign<'a>(signatures: impl Iterator<Item = &'a Signature>) -> bool {
    let mut saw_flags = false;

    for sig in signatures {
        if sig
            .config
            .hashed_subpackets
            .iter()
            .any(|p| matches!(p, Subpacket::KeyFlags(_)))
        {
            saw_flags = true;

            if sig.key_flags().sign() {
                return true;
            }
        }
    }

    !saw_flags
}

/// A [Keyring] holding parsed public keys.
///
/// Primary keys and subkeys are both candidates for verification.
#[derive(Clone, Debug, Default)]
pub struct PgpKeyring {
    keys: Vec<SignedPublicKey>,
}

impl PgpKeyring {
    /// Construct an instance from already parsed keys.
    pub fn new(keys: Vec<SignedPublicKey>) -> Self {
        Self { keys }
    }

    /// Parse all keys in a blob of armored or binary key data.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut res = Self::default();
        res.add_key_data(data)?;

        Ok(res)
    }

    /// Load keys from a single file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| MirrorSyncError::RepositoryIoPath(format!("{}", path.display()), e))?;

        Self::from_bytes(&data)
    }

    /// Load keys from every `.gpg` and `.asc` file under a directory.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self> {
        let mut res = Self::default();

        for entry in walkdir::WalkDir::new(path.as_ref()).sort_by_file_name() {
            let entry = entry?;

            if !entry.file_type().is_file() {
                continue;
            }

            let is_key_file = matches!(
                entry.path().extension().and_then(|e| e.to_str()),
                Some("gpg" | "asc")
            );
            if !is_key_file {
                continue;
            }

            let data = std::fs::read(entry.path()).map_err(|e| {
                MirrorSyncError::RepositoryIoPath(format!("{}", entry.path().display()), e)
            })?;

            match res.add_key_data(&data) {
                Ok(count) => {
                    info!("loaded {} keys from {}", count, entry.path().display());
                }
                Err(e) => {
                    warn!("ignoring {}: {}", entry.path().display(), e);
                }
            }
        }

        Ok(res)
    }

    /// Load keys from a file or a directory of key files.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.is_dir() {
            Self::from_directory(path)
        } else {
            Self::from_file(path)
        }
    }

    /// Parse key data and add the keys to this instance.
    ///
    /// Returns the number of keys added.
    pub fn add_key_data(&mut self, data: &[u8]) -> Result<usize> {
        let armored = data
            .iter()
            .skip_while(|b| b.is_ascii_whitespace())
            .take(10)
            .copied()
            .collect::<Vec<_>>()
            == b"-----BEGIN";

        let keys = if armored {
            SignedPublicKey::from_armor_many(Cursor::new(data))?
                .0
                .collect::<pgp::errors::Result<Vec<_>>>()?
        } else {
            SignedPublicKey::from_bytes_many(Cursor::new(data))
                .collect::<pgp::errors::Result<Vec<_>>>()?
        };

        let count = keys.len();
        self.keys.extend(keys);

        Ok(count)
    }

    /// Number of primary keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are present.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Keyring for PgpKeyring {
    fn find_signing_keys(&self, key_id: &KeyId) -> Vec<&dyn SigningKey> {
        let mut res: Vec<&dyn SigningKey> = vec![];

        for key in &self.keys {
            if &key.primary_key.key_id() == key_id
                && can_sign(key.details.users.iter().flat_map(|u| u.signatures.iter()))
            {
                res.push(&key.primary_key);
            }

            for subkey in &key.public_subkeys {
                if &subkey.key.key_id() == key_id && can_sign(subkey.signatures.iter()) {
                    res.push(&subkey.key);
                }
            }
        }

        if res.is_empty() {
            log::debug!("keyring has no signing key {}", format_key_id(key_id));
        }

        res
    }
}
