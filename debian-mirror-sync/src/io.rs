// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::{
        error::{MirrorSyncError, Result},
        release::ChecksumType,
    },
    async_compression::futures::bufread::{BzDecoder, GzipDecoder, LzmaDecoder, XzDecoder},
    async_trait::async_trait,
    digest::Digest,
    futures::{AsyncBufRead, AsyncRead, AsyncReadExt},
    pgp::crypto::{HashAlgorithm, Hasher},
    std::{io, pin::Pin, time::Duration},
};

/// Default deadline for a single fetch operation.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A content hasher usable both for file checksums and PGP signature digests.
///
/// The pgp crate's hashers can't be cloned or constructed for arbitrary digests,
/// so we carry our own.
#[derive(Clone)]
pub enum ChecksumHasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl ChecksumHasher {
    /// Obtain a hasher for a [ChecksumType].
    pub fn new(checksum: ChecksumType) -> Self {
        match checksum {
            ChecksumType::Md5 => Self::Md5(md5::Md5::new()),
            ChecksumType::Sha1 => Self::Sha1(sha1::Sha1::new()),
            ChecksumType::Sha256 => Self::Sha256(sha2::Sha256::new()),
            ChecksumType::Sha512 => Self::Sha512(sha2::Sha512::new()),
        }
    }

    /// Obtain a hasher for a PGP hash algorithm, if we support it.
    pub fn from_pgp_algorithm(algorithm: HashAlgorithm) -> Option<Self> {
        match algorithm {
            HashAlgorithm::MD5 => Some(Self::Md5(md5::Md5::new())),
            HashAlgorithm::SHA1 => Some(Self::Sha1(sha1::Sha1::new())),
            HashAlgorithm::SHA2_256 => Some(Self::Sha256(sha2::Sha256::new())),
            HashAlgorithm::SHA2_384 => Some(Self::Sha384(sha2::Sha384::new())),
            HashAlgorithm::SHA2_512 => Some(Self::Sha512(sha2::Sha512::new())),
            _ => None,
        }
    }

    /// Compute the lowercase hex digest of a buffer.
    pub fn hex_digest(checksum: ChecksumType, data: &[u8]) -> String {
        let mut hasher = Box::new(Self::new(checksum));
        hasher.update(data);
        hex::encode(hasher.finish())
    }
}

impl io::Write for ChecksumHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Hasher for ChecksumHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(digest) => digest.update(data),
            Self::Sha1(digest) => digest.update(data),
            Self::Sha256(digest) => digest.update(data),
            Self::Sha384(digest) => digest.update(data),
            Self::Sha512(digest) => digest.update(data),
        }
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        match *self {
            Self::Md5(digest) => digest.finalize().to_vec(),
            Self::Sha1(digest) => digest.finalize().to_vec(),
            Self::Sha256(digest) => digest.finalize().to_vec(),
            Self::Sha384(digest) => digest.finalize().to_vec(),
            Self::Sha512(digest) => digest.finalize().to_vec(),
        }
    }
}

/// Compression format used by Debian index files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// XZ compression (.xz extension).
    Xz,

    /// Gzip compression (.gz extension).
    Gzip,

    /// Bzip2 compression (.bz2 extension).
    Bzip2,

    /// LZMA compression (.lzma extension).
    Lzma,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Xz => ".xz",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
            Self::Lzma => ".lzma",
        }
    }

    /// Resolve the compression of a path from its extension.
    ///
    /// Returns the compression format and the path with the extension stripped.
    /// Unknown extensions resolve to [Compression::None] and the unmodified path.
    pub fn from_path(path: &str) -> (Self, &str) {
        for compression in [Self::Xz, Self::Gzip, Self::Bzip2, Self::Lzma] {
            if let Some(stripped) = path.strip_suffix(compression.extension()) {
                return (compression, stripped);
            }
        }

        (Self::None, path)
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed<'a>(
    stream: impl AsyncBufRead + Send + 'a,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send + 'a>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
        Compression::Xz => Box::pin(XzDecoder::new(stream)),
        Compression::Bzip2 => Box::pin(BzDecoder::new(stream)),
        Compression::Lzma => Box::pin(LzmaDecoder::new(stream)),
    }
}

/// Decompress an in-memory buffer.
pub async fn decompress(data: &[u8], compression: Compression) -> io::Result<Vec<u8>> {
    let mut reader = read_decompressed(futures::io::Cursor::new(data), compression);

    let mut res = vec![];
    reader.read_to_end(&mut res).await?;

    Ok(res)
}

/// Generic mechanism for obtaining content at a given path.
///
/// Implementations only need to implement `get_path()`.
#[async_trait]
pub trait DataResolver: Sync {
    /// Get the content of a relative path as an async reader.
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Fetch the entire content of a relative path into memory.
    ///
    /// The whole operation, including connection setup and reading the body, must
    /// complete within `deadline`. Otherwise [MirrorSyncError::FetchTimeout] is
    /// returned.
    async fn get_path_bytes(&self, path: &str, deadline: Duration) -> Result<Vec<u8>> {
        let fetch = async {
            let mut reader = self.get_path(path).await?;

            let mut data = vec![];
            reader
                .read_to_end(&mut data)
                .await
                .map_err(|e| MirrorSyncError::RepositoryIoPath(path.to_string(), e))?;

            Ok(data)
        };

        tokio::time::timeout(deadline, fetch)
            .await
            .map_err(|_| MirrorSyncError::FetchTimeout(path.to_string()))?
    }
}

#[cfg(test)]
mod test {
    use {super::*, std::io::Write};

    #[test]
    fn known_digests() {
        assert_eq!(
            ChecksumHasher::hex_digest(ChecksumType::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            ChecksumHasher::hex_digest(ChecksumType::Sha1, b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            ChecksumHasher::hex_digest(ChecksumType::Sha256, b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            ChecksumHasher::hex_digest(ChecksumType::Sha512, b"abc"),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn compression_from_path() {
        assert_eq!(
            Compression::from_path("main/binary-amd64/Packages.gz"),
            (Compression::Gzip, "main/binary-amd64/Packages")
        );
        assert_eq!(
            Compression::from_path("main/i18n/Translation-en.bz2"),
            (Compression::Bzip2, "main/i18n/Translation-en")
        );
        assert_eq!(
            Compression::from_path("main/binary-amd64/Release"),
            (Compression::None, "main/binary-amd64/Release")
        );
    }

    #[tokio::test]
    async fn gzip_decompression() -> io::Result<()> {
        let mut encoder = async_compression::futures::bufread::GzipEncoder::new(
            futures::io::Cursor::new(b"Package: foo\n".to_vec()),
        );
        let mut compressed = vec![];
        encoder.read_to_end(&mut compressed).await?;

        assert_eq!(
            decompress(&compressed, Compression::Gzip).await?,
            b"Package: foo\n"
        );

        let mut hasher = ChecksumHasher::new(ChecksumType::Sha256);
        hasher.write_all(b"")?;
        assert_eq!(
            hex::encode(Box::new(hasher).finish()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        Ok(())
    }
}
