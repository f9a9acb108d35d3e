// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file primitives.

`Release` files are the main definition of a Debian repository distribution. They
consist of repository-level metadata fields followed by checksum sections listing
the *indices* files of the distribution:

```text
Origin: Debian
Date: Sat, 09 Oct 2021 09:34:56 UTC
Acquire-By-Hash: yes
MD5Sum:
 7fdf4db15250af5368cc52a91e8edbce   738242 contrib/Contents-all
SHA256:
 3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63   738242 contrib/Contents-all
```

[ReleaseSnapshot] represents one parsed `Release` file as obtained from a mirror.
Parsing is strict: any malformed checksum record or disagreement about a file's
size rejects the whole file. [FileEntry] holds the checksums declared for a single
indices file across all checksum sections.
*/

use {
    crate::error::{MirrorSyncError, Result},
    chrono::{DateTime, Utc},
    std::collections::{BTreeMap, HashMap},
};

/// Formatter string for dates in release files.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Checksum type / digest mechanism used in a release file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,

    /// SHA-512.
    Sha512,
}

impl ChecksumType {
    /// Name of the field in `Release` files announcing a section of this type.
    ///
    /// This is also the directory name used for `by-hash` paths.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Resolve a checksum section label to a known type.
    ///
    /// Matching is case-insensitive. Unknown labels resolve to [None].
    pub fn from_field_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5sum" | "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

/// The checksums and size declared for one file in a `Release` file.
///
/// A file is typically listed once per checksum section. Each listing appends a
/// checksum and the label of the section it appeared in. The two lists are always
/// index aligned and never empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    checksums: Vec<String>,
    checksum_types: Vec<String>,
    size: u64,
}

impl FileEntry {
    /// Construct an entry from its first checksum record.
    pub fn new(checksum_type: impl ToString, checksum: impl ToString, size: u64) -> Self {
        Self {
            checksums: vec![checksum.to_string()],
            checksum_types: vec![checksum_type.to_string()],
            size,
        }
    }

    /// Register an additional checksum record for this file.
    pub fn push(&mut self, checksum_type: impl ToString, checksum: impl ToString) {
        self.checksum_types.push(checksum_type.to_string());
        self.checksums.push(checksum.to_string());
    }

    /// The declared size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checksum strings, in the order their sections appeared.
    pub fn checksums(&self) -> &[String] {
        &self.checksums
    }

    /// Checksum section labels, index aligned with [Self::checksums()].
    pub fn checksum_types(&self) -> &[String] {
        &self.checksum_types
    }

    /// Iterate over `(label, checksum)` pairs.
    pub fn iter_checksums(&self) -> impl Iterator<Item = (&str, &str)> {
        self.checksum_types
            .iter()
            .map(|s| s.as_str())
            .zip(self.checksums.iter().map(|s| s.as_str()))
    }

    /// The `(label, checksum)` pair used to verify fetched content.
    ///
    /// This is the last listed section, which is not necessarily the strongest
    /// algorithm if a file lists sections in an unusual order.
    pub fn verification_checksum(&self) -> (&str, &str) {
        // Construction guarantees at least 1 record.
        let last = self.checksums.len() - 1;

        (&self.checksum_types[last], &self.checksums[last])
    }

    /// Obtain `by-hash` path variants of a file path, one per checksum record.
    ///
    /// The `by-hash` directory is a sibling of the file.
    pub fn by_hash_paths(&self, path: &str) -> Vec<String> {
        self.iter_checksums()
            .map(|(label, checksum)| {
                if let Some((prefix, _)) = path.rsplit_once('/') {
                    format!("{}/by-hash/{}/{}", prefix, label, checksum)
                } else {
                    format!("by-hash/{}/{}", label, checksum)
                }
            })
            .collect()
    }
}

/// Parser state while scanning lines.
enum ParseState {
    /// Reading `Key: Value` header lines.
    InHeader,

    /// Inside a checksum section announced by a `Label:` line.
    InChecksumSection(String),
}

/// A parsed `Release` file as served by a specific mirror.
#[derive(Clone, Debug)]
pub struct ReleaseSnapshot {
    header: HashMap<String, String>,
    files: BTreeMap<String, FileEntry>,
    timestamp: Option<DateTime<Utc>>,
    raw: Vec<u8>,
    signature: Vec<u8>,
    inline_signature: Vec<u8>,
    origin_mirror: Option<String>,
    origin_path: Option<String>,
}

impl ReleaseSnapshot {
    /// Parse a `Release` file from its raw bytes.
    ///
    /// The bytes are retained verbatim so signatures over them can be verified
    /// and so they can be persisted unmodified.
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let mut header = HashMap::new();
        let mut files: BTreeMap<String, FileEntry> = BTreeMap::new();
        let mut state = ParseState::InHeader;

        let text = String::from_utf8_lossy(&raw);

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;

            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with(|c: char| c == ' ' || c == '\t') {
                let label = match &state {
                    ParseState::InChecksumSection(label) => label,
                    ParseState::InHeader => {
                        return Err(MirrorSyncError::ReleaseRecordOutsideSection(line_number));
                    }
                };

                // Values are of form: <digest> <size> <path>
                let parts = line.split_ascii_whitespace().collect::<Vec<_>>();
                if parts.len() != 3 {
                    return Err(MirrorSyncError::ReleaseRecordFieldCount(
                        line_number,
                        parts.len(),
                    ));
                }
                let (checksum, size, path) = (parts[0], parts[1], parts[2]);

                let size = size.parse::<u64>().map_err(|_| {
                    MirrorSyncError::ReleaseRecordBadSize(line_number, size.to_string())
                })?;

                if let Some(entry) = files.get_mut(path) {
                    if entry.size != size {
                        return Err(MirrorSyncError::ReleaseSizeMismatch {
                            path: path.to_string(),
                            first: entry.size,
                            second: size,
                        });
                    }

                    entry.push(label, checksum);
                } else {
                    files.insert(path.to_string(), FileEntry::new(label, checksum, size));
                }
            } else {
                let (key, value) = line.trim().split_once(':').ok_or_else(|| {
                    MirrorSyncError::ReleaseHeaderMissingColon(line_number, line.to_string())
                })?;

                let key = key.trim();
                let value = value.trim();

                state = if value.is_empty() {
                    ParseState::InChecksumSection(key.to_string())
                } else {
                    header.insert(key.to_string(), value.to_string());
                    ParseState::InHeader
                };
            }
        }

        let timestamp = header.get("Date").and_then(|v| parse_date(v));

        Ok(Self {
            header,
            files,
            timestamp,
            raw,
            signature: vec![],
            inline_signature: vec![],
            origin_mirror: None,
            origin_path: None,
        })
    }

    /// Obtain the raw string value of a header field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).map(|v| v.as_str())
    }

    /// Iterate over whitespace delimited words of a header field.
    pub fn iter_field_words(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field_str(name).map(|v| v.split_ascii_whitespace())
    }

    /// All header fields.
    pub fn header(&self) -> &HashMap<String, String> {
        &self.header
    }

    /// Origin of the repository.
    pub fn origin(&self) -> Option<&str> {
        self.field_str("Origin")
    }

    /// Label for the repository.
    pub fn label(&self) -> Option<&str> {
        self.field_str("Label")
    }

    /// Suite of this repository.
    ///
    /// e.g. `stable`, `unstable`, `experimental`.
    pub fn suite(&self) -> Option<&str> {
        self.field_str("Suite")
    }

    /// Codename of this repository.
    pub fn codename(&self) -> Option<&str> {
        self.field_str("Codename")
    }

    /// Version of this repository.
    pub fn version(&self) -> Option<&str> {
        self.field_str("Version")
    }

    /// Names of components within this repository.
    pub fn components(&self) -> Option<impl Iterator<Item = &str>> {
        self.iter_field_words("Components")
    }

    /// Debian machine architectures supported by this repository.
    pub fn architectures(&self) -> Option<impl Iterator<Item = &str>> {
        self.iter_field_words("Architectures")
    }

    /// Time the release file was created, as its raw string value.
    pub fn date_str(&self) -> Option<&str> {
        self.field_str("Date")
    }

    /// The freshness timestamp of this file.
    ///
    /// [None] if the `Date` field is missing or unparsable. [None] orders before
    /// every real timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Time the release file should be considered expired by the client.
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.field_str("Valid-Until").and_then(parse_date)
    }

    /// Whether to acquire files by hash.
    ///
    /// `true` iff the `Acquire-By-Hash` field is `yes`.
    pub fn acquire_by_hash(&self) -> bool {
        self.field_str("Acquire-By-Hash") == Some("yes")
    }

    /// Whether this snapshot is strictly fresher than another one.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.timestamp > other.timestamp
    }

    /// All declared files, keyed by repository-relative path.
    pub fn files(&self) -> &BTreeMap<String, FileEntry> {
        &self.files
    }

    /// Obtain the entry for a given path.
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Iterate over declared files located under a directory path.
    ///
    /// An empty prefix matches every file.
    pub fn iter_files_under<'a>(
        &'a self,
        directory: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a FileEntry)> + 'a {
        let directory = directory.trim_matches('/');

        self.files.iter().filter_map(move |(path, entry)| {
            let matches = directory.is_empty()
                || path
                    .strip_prefix(directory)
                    .map(|rest| rest.starts_with('/'))
                    .unwrap_or(false);

            if matches {
                Some((path.as_str(), entry))
            } else {
                None
            }
        })
    }

    /// The exact bytes this snapshot was parsed from.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Raw detached signature (`Release.gpg`) content. Empty if not fetched.
    pub fn signature_bytes(&self) -> &[u8] {
        &self.signature
    }

    /// Raw inline signed (`InRelease`) content. Empty if not fetched.
    pub fn inline_signature_bytes(&self) -> &[u8] {
        &self.inline_signature
    }

    /// Record fetched signature payloads.
    pub fn set_signatures(&mut self, signature: Vec<u8>, inline_signature: Vec<u8>) {
        self.signature = signature;
        self.inline_signature = inline_signature;
    }

    /// Record where this snapshot came from.
    pub fn set_origin(&mut self, mirror: impl ToString, path: impl ToString) {
        self.origin_mirror = Some(mirror.to_string());
        self.origin_path = Some(path.to_string());
    }

    /// The mirror this snapshot was adopted from.
    pub fn origin_mirror(&self) -> Option<&str> {
        self.origin_mirror.as_deref()
    }

    /// The path of the `Release` file this snapshot was adopted from.
    pub fn origin_path(&self) -> Option<&str> {
        self.origin_path.as_deref()
    }
}

/// Parse a `Date` style field.
///
/// Only complete dates in [DATE_FORMAT] or RFC 2822 form are accepted.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    // Debian archives write `UTC` where a numeric zone is expected.
    let value = match value.strip_suffix("UTC") {
        Some(prefix) => format!("{}+0000", prefix),
        None => value.to_string(),
    };

    DateTime::parse_from_str(&value, DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc2822(&value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod test {
    use {super::*, chrono::TimeZone, indoc::indoc};

    const BASIC_RELEASE: &str = indoc! {"
        Origin: Debian
        Label: Debian
        Suite: stable
        Codename: bullseye
        Date: Sat, 09 Oct 2021 09:34:56 UTC
        Acquire-By-Hash: yes
        Architectures: all amd64 arm64
        Components: main contrib non-free
        MD5Sum:
         7fdf4db15250af5368cc52a91e8edbce   738242 contrib/Contents-all
         e3b0c44298fc1c149afbf4c8996fb924        0 main/binary-amd64/Packages
        SHA256:
         3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63   738242 contrib/Contents-all
         e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855        0 main/binary-amd64/Packages
    "};

    #[test]
    fn parse_basic() -> Result<()> {
        let release = ReleaseSnapshot::parse(BASIC_RELEASE.as_bytes().to_vec())?;

        assert_eq!(release.origin(), Some("Debian"));
        assert_eq!(release.label(), Some("Debian"));
        assert_eq!(release.suite(), Some("stable"));
        assert_eq!(release.codename(), Some("bullseye"));
        assert!(release.acquire_by_hash());
        assert_eq!(
            release.components().unwrap().collect::<Vec<_>>(),
            vec!["main", "contrib", "non-free"]
        );
        assert_eq!(
            release.architectures().unwrap().collect::<Vec<_>>(),
            vec!["all", "amd64", "arm64"]
        );
        assert_eq!(release.date_str(), Some("Sat, 09 Oct 2021 09:34:56 UTC"));
        assert_eq!(
            release.timestamp(),
            Utc.with_ymd_and_hms(2021, 10, 9, 9, 34, 56).single()
        );
        assert!(release.valid_until().is_none());
        assert_eq!(release.raw_bytes(), BASIC_RELEASE.as_bytes());

        // Section announcements are not headers.
        assert!(release.field_str("MD5Sum").is_none());
        assert_eq!(release.header().len(), 8);

        assert_eq!(release.files().len(), 2);
        let entry = release.file("contrib/Contents-all").unwrap();
        assert_eq!(entry.size(), 738242);
        assert_eq!(entry.checksum_types(), &["MD5Sum", "SHA256"]);
        assert_eq!(
            entry.checksums(),
            &[
                "7fdf4db15250af5368cc52a91e8edbce",
                "3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63"
            ]
        );
        assert_eq!(
            entry.verification_checksum(),
            (
                "SHA256",
                "3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63"
            )
        );
        assert_eq!(
            entry.by_hash_paths("contrib/Contents-all"),
            vec![
                "contrib/by-hash/MD5Sum/7fdf4db15250af5368cc52a91e8edbce",
                "contrib/by-hash/SHA256/3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63"
            ]
        );

        Ok(())
    }

    #[test]
    fn files_under_directory() -> Result<()> {
        let release = ReleaseSnapshot::parse(BASIC_RELEASE.as_bytes().to_vec())?;

        let paths = release
            .iter_files_under("main/binary-amd64")
            .map(|(path, _)| path)
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["main/binary-amd64/Packages"]);

        assert_eq!(release.iter_files_under("main/binary").count(), 0);
        assert_eq!(release.iter_files_under("").count(), 2);

        Ok(())
    }

    #[test]
    fn size_mismatch_rejects_file() {
        let data = indoc! {"
            Date: Sat, 09 Oct 2021 09:34:56 UTC
            MD5Sum:
             7fdf4db15250af5368cc52a91e8edbce 100 main/binary-amd64/Packages
            SHA256:
             3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63 101 main/binary-amd64/Packages
        "};

        assert!(matches!(
            ReleaseSnapshot::parse(data.as_bytes().to_vec()),
            Err(MirrorSyncError::ReleaseSizeMismatch { first: 100, second: 101, .. })
        ));
    }

    #[test]
    fn malformed_records_reject_file() {
        let data = indoc! {"
            Date: Sat, 09 Oct 2021 09:34:56 UTC
            SHA256:
             3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63 100
        "};
        assert!(matches!(
            ReleaseSnapshot::parse(data.as_bytes().to_vec()),
            Err(MirrorSyncError::ReleaseRecordFieldCount(3, 2))
        ));

        let data = indoc! {"
            SHA256:
             3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63 big main/Packages
        "};
        assert!(matches!(
            ReleaseSnapshot::parse(data.as_bytes().to_vec()),
            Err(MirrorSyncError::ReleaseRecordBadSize(2, _))
        ));

        let data = " abc 10 main/Packages\n";
        assert!(matches!(
            ReleaseSnapshot::parse(data.as_bytes().to_vec()),
            Err(MirrorSyncError::ReleaseRecordOutsideSection(1))
        ));

        let data = "Origin Debian\n";
        assert!(matches!(
            ReleaseSnapshot::parse(data.as_bytes().to_vec()),
            Err(MirrorSyncError::ReleaseHeaderMissingColon(1, _))
        ));
    }

    #[test]
    fn missing_or_bad_date_has_no_timestamp() -> Result<()> {
        let dated = ReleaseSnapshot::parse(b"Date: Sat, 09 Oct 2021 09:34:56 UTC\n".to_vec())?;
        let undated = ReleaseSnapshot::parse(b"Origin: Debian\n".to_vec())?;
        let garbage = ReleaseSnapshot::parse(b"Date: yesterday-ish\n".to_vec())?;

        assert!(undated.timestamp().is_none());
        assert!(garbage.timestamp().is_none());
        assert!(dated.is_newer_than(&undated));
        assert!(!undated.is_newer_than(&dated));
        assert!(!undated.is_newer_than(&garbage));
        assert!(!garbage.is_newer_than(&undated));

        for value in ["garbage", "99999", "Sat, 09 Oct 2021", "09 Oct 2021 09:34:56"] {
            let release =
                ReleaseSnapshot::parse(format!("Origin: Debian\nDate: {}\n", value).into_bytes())?;
            assert!(release.timestamp().is_none(), "{:?}", value);
        }

        let gmt = ReleaseSnapshot::parse(b"Date: Sat, 09 Oct 2021 09:34:56 GMT\n".to_vec())?;
        assert_eq!(gmt.timestamp(), dated.timestamp());

        Ok(())
    }

    #[test]
    fn numeric_timezone_offsets() -> Result<()> {
        let a = ReleaseSnapshot::parse(b"Date: Sat, 09 Oct 2021 09:34:56 +0000\n".to_vec())?;
        let b = ReleaseSnapshot::parse(b"Date: Sat, 09 Oct 2021 10:34:55 +0100\n".to_vec())?;

        assert!(a.is_newer_than(&b));
        assert_eq!(
            a.timestamp().unwrap().format(DATE_FORMAT).to_string(),
            "Sat, 09 Oct 2021 09:34:56 +0000"
        );

        Ok(())
    }

    #[test]
    fn verification_uses_last_listed_section() -> Result<()> {
        // Sections listed strongest-first still verify with the last one.
        let data = indoc! {"
            SHA256:
             e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855 0 main/Packages
            MD5Sum:
             d41d8cd98f00b204e9800998ecf8427e 0 main/Packages
        "};
        let release = ReleaseSnapshot::parse(data.as_bytes().to_vec())?;

        assert_eq!(
            release.file("main/Packages").unwrap().verification_checksum(),
            ("MD5Sum", "d41d8cd98f00b204e9800998ecf8427e")
        );

        Ok(())
    }

    #[test]
    fn checksum_type_labels() {
        assert_eq!(ChecksumType::from_field_name("MD5Sum"), Some(ChecksumType::Md5));
        assert_eq!(ChecksumType::from_field_name("sha256"), Some(ChecksumType::Sha256));
        assert_eq!(ChecksumType::from_field_name("SHA512"), Some(ChecksumType::Sha512));
        assert_eq!(ChecksumType::from_field_name("BLAKE3"), None);

        for checksum in [
            ChecksumType::Md5,
            ChecksumType::Sha1,
            ChecksumType::Sha256,
            ChecksumType::Sha512,
        ] {
            assert_eq!(
                ChecksumType::from_field_name(checksum.field_name()),
                Some(checksum)
            );
        }
    }
}
