// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! End to end synchronization of a repository component.

A sync runs in phases:

1. A [MirrorRace] selects the freshest authentic `Release` file.
2. Files the `Release` lists under the configured component are fetched with a
   [ChecksumFetcher]. Compressed indices are fetched first. Their decompressed
   counterparts are derived locally instead of being downloaded again.
3. Verified content is written through a [FilesystemOutputWriter], stamped with
   the `Release` date.

Individual file failures are logged and reported but only fail the sync when no
selected file could be obtained.
*/

use {
    crate::{
        config::{read_mirror_list, RepoPath, SyncConfig},
        error::{MirrorSyncError, Result},
        fetch::{verify_content, ChecksumFetcher, FetchFailure},
        io::{decompress, Compression, DEFAULT_FETCH_TIMEOUT},
        keyring::PgpKeyring,
        mirror::Mirror,
        output::{FilesystemOutputWriter, WriteOutcome},
        race::{MirrorRace, Verification, DEFAULT_STAGGER},
        release::{FileEntry, ReleaseSnapshot},
    },
    log::{info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::Path,
        sync::Arc,
        time::Duration,
    },
};

/// Summary of a completed sync.
#[derive(Debug)]
pub struct SyncReport {
    /// The `Release` file that drove the sync.
    pub release: ReleaseSnapshot,

    /// Output paths whose content was written.
    pub written: Vec<String>,

    /// Output paths that already had the desired content.
    pub unchanged: Vec<String>,

    /// Distribution relative paths produced by decompressing another file.
    pub decompressed: Vec<String>,

    /// Files no mirror could provide.
    pub failed: Vec<FetchFailure>,
}

impl SyncReport {
    fn record(&mut self, path: String, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written.push(path),
            WriteOutcome::Unchanged => self.unchanged.push(path),
        }
    }
}

/// Synchronizes one repository component from a set of mirrors.
#[derive(Debug)]
pub struct MirrorSync {
    repo: RepoPath,
    mirrors: Vec<Mirror>,
    verification: Verification,
    writer: FilesystemOutputWriter,
    tree: bool,
    timeout: Duration,
    stagger: Duration,
}

impl MirrorSync {
    /// Construct an instance writing to `output`.
    pub fn new(
        repo: RepoPath,
        mirrors: Vec<Mirror>,
        verification: Verification,
        output: impl AsRef<Path>,
    ) -> Self {
        Self {
            repo,
            mirrors,
            verification,
            writer: FilesystemOutputWriter::new(output),
            tree: false,
            timeout: DEFAULT_FETCH_TIMEOUT,
            stagger: DEFAULT_STAGGER,
        }
    }

    /// Construct an instance from a [SyncConfig].
    ///
    /// This reads the mirror list and, unless insecure, loads the keyring.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let repo = config.repo_path()?;

        let mut mirrors = vec![];
        for prefix in read_mirror_list(&config.mirrors)? {
            match Mirror::from_prefix(&prefix, config.timeout()) {
                Ok(mirror) => mirrors.push(mirror),
                Err(e) => warn!("ignoring mirror {}: {}", prefix, e),
            }
        }

        if mirrors.is_empty() {
            return Err(MirrorSyncError::NoMirrors);
        }

        let verification = if config.insecure {
            warn!("Release signatures will not be verified");
            Verification::Insecure
        } else {
            let keyring = PgpKeyring::from_path(&config.keyring)?;

            if keyring.is_empty() {
                return Err(MirrorSyncError::KeyringEmpty(format!(
                    "{}",
                    config.keyring.display()
                )));
            }

            info!(
                "loaded {} keys from {}",
                keyring.len(),
                config.keyring.display()
            );
            Verification::Keyring(Arc::new(keyring))
        };

        Ok(Self::new(repo, mirrors, verification, &config.output)
            .tree(config.tree)
            .timeout(config.timeout())
            .stagger(config.stagger()))
    }

    /// Whether to write the full repository tree.
    ///
    /// In tree mode files land under `<output>/<repo path>/` and the `Release` files
    /// are written to `<output>/<distribution>/`. Otherwise files land directly in
    /// `<output>` and `Release` files are not written.
    #[must_use]
    pub fn tree(mut self, tree: bool) -> Self {
        self.tree = tree;
        self
    }

    /// Set the deadline for each individual fetch.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay between launching mirror queries.
    #[must_use]
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Mirrors in list order.
    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    /// Where a distribution relative path is written, relative to the output root.
    fn output_path(&self, path: &str) -> Option<String> {
        let relative = self.repo.component_relative(path)?;

        Some(if self.tree {
            format!("{}/{}", self.repo.full_path(), relative)
        } else {
            relative.to_string()
        })
    }

    async fn write_entry(
        &self,
        report: &mut SyncReport,
        path: &str,
        entry: &FileEntry,
        data: &[u8],
        by_hash: bool,
    ) -> Result<()> {
        let mtime = report.release.timestamp();

        let output_path = self
            .output_path(path)
            .ok_or_else(|| MirrorSyncError::Other(format!("{} is outside the component", path)))?;

        let outcome = self.writer.write_file(&output_path, data, mtime).await?;
        report.record(output_path.clone(), outcome);

        if by_hash {
            for hash_path in entry.by_hash_paths(&output_path) {
                let outcome = self.writer.write_file(&hash_path, data, mtime).await?;
                report.record(hash_path, outcome);
            }
        }

        Ok(())
    }

    /// Derive the uncompressed counterpart of a verified compressed file.
    ///
    /// Returns whether the counterpart was produced.
    async fn derive_uncompressed(
        &self,
        report: &mut SyncReport,
        path: &str,
        compression: Compression,
        counterpart: &str,
        counterpart_entry: Option<&FileEntry>,
        data: &[u8],
    ) -> Result<bool> {
        let uncompressed = match decompress(data, compression).await {
            Ok(uncompressed) => uncompressed,
            Err(e) => {
                warn!("{}: unable to decompress: {}", path, e);
                return Ok(false);
            }
        };

        if let Some(entry) = counterpart_entry {
            if let Err(e) = verify_content(entry, &uncompressed) {
                warn!(
                    "{}: decompressed {} does not match its declaration: {}",
                    counterpart, path, e
                );
                return Ok(false);
            }
        }

        let output_path = match self.output_path(counterpart) {
            Some(path) => path,
            None => return Ok(false),
        };

        info!("{}: decompressed from {}", counterpart, path);
        let outcome = self
            .writer
            .write_file(&output_path, &uncompressed, report.release.timestamp())
            .await?;
        report.record(output_path, outcome);
        report.decompressed.push(counterpart.to_string());

        Ok(true)
    }

    async fn write_release_files(&self, report: &mut SyncReport) -> Result<()> {
        let distribution = self.repo.distribution();
        let mtime = report.release.timestamp();

        let files = [
            ("Release", report.release.raw_bytes().to_vec()),
            ("Release.gpg", report.release.signature_bytes().to_vec()),
            ("InRelease", report.release.inline_signature_bytes().to_vec()),
        ];

        for (filename, data) in files {
            if filename != "Release" && data.is_empty() {
                continue;
            }

            let path = format!("{}/{}", distribution, filename);
            let outcome = self.writer.write_file(&path, &data, mtime).await?;
            report.record(path, outcome);
        }

        Ok(())
    }

    /// Perform the sync.
    pub async fn run(&self) -> Result<SyncReport> {
        let release = MirrorRace::new(self.repo.distribution(), self.verification.clone())
            .stagger(self.stagger)
            .timeout(self.timeout)
            .run(&self.mirrors)
            .await?;

        info!(
            "using mirror at {}",
            release.origin_mirror().unwrap_or_default()
        );

        let by_hash = release.acquire_by_hash();
        info!("Acquire-By-Hash is {}", by_hash);

        let base = if self.tree {
            self.writer.root_dir().join(self.repo.full_path())
        } else {
            self.writer.root_dir().to_path_buf()
        };
        async_std::fs::create_dir_all(&base)
            .await
            .map_err(|e| MirrorSyncError::RepositoryIoPath(format!("{}", base.display()), e))?;

        let selected = release
            .iter_files_under(self.repo.component())
            .map(|(path, entry)| (path.to_string(), entry.clone()))
            .collect::<BTreeMap<_, _>>();

        if !selected.keys().any(|path| {
            let filename = path.rsplit('/').next().unwrap_or_default();
            matches!(filename, "Packages" | "Packages.gz")
        }) {
            warn!(
                "no Packages index under {}; make sure the repository path names the \
                directory holding Packages.gz",
                self.repo.full_path()
            );
        }

        let fetcher = ChecksumFetcher::new(
            &self.mirrors,
            release.origin_mirror(),
            self.repo.distribution(),
        )
        .timeout(self.timeout);

        let mut report = SyncReport {
            release: release.clone(),
            written: vec![],
            unchanged: vec![],
            decompressed: vec![],
            failed: vec![],
        };

        let mut succeeded = 0;
        let mut derived = BTreeSet::new();

        // Compressed files first so their counterparts can be derived.
        let (compressed, plain): (Vec<_>, Vec<_>) = selected
            .iter()
            .partition(|(path, _)| Compression::from_path(path).0 != Compression::None);

        for (path, entry) in compressed {
            let (compression, counterpart) = Compression::from_path(path);

            match fetcher.fetch(path, entry).await {
                Ok(content) => {
                    self.write_entry(&mut report, path, entry, &content.data, by_hash)
                        .await?;
                    succeeded += 1;

                    if derived.contains(counterpart) {
                        continue;
                    }

                    let counterpart_entry = selected.get(counterpart);

                    if self
                        .derive_uncompressed(
                            &mut report,
                            path,
                            compression,
                            counterpart,
                            counterpart_entry,
                            &content.data,
                        )
                        .await?
                    {
                        derived.insert(counterpart.to_string());

                        if counterpart_entry.is_some() {
                            succeeded += 1;
                        }
                    }
                }
                Err(failure) => {
                    warn!("{}", failure);
                    report.failed.push(failure);
                }
            }
        }

        for (path, entry) in plain {
            if derived.contains(path.as_str()) {
                continue;
            }

            match fetcher.fetch(path, entry).await {
                Ok(content) => {
                    self.write_entry(&mut report, path, entry, &content.data, by_hash)
                        .await?;
                    succeeded += 1;
                }
                Err(failure) => {
                    warn!("{}", failure);
                    report.failed.push(failure);
                }
            }
        }

        if !selected.is_empty() && succeeded == 0 {
            return Err(MirrorSyncError::AllFetchesFailed(selected.len()));
        }

        if self.tree {
            self.write_release_files(&mut report).await?;
        }

        info!(
            "sync complete: {} written, {} unchanged, {} failed",
            report.written.len(),
            report.unchanged.len(),
            report.failed.len()
        );

        Ok(report)
    }
}
