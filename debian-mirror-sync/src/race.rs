// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Selection of the freshest `Release` file across mirrors.

Every mirror is queried concurrently. Each query fetches and parses the mirror's
`Release` file, then competes for a single shared slot holding the best snapshot
seen so far. A snapshot only replaces the current best if its `Date` is strictly
newer and, unless running insecurely, its detached signature verifies against the
keyring. The slot's lock is held while the signature is fetched and checked so
adoption decisions never interleave.

Queries are launched a short delay apart. Mirrors earlier in the list therefore
tend to be adopted first and win ties.
*/

use {
    crate::{
        error::{MirrorSyncError, Result},
        io::DEFAULT_FETCH_TIMEOUT,
        mirror::Mirror,
        release::ReleaseSnapshot,
        signature::{verify_detached_signature, Keyring},
    },
    log::{info, warn},
    std::{sync::Arc, time::Duration},
    tokio::sync::Mutex,
};

/// Delay between launching consecutive mirror queries.
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(70);

/// How `Release` files are authenticated.
#[derive(Clone)]
pub enum Verification {
    /// Accept any well-formed `Release` file.
    Insecure,

    /// Require a detached signature from a key in this keyring.
    Keyring(Arc<dyn Keyring>),
}

impl std::fmt::Debug for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insecure => f.write_str("Insecure"),
            Self::Keyring(_) => f.write_str("Keyring"),
        }
    }
}

struct RaceContext {
    distribution: String,
    verification: Verification,
    timeout: Duration,
}

impl RaceContext {
    fn path(&self, filename: &str) -> String {
        if self.distribution.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.distribution, filename)
        }
    }
}

/// Finds the freshest authentic `Release` file among a set of mirrors.
#[derive(Debug)]
pub struct MirrorRace {
    distribution: String,
    verification: Verification,
    stagger: Duration,
    timeout: Duration,
}

impl MirrorRace {
    /// Construct an instance probing `<distribution>/Release` on each mirror.
    ///
    /// `distribution` is relative to the mirror root. e.g. `dists/stable`.
    pub fn new(distribution: impl ToString, verification: Verification) -> Self {
        Self {
            distribution: distribution.to_string().trim_matches('/').to_string(),
            verification,
            stagger: DEFAULT_STAGGER,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Set the delay between launching queries.
    #[must_use]
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Set the deadline for each individual fetch.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Query all mirrors and return the winning snapshot.
    ///
    /// Waits for every query to finish. Fails with [MirrorSyncError::NoValidRelease]
    /// if no mirror produced an acceptable `Release` file.
    pub async fn run(&self, mirrors: &[Mirror]) -> Result<ReleaseSnapshot> {
        if mirrors.is_empty() {
            return Err(MirrorSyncError::NoMirrors);
        }

        let context = Arc::new(RaceContext {
            distribution: self.distribution.clone(),
            verification: self.verification.clone(),
            timeout: self.timeout,
        });
        let best = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(mirrors.len());

        for (i, mirror) in mirrors.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.stagger).await;
            }

            handles.push(tokio::spawn(query_mirror(
                context.clone(),
                mirror.clone(),
                best.clone(),
            )));
        }

        for res in futures::future::join_all(handles).await {
            if let Err(e) = res {
                warn!("mirror query did not complete: {}", e);
            }
        }

        let winner = best.lock().await.take();

        winner.ok_or(MirrorSyncError::NoValidRelease)
    }
}

/// Fetch the signature files for a snapshot and verify them.
async fn authenticate(
    context: &RaceContext,
    keyring: &dyn Keyring,
    mirror: &Mirror,
    snapshot: &mut ReleaseSnapshot,
) -> Result<()> {
    let signature_path = context.path("Release.gpg");
    let signature = mirror.fetch(&signature_path, context.timeout).await?;

    let verification = verify_detached_signature(keyring, snapshot.raw_bytes(), &signature)?;
    info!(
        "{}: Release signed by {}{}",
        mirror,
        verification.key_id,
        verification
            .signed_at
            .map(|t| format!(" at {}", t))
            .unwrap_or_default()
    );

    // InRelease is optional and only retained.
    let inline_path = context.path("InRelease");
    let inline = match mirror.fetch(&inline_path, context.timeout).await {
        Ok(data) => data,
        Err(e) => {
            info!("{}: no {}: {}", mirror, inline_path, e);
            vec![]
        }
    };

    snapshot.set_signatures(signature, inline);

    Ok(())
}

async fn query_mirror(
    context: Arc<RaceContext>,
    mirror: Mirror,
    best: Arc<Mutex<Option<ReleaseSnapshot>>>,
) {
    let release_path = context.path("Release");

    let data = match mirror.fetch(&release_path, context.timeout).await {
        Ok(data) => data,
        Err(e) => {
            warn!("{}: failed to fetch {}: {}", mirror, release_path, e);
            return;
        }
    };

    let mut snapshot = match ReleaseSnapshot::parse(data) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("{}: failed to parse {}: {}", mirror, release_path, e);
            return;
        }
    };

    let mut best = best.lock().await;

    if let Some(current) = best.as_ref() {
        if !snapshot.is_newer_than(current) {
            info!(
                "{}: Release ({}) is not newer than {}",
                mirror,
                snapshot.date_str().unwrap_or("undated"),
                current.origin_mirror().unwrap_or_default()
            );
            return;
        }
    }

    if let Verification::Keyring(keyring) = &context.verification {
        if let Err(e) = authenticate(&context, keyring.as_ref(), &mirror, &mut snapshot).await {
            warn!("{}: rejecting {}: {}", mirror, release_path, e);
            return;
        }
    }

    snapshot.set_origin(mirror.prefix(), &release_path);

    if best.is_none() {
        info!(
            "using first: {} ({})",
            mirror,
            snapshot.date_str().unwrap_or("undated")
        );
    } else {
        info!(
            "found newer: {} ({})",
            mirror,
            snapshot.date_str().unwrap_or("undated")
        );
    }

    *best = Some(snapshot);
}

/// Find the freshest authentic `Release` file with default timings.
pub async fn find_latest_release(
    mirrors: &[Mirror],
    distribution: &str,
    verification: Verification,
) -> Result<ReleaseSnapshot> {
    MirrorRace::new(distribution, verification).run(mirrors).await
}
