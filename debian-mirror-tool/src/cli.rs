// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_mirror_sync::{
        config::{SyncConfig, DEFAULT_KEYRING, DEFAULT_MIRROR_LIST, DEFAULT_REPO},
        error::MirrorSyncError,
        sync::{MirrorSync, SyncReport},
    },
    log::LevelFilter,
    std::path::PathBuf,
    thiserror::Error,
};

const MIRRORS_ABOUT: &str = "\
Mirror Lists

The mirror list file names one mirror per line. Blank lines and lines beginning
with `#` are ignored. Order matters: when a file cannot be obtained from the
mirror that served the newest Release file, the remaining mirrors are tried in
list order.

If an entry contains `://`, it will be parsed as a URL. Otherwise it will be
interpreted as a local filesystem path.

The following URL schemes (the part before the `://` in a URL) are recognized:

file://
   A local filesystem path. The path component of the URL is interpreted as
   a filesystem path.

http://
https://
   A HTTP-based URL. Requests are made with a fixed deadline (see --timeout).

Each mirror must serve the repository under the configured repository path.
e.g. with `--repo dists/bookworm/main/binary-amd64`, the mirror
`http://deb.debian.org/debian` must serve
`http://deb.debian.org/debian/dists/bookworm/Release`.
";

const SYNC_ABOUT: &str = "\
Synchronize repository indices from mirrors.

Every mirror is queried for the distribution's Release file. The newest one whose
detached signature (Release.gpg) verifies against the keyring wins. Files it lists
under the repository component are then downloaded, verified against their
checksums, and written to the output directory with file times set to the
Release date.

By default files are written directly into the output directory. With --tree,
the full repository layout is reproduced, including the Release, Release.gpg,
and InRelease files.

Instead of flags, a YAML file can describe the sync via --yaml-config. It accepts
the keys `repo`, `mirrors`, `output`, `insecure`, `tree`, `keyring`,
`timeout-ms`, and `stagger-ms`. Flags given on the command line take precedence.
";

#[derive(Debug, Error)]
pub enum DmtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    MirrorSync(#[from] MirrorSyncError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DmtError>;

fn new_command() -> Command<'static> {
    let app = Command::new("Debian Mirror Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Interface with Debian repository mirrors")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("--verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("sync")
            .about("Synchronize repository indices from mirrors")
            .long_about(SYNC_ABOUT)
            .arg(
                Arg::new("repo")
                    .long("--repo")
                    .takes_value(true)
                    .default_value(DEFAULT_REPO)
                    .help("Repository path to synchronize, relative to each mirror"),
            )
            .arg(
                Arg::new("mirrors")
                    .long("--mirrors")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .default_value(DEFAULT_MIRROR_LIST)
                    .help("File listing mirrors, one per line"),
            )
            .arg(
                Arg::new("output")
                    .long("--output")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .default_value(".")
                    .help("Directory to write files to"),
            )
            .arg(
                Arg::new("insecure")
                    .long("--insecure")
                    .help("Do not verify Release file signatures"),
            )
            .arg(
                Arg::new("tree")
                    .long("--tree")
                    .help("Write the full repository tree, including Release files"),
            )
            .arg(
                Arg::new("keyring")
                    .long("--keyring")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .default_value(DEFAULT_KEYRING)
                    .help("Key file or directory of .gpg/.asc key files trusted to sign Release files"),
            )
            .arg(
                Arg::new("timeout")
                    .long("--timeout")
                    .takes_value(true)
                    .help("Deadline for each fetch, in milliseconds"),
            )
            .arg(
                Arg::new("stagger")
                    .long("--stagger")
                    .takes_value(true)
                    .help("Delay between starting mirror queries, in milliseconds"),
            )
            .arg(
                Arg::new("yaml-config")
                    .long("--yaml-config")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Path to a YAML file defining the sync configuration"),
            ),
    );

    app.subcommand(Command::new("mirrors").about("Print documentation about mirror lists"))
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    // HTTP client internals are noisy at the default level.
    if log_level == LevelFilter::Info {
        builder
            .filter_module("rustls", LevelFilter::Error)
            .filter_module("reqwest", LevelFilter::Warn)
            .filter_module("hyper", LevelFilter::Warn);
    }

    builder.init();
}

pub async fn run_cli() -> Result<()> {
    let mut app = new_command();

    let matches = app.clone().get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("sync", args)) => command_sync(args).await,
        Some(("mirrors", _)) => {
            println!("{}", MIRRORS_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(DmtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Resolve the sync configuration from arguments.
///
/// A YAML config provides the base. Arguments explicitly given override it.
fn sync_config_from_args(args: &ArgMatches) -> Result<SyncConfig> {
    let mut config = if let Some(path) = args.value_of_os("yaml-config") {
        let f = std::fs::File::open(path)?;
        serde_yaml::from_reader(f)?
    } else {
        SyncConfig::default()
    };

    let explicit = |name: &str| args.occurrences_of(name) > 0;
    let has_yaml = args.is_present("yaml-config");

    if explicit("repo") || !has_yaml {
        if let Some(value) = args.value_of("repo") {
            config.repo = value.to_string();
        }
    }
    for (name, field) in [
        ("mirrors", &mut config.mirrors),
        ("output", &mut config.output),
        ("keyring", &mut config.keyring),
    ] {
        if explicit(name) || !has_yaml {
            if let Some(value) = args.value_of_os(name) {
                *field = PathBuf::from(value);
            }
        }
    }

    if args.is_present("insecure") {
        config.insecure = true;
    }
    if args.is_present("tree") {
        config.tree = true;
    }
    if args.is_present("timeout") {
        config.timeout_ms = args.value_of_t::<u64>("timeout")?;
    }
    if args.is_present("stagger") {
        config.stagger_ms = args.value_of_t::<u64>("stagger")?;
    }

    Ok(config)
}

fn print_report(report: &SyncReport) {
    println!(
        "synchronized from {} (Date: {})",
        report.release.origin_mirror().unwrap_or("<unknown>"),
        report.release.date_str().unwrap_or("<none>")
    );
    println!(
        "{} files written; {} unchanged; {} decompressed locally",
        report.written.len(),
        report.unchanged.len(),
        report.decompressed.len()
    );

    for failure in &report.failed {
        println!("failed: {}", failure);
        for (mirror, err) in &failure.attempts {
            println!("  {}: {}", mirror, err);
        }
    }
}

async fn command_sync(args: &ArgMatches) -> Result<()> {
    let config = sync_config_from_args(args)?;

    let report = MirrorSync::from_config(&config)?.run().await?;

    print_report(&report);

    Ok(())
}

#[cfg(test)]
mod test {
    use {super::*, std::io::Write};

    fn sync_args(args: &[&str]) -> Result<SyncConfig> {
        let matches = new_command().try_get_matches_from(
            ["dmt", "sync"].iter().chain(args.iter()).copied(),
        )?;

        match matches.subcommand() {
            Some(("sync", args)) => sync_config_from_args(args),
            _ => Err(DmtError::InvalidSubCommand("sync".into())),
        }
    }

    #[test]
    fn defaults() -> Result<()> {
        assert_eq!(sync_args(&[])?, SyncConfig::default());

        Ok(())
    }

    #[test]
    fn flags() -> Result<()> {
        let config = sync_args(&[
            "--repo",
            "dists/bookworm/main/binary-arm64",
            "--mirrors",
            "mirrors.txt",
            "--output",
            "out",
            "--insecure",
            "--tree",
            "--timeout",
            "2500",
            "--stagger",
            "10",
        ])?;

        assert_eq!(config.repo, "dists/bookworm/main/binary-arm64");
        assert_eq!(config.mirrors, PathBuf::from("mirrors.txt"));
        assert_eq!(config.output, PathBuf::from("out"));
        assert_eq!(config.keyring, PathBuf::from(DEFAULT_KEYRING));
        assert!(config.insecure);
        assert!(config.tree);
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.stagger_ms, 10);

        assert!(matches!(
            sync_args(&["--timeout", "soon"]),
            Err(DmtError::Clap(_))
        ));

        Ok(())
    }

    #[test]
    fn yaml_config() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        f.write_all(b"repo: dists/bullseye/contrib/binary-i386\ntree: true\ntimeout-ms: 100\n")?;
        f.flush()?;
        let path = f.path().to_string_lossy().to_string();

        let config = sync_args(&["--yaml-config", &path])?;
        assert_eq!(config.repo, "dists/bullseye/contrib/binary-i386");
        assert!(config.tree);
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.mirrors, PathBuf::from(DEFAULT_MIRROR_LIST));

        let config = sync_args(&["--yaml-config", &path, "--repo", "dists/sid/main"])?;
        assert_eq!(config.repo, "dists/sid/main");
        assert!(config.tree);

        let mut bad = tempfile::NamedTempFile::new()?;
        bad.write_all(b"mirror-list: foo\n")?;
        bad.flush()?;
        let bad_path = bad.path().to_string_lossy().to_string();
        assert!(matches!(
            sync_args(&["--yaml-config", &bad_path]),
            Err(DmtError::SerdeYaml(_))
        ));

        Ok(())
    }
}
