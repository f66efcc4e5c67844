//! s3remote -- browse and modify S3 buckets as a remote filesystem.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use s3remote::config::{Config, LoggingConfig};
use s3remote::registry::{split_remote, Registry};
use s3remote::remote::{ListStatus, RemoteFs, RemoteObject};
use s3remote::storage::backend::ObjectReader;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "s3remote",
    version,
    about = "S3-compatible object store as a remote filesystem"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "s3remote.yaml")]
    config: String,

    /// Print Prometheus counters on exit.
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered backends and their options.
    Backends,
    /// List objects under remote:path with their sizes.
    Ls { remote: String },
    /// List directories (or buckets) under remote:path.
    Lsd { remote: String },
    /// Write an object to stdout.
    Cat { remote: String },
    /// Upload a local file to remote:path/name.
    Put { local: String, remote: String },
    /// Show size, checksum and modification time of an object.
    Stat { remote: String },
    /// Set the modification time of an object (default now).
    Touch {
        remote: String,
        /// RFC 3339 timestamp.
        #[arg(long)]
        time: Option<String>,
    },
    /// Server-side copy of an object.
    Copyto { src: String, dst: String },
    /// Delete an object.
    Delete { remote: String },
    /// Create the bucket.
    Mkdir { remote: String },
    /// Remove the bucket if it is empty.
    Rmdir { remote: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let registry = Registry::with_builtin();

    if let Command::Backends = cli.command {
        init_tracing(&LoggingConfig::default());
        print_backends(&registry);
        return Ok(());
    }

    let config = s3remote::config::load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    if cli.stats && s3remote::metrics::init_metrics().is_none() {
        warn!("Couldn't install the Prometheus recorder");
    }

    let result = run(&registry, &config, cli.command).await;

    if cli.stats {
        if let Some(text) = s3remote::metrics::render() {
            eprint!("{text}");
        }
    }
    result
}

/// Install the tracing subscriber. `RUST_LOG` wins over the config file.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(registry: &Registry, config: &Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Backends => print_backends(registry),
        Command::Ls { remote } => {
            let fs = registry.new_fs(config, &remote).await?;
            let mut listing = fs.list();
            while let Some(object) = listing.next().await {
                println!("{:>9} {}", object.size(), object.remote());
            }
            check_status(listing.status())?;
        }
        Command::Lsd { remote } => {
            let fs = registry.new_fs(config, &remote).await?;
            let mut listing = fs.list_dir();
            while let Some(dir) = listing.next().await {
                let when = dir
                    .when
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:>12} {:>19} {:>9} {}", dir.bytes, when, dir.count, dir.name);
            }
            check_status(listing.status())?;
        }
        Command::Cat { remote } => {
            let (_, object) = open_object(registry, config, &remote).await?;
            let mut reader = object.open().await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }
        Command::Put { local, remote } => {
            let (fs, leaf) = open_parent(registry, config, &remote).await?;
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("opening {local}"))?;
            let meta = file.metadata().await?;
            let mod_time: DateTime<Utc> = meta.modified()?.into();
            let input: ObjectReader = Box::pin(file);
            let object = fs.put(input, &leaf, mod_time, meta.len() as i64).await?;
            info!("Uploaded {} ({} bytes) to {}", local, object.size(), fs);
        }
        Command::Stat { remote } => {
            let (_, mut object) = open_object(registry, config, &remote).await?;
            let md5 = object.md5sum();
            println!("path:     {}", object.remote());
            println!("size:     {}", object.size());
            println!("md5:      {}", if md5.is_empty() { "-" } else { md5.as_str() });
            println!("modified: {}", object.mod_time().await.to_rfc3339());
        }
        Command::Touch { remote, time } => {
            let mod_time = match time {
                Some(text) => DateTime::parse_from_rfc3339(&text)
                    .with_context(|| format!("parsing --time {text:?}"))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let (_, mut object) = open_object(registry, config, &remote).await?;
            object.set_mod_time(mod_time).await;
        }
        Command::Copyto { src, dst } => {
            let (_, source) = open_object(registry, config, &src).await?;
            let (fs, leaf) = open_parent(registry, config, &dst).await?;
            let copier = fs
                .as_copier()
                .ok_or_else(|| anyhow!("{fs} can't copy server-side"))?;
            let copied = copier.copy(&*source, &leaf).await?;
            info!("Copied {} to {}", source, copied);
        }
        Command::Delete { remote } => {
            let (_, object) = open_object(registry, config, &remote).await?;
            object.remove().await?;
        }
        Command::Mkdir { remote } => {
            registry.new_fs(config, &remote).await?.mkdir().await?;
        }
        Command::Rmdir { remote } => {
            registry.new_fs(config, &remote).await?.rmdir().await?;
        }
    }
    Ok(())
}

fn print_backends(registry: &Registry) {
    for info in registry.backends() {
        println!("{}: {}", info.name, info.description);
        for option in &info.options {
            println!("  {}: {}", option.name, option.help);
            for example in &option.examples {
                println!("    {:?}: {}", example.value, example.help);
            }
        }
    }
}

fn check_status(status: Option<&ListStatus>) -> anyhow::Result<()> {
    match status {
        Some(ListStatus::Complete) => Ok(()),
        Some(ListStatus::Truncated {
            error,
            resume_marker,
        }) => match resume_marker {
            Some(marker) => bail!("listing truncated after {marker:?}: {error}"),
            None => bail!("listing truncated: {error}"),
        },
        Some(ListStatus::Cancelled) | None => bail!("listing cancelled"),
    }
}

/// Open the directory holding `remote:path/name`, returning it and `name`.
async fn open_parent(
    registry: &Registry,
    config: &Config,
    location: &str,
) -> anyhow::Result<(Arc<dyn RemoteFs>, String)> {
    let (name, path) = split_remote(location)?;
    let (dir, leaf) = path
        .trim_end_matches('/')
        .rsplit_once('/')
        .ok_or_else(|| anyhow!("{location:?} does not name an object inside a bucket"))?;
    let fs = registry.new_fs(config, &format!("{name}:{dir}")).await?;
    Ok((fs, leaf.to_string()))
}

async fn open_object(
    registry: &Registry,
    config: &Config,
    location: &str,
) -> anyhow::Result<(Arc<dyn RemoteFs>, Box<dyn RemoteObject>)> {
    let (fs, leaf) = open_parent(registry, config, location).await?;
    let object = fs.new_object(&leaf).await?;
    Ok((fs, object))
}
