use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use content::{ContentRef, Digest, Snapshot};
use eyre::{eyre, WrapErr};
use mirror::{Mirror, MirrorConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, default_value = "mirror.toml")]
    config: Utf8PathBuf,

    /// Repository to work on (overrides config file)
    #[arg(short, long)]
    repository: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synchronize from the configured remote
    Sync,

    /// Add content, and everything it references
    Add {
        /// Repository to take tags from (defaults to the target)
        #[arg(long)]
        from: Option<String>,

        #[command(flatten)]
        units: Units,
    },

    /// Remove content, and whatever only it referenced
    Remove {
        #[command(flatten)]
        units: Units,
    },

    /// Point a tag at a manifest
    Tag {
        /// Tag name
        name: String,

        /// Manifest digest
        manifest: Digest,
    },

    /// Remove a tag
    Untag {
        /// Tag name
        name: String,
    },

    /// Show the content of a repository version
    Show {
        /// Version number (defaults to the latest)
        #[arg(long)]
        version: Option<u64>,
    },
}

#[derive(Debug, clap::Args)]
struct Units {
    /// Tags, by name
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Manifests or manifest lists, by digest
    #[arg(long = "manifest")]
    manifests: Vec<Digest>,

    /// Blobs, by digest
    #[arg(long = "blob")]
    blobs: Vec<Digest>,
}

impl Units {
    fn resolve(self, mirror: &Mirror, repository: &str) -> eyre::Result<Vec<ContentRef>> {
        let mut units = Vec::new();
        if !self.tags.is_empty() {
            let latest = mirror.repositories().latest(repository)?;
            for name in self.tags {
                let tag = latest
                    .content()
                    .tag(&name)
                    .ok_or_else(|| eyre!("no tag {name:?} in {repository}"))?;
                units.push(ContentRef::Tag(tag.clone()));
            }
        }
        units.extend(self.manifests.into_iter().map(ContentRef::Manifest));
        units.extend(self.blobs.into_iter().map(ContentRef::Blob));
        Ok(units)
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = MirrorConfig::load(&args.config)?;
    let repository = args.repository.unwrap_or_else(|| config.repository.clone());

    let (store, repositories) = Snapshot::load(config.state.as_std_path())
        .wrap_err_with(|| format!("loading state from {}", config.state))?;
    let mirror = Mirror::new(
        Arc::new(store),
        Arc::new(repositories),
        config.artifacts.clone().build(),
    );
    mirror.repositories().ensure(&repository);

    let output = match args.command {
        Command::Sync => {
            let report = mirror
                .synchronize(config.remote.client(), &config.remote.options, &repository)
                .await?;
            serde_json::to_string_pretty(&report)?
        }
        Command::Add { from, units } => {
            let source = from.as_deref().unwrap_or(&repository);
            let units = units.resolve(&mirror, source)?;
            serde_json::to_string_pretty(&mirror.recursive_add(&repository, &units)?)?
        }
        Command::Remove { units } => {
            let units = units.resolve(&mirror, &repository)?;
            serde_json::to_string_pretty(&mirror.recursive_remove(&repository, &units)?)?
        }
        Command::Tag { name, manifest } => {
            serde_json::to_string_pretty(&mirror.tag_image(&repository, &name, &manifest)?)?
        }
        Command::Untag { name } => {
            serde_json::to_string_pretty(&mirror.untag_image(&repository, &name)?)?
        }
        Command::Show { version } => {
            let version = match version {
                Some(number) => mirror.repositories().version(&repository, number)?,
                None => mirror.repositories().latest(&repository)?,
            };
            serde_json::to_string_pretty(&*version)?
        }
    };

    Snapshot::save(
        config.state.as_std_path(),
        mirror.store(),
        mirror.repositories(),
    )
    .wrap_err_with(|| format!("saving state to {}", config.state))?;

    println!("{output}");
    Ok(())
}
