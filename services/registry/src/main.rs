use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use content::Snapshot;
use eyre::WrapErr;
use jose::KeyPair;
use registry::{RegistryBuilder, RegistryConfig, TokenService};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, default_value = "registry.toml")]
    config: Utf8PathBuf,

    /// Address to listen on (overrides config file)
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = RegistryConfig::load(&args.config)?;
    let listen = args.listen.unwrap_or(config.server.listen);

    let (store, repositories) = Snapshot::load(config.state.as_std_path())
        .wrap_err_with(|| format!("loading state from {}", config.state))?;

    let tokens = config
        .token
        .as_ref()
        .map(TokenService::from_config)
        .transpose()
        .wrap_err("loading token key")?;

    let signing_key = match (&config.signing_key, &tokens) {
        (Some(path), _) => KeyPair::from_pem_file(path)
            .wrap_err_with(|| format!("loading signing key from {path}"))?,
        (None, Some(tokens)) => tokens.key().clone(),
        (None, None) => {
            tracing::warn!("no signing key configured, converted manifests use a fresh key");
            KeyPair::generate()?
        }
    };

    let mut builder = RegistryBuilder::new(signing_key)
        .content(Arc::new(store), Arc::new(repositories))
        .artifacts(config.artifacts.clone().build())
        .distributions(config.distributions.clone());
    match tokens {
        Some(tokens) => builder = builder.token_service(tokens),
        None => tracing::warn!("no token service configured, registry is open"),
    }
    let app = builder.build();

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Registry listening on http://{}", listen);
    for distribution in &config.distributions {
        tracing::info!(
            name = %distribution.base_path,
            repository = %distribution.repository,
            version = ?distribution.version,
            "serving"
        );
    }

    axum::serve(listener, app).await?;
    Ok(())
}
