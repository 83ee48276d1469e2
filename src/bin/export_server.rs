//! catalog-export HTTP server

use catalog_export::api::{AppState, start_api_server};
use catalog_export::auth::{
    AnonymousProvider, IdentityProvider, SessionTokenProbe, WebauthnSessionProvider,
};
use catalog_export::{AuthMode, CatalogDownloader, Config, ExportService};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "catalog-export-server", version, about = "Serve catalog export jobs over HTTP")]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, env = "CATALOG_EXPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the configured storage path
    #[arg(long)]
    storage_path: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

fn load_config(args: &Args) -> catalog_export::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.api.bind_address = bind;
    }
    if let Some(storage_path) = &args.storage_path {
        config.storage_path = storage_path.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = Arc::new(load_config(&args)?);
    tracing::info!(
        storage = %config.storage_path.display(),
        auth = ?config.auth.mode,
        "loaded configuration"
    );

    let provider: Arc<dyn IdentityProvider> = match config.auth.mode {
        AuthMode::None => Arc::new(AnonymousProvider),
        AuthMode::Webauthn => Arc::new(WebauthnSessionProvider::new(&config.auth)?),
    };
    let probe = SessionTokenProbe::new(&config.auth.cookie_name, config.auth.request_timeout)?;
    let downloader = CatalogDownloader::new(&config.auth.cookie_name)?;

    let service = ExportService::new(config.clone(), Arc::new(downloader), Arc::new(probe));
    let state = AppState::new(service, config, provider);

    start_api_server(state, catalog_export::wait_for_signal()).await?;
    Ok(())
}
