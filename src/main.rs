//! SHARP Studio - main entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sharp_studio::{
    config::{CliOverrides, Config, SettingsFile, load_output_root},
    desktop::{Desktop, SystemDesktop, open_browser},
    engine::{EngineCache, PredictorBridge},
    orchestrator::{OutputRootRegistry, RunOrchestrator, StudioApi, StudioState},
};

#[derive(Parser, Debug)]
#[command(name = "sharp-studio")]
#[command(about = "Local web studio for turning photos into 3D Gaussian splats")]
#[command(version)]
struct Args {
    /// Address to bind (default 127.0.0.1, or SHARP_GUI_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (default 7860, or SHARP_GUI_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Folder runs are written into (or SHARP_GUI_OUTPUT_ROOT)
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Do not open a browser once the server is up
    #[arg(long)]
    no_browser: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    let default_filter = if args.verbose {
        "sharp_studio=debug,tower_http=debug"
    } else {
        "sharp_studio=info,tower_http=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::resolve(CliOverrides {
        host: args.host,
        port: args.port,
        output_path: args.output_path,
        no_browser: args.no_browser,
    })?;

    let settings = Arc::new(SettingsFile::default_location());
    let output_root = {
        let settings = Arc::clone(&settings);
        let explicit = config.output_root.clone();
        tokio::task::spawn_blocking(move || load_output_root(explicit.as_deref(), &settings))
            .await??
    };
    tracing::info!("Output root: {}", output_root.display());

    let backend = Arc::new(PredictorBridge::new(&config.predictor));
    let codec = Arc::new(backend.codec());
    let engines = Arc::new(EngineCache::new(backend));
    let roots = Arc::new(OutputRootRegistry::new(output_root));
    let desktop: Arc<dyn Desktop> = Arc::new(SystemDesktop);

    let state = StudioState {
        orchestrator: Arc::new(RunOrchestrator::new(engines, codec, roots)),
        settings,
        desktop: Arc::clone(&desktop),
        ui_dir: config.ui_dir.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;

    if config.open_browser {
        let url = config.browser_url();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tokio::task::spawn_blocking(move || open_browser(desktop.as_ref(), &url)).await;
        });
    }

    StudioApi::start(state, listener, config.max_upload_bytes)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
