use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use durable_streams_core::store::memory::MemoryStore;
use durable_streams_core::{CursorConfig, CursorPolicy, Pipeline, ServerOptions};
use tracing::info;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Durable Streams server", long_about = None)]
struct Opts {
    /// Path to the durable-streams.toml config file.
    #[arg(long = "config", short = 'c', default_value = "./durable-streams.toml")]
    config_path: PathBuf,

    /// Bind host, overrides the config file.
    #[arg(long, env = "DURABLE_STREAMS_HOST")]
    host: Option<String>,

    /// Bind port, overrides the config file.
    #[arg(long, env = "DURABLE_STREAMS_PORT")]
    port: Option<u16>,

    /// Directory for the file-backed store. Requires the `file-storage`
    /// feature; absence keeps streams in memory only.
    #[arg(long, env = "DURABLE_STREAMS_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();

    load_env_file(&opts.config_path);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::load_or_default(&opts.config_path);

    let host = opts.host.or(config.host).unwrap_or_else(|| "127.0.0.1".to_string());
    let port = opts.port.or(config.port).unwrap_or(4437);
    let data_dir = opts.data_dir.or(config.data_dir);

    let options = ServerOptions {
        long_poll_timeout: Duration::from_secs(config.long_poll_timeout_secs.unwrap_or(25)),
        sse_lifetime: Duration::from_secs(config.sse_lifetime_secs.unwrap_or(60)),
        store: durable_streams_core::StoreOptions {
            max_chunk_bytes: config.max_chunk_bytes.unwrap_or(1 << 20),
            max_chunk_entries: config.max_chunk_entries.unwrap_or(1000),
        },
    };

    let cursor_config = CursorConfig {
        interval_seconds: config.cursor_interval_seconds.unwrap_or(20),
        max_jitter_seconds: config.cursor_max_jitter_seconds.unwrap_or(3600),
        ..CursorConfig::default()
    };
    let cursor_policy = Arc::new(CursorPolicy::new(cursor_config));

    let addr = format!("{host}:{port}");

    if let Err(e) = run(addr, data_dir, cursor_policy, options).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(feature = "file-storage")]
async fn run(
    addr: String,
    data_dir: Option<PathBuf>,
    cursor_policy: Arc<CursorPolicy>,
    options: ServerOptions,
) -> Result<(), String> {
    if let Some(dir) = data_dir {
        let store = durable_streams_core::store::FileStore::open(dir, options.store)
            .map_err(|e| format!("failed to open file store: {e}"))?;
        let pipeline = Pipeline::new(Arc::new(store), cursor_policy, options);
        return serve(addr, pipeline).await;
    }
    let pipeline = Pipeline::new(Arc::new(MemoryStore::default()), cursor_policy, options);
    serve(addr, pipeline).await
}

#[cfg(not(feature = "file-storage"))]
async fn run(
    addr: String,
    data_dir: Option<PathBuf>,
    cursor_policy: Arc<CursorPolicy>,
    options: ServerOptions,
) -> Result<(), String> {
    if data_dir.is_some() {
        return Err("--data-dir requires the file-storage feature".to_string());
    }
    let pipeline = Pipeline::new(Arc::new(MemoryStore::default()), cursor_policy, options);
    serve(addr, pipeline).await
}

async fn serve<S: durable_streams_core::Store>(
    addr: String,
    pipeline: Pipeline<S>,
) -> Result<(), String> {
    let router = durable_streams_http::create_router(Arc::new(pipeline));

    info!("Starting durable streams server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    axum::serve(listener, router)
        .await
        .map_err(|e| format!("server error: {e}"))
}

/// Load environment variables from a `.env` file next to the config file,
/// matching `crates/cli/src/main.rs`'s `load_env_file`.
fn load_env_file(config_path: &Path) {
    let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let env_file = dir.join(".env");

    match dotenvy::from_path(&env_file) {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => {
            eprintln!("Warning: failed to load .env file at {}: {e}", env_file.display());
        }
    }
}
