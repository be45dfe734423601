//! siltdb server binary.
//!
//! Opens (or creates) a database directory and serves the HTTP/JSON API.

mod auth;
mod error;
mod events;
mod routes;
mod state;

use clap::Parser;
use siltdb_core::Database;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_DATA_DIR: &str = "siltdb_data";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8989";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding database files.
    #[arg(short, long, env = "SILTDB_DATA_DIR", value_name = "DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Database name (a subdirectory of the data directory).
    #[arg(short = 'n', long, env = "SILTDB_NAME", default_value = "default")]
    db_name: String,

    /// Address to listen on.
    #[arg(short, long, env = "SILTDB_LISTEN_ADDR", value_name = "HOST:PORT", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: String,

    /// API key required on every route except the health check.
    #[arg(long, env = "SILTDB_API_KEY")]
    api_key: Option<String>,

    /// Log filter when RUST_LOG is not set.
    #[arg(long, env = "SILTDB_LOG", default_value = "siltdb_server=info,siltdb_core=info,tower_http=warn")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = args.data_dir.join(&args.db_name);
    info!(path = %db_path.display(), "opening database");

    let db = match Database::open(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("failed to open database at {}: {e}", db_path.display());
            std::process::exit(1);
        }
    };

    let state = AppState::new(Arc::clone(&db), args.api_key.clone());
    if state.api_key.is_some() {
        info!("API key enforcement enabled");
    }

    let app = routes::router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    tower_http::trace::DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                ),
        )
        .layer(CorsLayer::permissive());

    let listener = match TcpListener::bind(&args.listen_addr).await {
        Ok(listener) => {
            info!("listening on {}", args.listen_addr);
            listener
        }
        Err(e) => {
            error!("failed to bind {}: {e}", args.listen_addr);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    // Checkpoint on the way out so restart skips log replay.
    if let Err(e) = db.close() {
        error!("error closing database: {e}");
    }
}
