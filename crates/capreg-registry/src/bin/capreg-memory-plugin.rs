//! Sample external plugin serving an in-memory resource repository over
//! stdio.
//!
//! Logs go to stderr, where the host picks them up. Set `RUST_LOG` to
//! change verbosity.

use std::sync::Arc;

use capreg_plugin::{MemoryRepository, serve_stdio};
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!(pid = std::process::id(), "memory plugin starting");
    serve_stdio(Arc::new(MemoryRepository::new())).await
}
