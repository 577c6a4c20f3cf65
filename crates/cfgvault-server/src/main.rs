//! cfgvault daemon
//!
//! ```bash
//! # in-memory records, random signing key
//! cfgvault --cache-dir /tmp/cfgvault/cache --local-file-dir /tmp/cfgvault/local
//!
//! # MongoDB-backed, stable key rotated daily
//! MONGODB_URI=mongodb://localhost:27017 DOWNLOAD_SECURE_KEY=... \
//!     cfgvault --key-rotation-secs 86400
//! ```

use anyhow::Context;
use cfgvault_artifact::Fingerprint;
use cfgvault_cache::{CacheStore, LocalFileStore, ProvenanceIndex};
use cfgvault_core::{DistributionCoordinator, DocumentRepository, InMemoryRepository};
use cfgvault_server::{router, telemetry, AppState, Args, VERSION};
use cfgvault_token::{spawn_rotation, SigningKey, TokenService};
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_level, args.log_format);
    info!(version = VERSION, "cfgvault starting");

    let config = args.distribution_config();
    config.validate().context("invalid configuration")?;

    let repository = connect_repository(&args).await?;

    let cache = CacheStore::open(&args.cache_dir, config.cache_capacity())
        .await
        .with_context(|| format!("opening cache at {}", args.cache_dir.display()))?
        .with_eviction_listener(Arc::new(|fingerprint: Fingerprint| {
            debug!(fingerprint = %fingerprint.short(), "artifact evicted");
        }));
    let provenance = ProvenanceIndex::open(&args.cache_dir)
        .await
        .context("opening provenance index")?;
    let files = LocalFileStore::open(&args.local_file_dir)
        .await
        .with_context(|| format!("opening file store at {}", args.local_file_dir.display()))?;

    let key = match &args.download_secret {
        Some(secret) => SigningKey::from_secret(secret.as_bytes()),
        None => {
            warn!("DOWNLOAD_SECURE_KEY not set; using a random key, tokens will not survive a restart");
            SigningKey::generate()
        }
    };
    let tokens = Arc::new(TokenService::new(key).with_max_ttl(config.max_token_ttl()));
    let rotation = config.key_rotation().map(|period| {
        info!(period_secs = period.as_secs(), "signing key rotation enabled");
        spawn_rotation(tokens.clone(), period)
    });

    let coordinator = Arc::new(DistributionCoordinator::new(
        config,
        repository,
        Arc::new(cache),
        Arc::new(provenance),
        tokens,
    ));
    let app = router(AppState::new(coordinator.clone(), Arc::new(files)));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %args.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = rotation {
        handle.abort();
    }
    let stats = coordinator.cache_stats();
    info!(
        entries = stats.entry_count,
        bytes = stats.total_bytes,
        "cfgvault stopped"
    );
    Ok(())
}

async fn connect_repository(args: &Args) -> anyhow::Result<Arc<dyn DocumentRepository>> {
    match &args.mongodb_uri {
        #[cfg(feature = "mongo")]
        Some(uri) => {
            let repository = cfgvault_core::MongoRepository::connect(uri, &args.mongodb_database)
                .await
                .context("connecting to MongoDB")?;
            Ok(Arc::new(repository))
        }
        #[cfg(not(feature = "mongo"))]
        Some(_) => anyhow::bail!("MONGODB_URI is set but this build has no MongoDB support"),
        None => {
            warn!("MONGODB_URI not set; records are kept in memory");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
