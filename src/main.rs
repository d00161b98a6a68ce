use std::sync::Arc;

use clap::Parser;
use smart_bookmarks::auth::GoTrueAuth;
use smart_bookmarks::cli;
use smart_bookmarks::config::{Cli, Command, Config, default_config_dir, default_config_path};
use smart_bookmarks::db::Database;
use smart_bookmarks::feed::ChangeFeed;
use smart_bookmarks::handler::{AppState, app};
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // With --config, data (the database) lives next to the config file;
    // otherwise both live in ~/.smart-bookmarks/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let feed = ChangeFeed::new(cfg.app.feed_capacity);
    let db = Arc::new(Database::new(&cfg, &data_dir, feed.clone()).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, db, feed).await,
        command => {
            if let Err(e) = cli::run(command, &db).await {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
}

async fn serve(cfg: Config, db: Arc<Database>, feed: ChangeFeed) {
    tracing::info!("smart-bookmarks.svc starting");

    let auth = Arc::new(GoTrueAuth::new(&cfg.auth).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup auth client");
        std::process::exit(1);
    }));

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    if db.replicated() {
        let sync_db = db.clone();
        let sync_token = cancellation_token.clone();
        let sync_done = shutdown_complete_tx.clone();
        let interval_secs = cfg.app.sync_interval_seconds;
        tokio::spawn(async move {
            let _done = sync_done;
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sync_db.sync().await {
                            tracing::warn!("failed to sync replica: {}", e);
                        }
                    }
                    _ = sync_token.cancelled() => {
                        tracing::info!("replica sync task shutting down");
                        break;
                    }
                }
            }
        });
    }

    let state = AppState::new(db, auth, feed, &cfg.app.public_url);
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("smart-bookmarks.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server exited with error");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    drop(shutdown_complete_tx);
    shutdown_complete_rx.recv().await;
    tracing::info!("smart-bookmarks.svc going off, graceful shutdown complete");
}
