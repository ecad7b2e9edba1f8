use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::path::Path;
use std::time::Duration;

use payline::config::Config;
use payline::db::{backup, create_pool, create_read_pool, init_db, queries, AppState};
use payline::handlers;
use payline::payments::RazorpayClient;
use payline::reconcile;

#[derive(Parser, Debug)]
#[command(name = "payline")]
#[command(about = "Webhook-driven payment reconciliation service for Razorpay")]
struct Cli {
    /// Create a verified backup of the store and exit.
    #[arg(long)]
    backup: bool,

    /// Label for the backup file name (manual/hourly/daily/auto).
    #[arg(long, default_value = "manual", requires = "backup")]
    backup_label: String,

    /// Restore the store from a backup file and exit.
    #[arg(long, value_name = "FILE")]
    restore: Option<String>,

    /// List available backups and exit.
    #[arg(long)]
    list_backups: bool,

    /// Remove backups past the retention window and exit.
    #[arg(long)]
    cleanup_backups: bool,
}

/// Spawns the background maintenance task: re-attempts pending webhook
/// events and prunes processed events past the redelivery retention window.
fn spawn_maintenance_task(state: AppState, webhook_retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60); // 5 minutes

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(mut conn) => {
                    match reconcile::retry_pending_events(&mut conn, 100) {
                        Ok(count) if count > 0 => {
                            tracing::info!("maintenance: {} pending event(s) applied", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("maintenance: pending event retry failed: {}", e);
                        }
                    }

                    match queries::prune_webhook_events(&conn, webhook_retention_days) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("maintenance: pruned {} old webhook event(s)", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("maintenance: webhook event pruning failed: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("maintenance: failed to get db connection: {}", e);
                }
            }
        }
    });

    tracing::info!("background maintenance task started (runs every 5 minutes)");
}

/// Handle the backup CLI verbs. Returns true when a verb ran and the
/// process should exit without starting the server.
fn run_backup_commands(cli: &Cli, config: &Config) -> bool {
    if cli.backup {
        match backup::create_backup(&config.database_path, &config.backup_dir, &cli.backup_label) {
            Ok(path) => {
                println!("Backup created: {}", path.display());
            }
            Err(e) => {
                eprintln!("Backup failed: {}", e);
                std::process::exit(1);
            }
        }
        return true;
    }

    if let Some(ref file) = cli.restore {
        match backup::restore_backup(Path::new(file), &config.database_path) {
            Ok(report) => {
                println!("Store restored from: {}", file);
                for (table, count) in report.row_counts {
                    println!("  {}: {} rows", table, count);
                }
            }
            Err(e) => {
                eprintln!("Restore failed: {}", e);
                std::process::exit(1);
            }
        }
        return true;
    }

    if cli.list_backups {
        match backup::list_backups(&config.backup_dir) {
            Ok(backups) if backups.is_empty() => println!("No backups found"),
            Ok(backups) => {
                println!("Available backups ({} total):", backups.len());
                for info in backups {
                    println!(
                        "  {} ({:.2} MB, {})",
                        info.name,
                        info.size_bytes as f64 / (1024.0 * 1024.0),
                        info.modified.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
            Err(e) => {
                eprintln!("Failed to list backups: {}", e);
                std::process::exit(1);
            }
        }
        return true;
    }

    if cli.cleanup_backups {
        match backup::cleanup_old_backups(&config.backup_dir, config.backup_retention_days) {
            Ok(0) => println!("No old backups to remove"),
            Ok(removed) => println!("Removed {} old backup(s)", removed),
            Err(e) => {
                eprintln!("Cleanup failed: {}", e);
                std::process::exit(1);
            }
        }
        return true;
    }

    false
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    // Backup CLI verbs run without starting the server
    if run_backup_commands(&cli, &config) {
        return;
    }

    // Create database pools and initialize the schema. The read pool is
    // opened after the schema exists (read-only connections cannot create
    // the file).
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    let read_pool =
        create_read_pool(&config.database_path).expect("Failed to create read-only pool");

    let gateway = RazorpayClient::new(
        &config.razorpay_key_id,
        &config.razorpay_key_secret,
        &config.razorpay_webhook_secret,
    );
    if gateway.live_mode() {
        tracing::info!("Razorpay client in LIVE mode");
    }

    let state = AppState {
        db: db_pool,
        read: read_pool,
        gateway,
        http_client: reqwest::Client::new(),
        notify_webhook_url: config.notify_webhook_url.clone(),
        base_url: config.base_url.clone(),
    };

    // Start the background maintenance task
    spawn_maintenance_task(state.clone(), config.webhook_retention_days);

    // Build the application router
    let app = Router::new()
        .merge(handlers::health_router())
        // Webhook endpoint (gateway signature auth)
        .merge(handlers::webhooks::router())
        // Order API (purchase intents + internal lifecycle hooks)
        .merge(handlers::orders::router())
        // Read-only reporting
        .merge(handlers::reports::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Payline server listening on {}", addr);

    // Use into_make_service_with_connect_info so the webhook handler can
    // log source IPs on signature failures.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
