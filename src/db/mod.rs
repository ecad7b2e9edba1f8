mod from_row;
mod schema;
pub mod backup;
pub mod queries;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;

use crate::payments::RazorpayClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding database pools, the gateway client, and
/// outbound notification configuration.
#[derive(Clone)]
pub struct AppState {
    /// Write pool used by the reconciliation path.
    pub db: DbPool,
    /// Read-only pool for reporting queries, isolated from the write path.
    pub read: DbPool,
    /// Outbound Razorpay API client (also owns the webhook signing secret).
    pub gateway: RazorpayClient,
    /// Shared HTTP client for fire-and-forget notifications.
    pub http_client: reqwest::Client,
    /// Target for post-commit order notifications, if configured.
    pub notify_webhook_url: Option<String>,
    /// Base URL for payment-link callbacks (e.g., https://api.example.com).
    pub base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // busy_timeout and foreign_keys are per-connection settings, so they
    // belong here rather than in the one-shot schema bootstrap.
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    Pool::builder().max_size(10).build(manager)
}

/// Read-only pool for the reporting path. Reporting queries never block
/// the reconciliation writers (WAL readers see a consistent snapshot).
pub fn create_read_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_init(|conn| {
            conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA query_only = ON;")
        });
    Pool::builder().max_size(4).build(manager)
}
