pub mod cache;
pub mod queries;
mod from_row;
mod schema;

pub use from_row::FromRow;
pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::db::cache::LicenseCache;
use crate::email::EmailService;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Read-through cache over license-side lookups.
    pub cache: LicenseCache,
    pub email: EmailService,
    /// Base URL for links in emails (e.g., https://billing.example.com)
    pub base_url: String,
    /// Store name used in customer-facing email copy.
    pub store_name: String,
    /// HMAC secret for PayPal webhooks. None rejects all PayPal deliveries.
    pub paypal_webhook_secret: Option<String>,
    pub reminders_enabled: bool,
    /// Day offsets for upcoming-renewal notices (e.g., [7, 1]).
    pub renewal_notice_days: Vec<i64>,
    /// Day offsets for expiring-soon notices.
    pub expiration_notice_days: Vec<i64>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // foreign_keys is per-connection, so every pooled connection sets it.
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    Pool::builder().max_size(10).build(manager)
}
