//! Connection pool construction

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use super::errors::StoreResult;
use crate::config::DatabaseConfig;

/// Pool type every store is constructed with
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Open a file-backed pool with WAL journaling and the configured busy
/// timeout applied to every connection
///
/// Stores never call this themselves; the pool belongs to the caller and
/// may be shared by any number of stores.
pub fn open_pool(config: &DatabaseConfig) -> StoreResult<SqlitePool> {
    let busy_timeout = config.busy_timeout;

    let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(config.connection_timeout)
        .build(manager)?;

    debug!(
        path = %config.path.display(),
        pool_size = config.pool_size,
        "Opened SQLite connection pool"
    );

    Ok(pool)
}
