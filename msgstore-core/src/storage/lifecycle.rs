//! Start/stop lifecycle and the schema reachability probe

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::errors::{StoreError, StoreResult};
use super::pool::SqlitePool;

/// Lifecycle hooks exposed to whatever owns a store
pub trait Lifecycle {
    /// Run the schema probe (if enabled) and mark the store running.
    /// A no-op while already running.
    fn start(&self) -> StoreResult<()>;

    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Running flag shared by both stores
#[derive(Debug, Default)]
pub(crate) struct RunState {
    running: AtomicBool,
}

impl RunState {
    pub(crate) fn start_with<F>(&self, component: &'static str, probe: F) -> StoreResult<()>
    where
        F: FnOnce() -> StoreResult<()>,
    {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        probe()?;

        if !self.running.swap(true, Ordering::AcqRel) {
            info!(component, "Message store started");
        }
        Ok(())
    }

    pub(crate) fn stop(&self, component: &'static str) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!(component, "Message store stopped");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Run each zero-row `SELECT`; any failure means the schema is not usable
pub(crate) fn probe_schema<'a, I>(pool: &SqlitePool, probes: I) -> StoreResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let conn = pool
        .get()
        .map_err(|e| StoreError::SchemaUnavailable(format!("database unreachable: {}", e)))?;

    for sql in probes {
        let outcome: rusqlite::Result<()> = (|| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            rows.next()?;
            Ok(())
        })();

        outcome.map_err(|e| StoreError::SchemaUnavailable(format!("{} ({})", e, sql)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_idempotent() {
        let state = RunState::default();
        let mut probes = 0;

        state
            .start_with("test", || {
                probes += 1;
                Ok(())
            })
            .unwrap();
        state
            .start_with("test", || {
                probes += 1;
                Ok(())
            })
            .unwrap();

        assert!(state.is_running());
        assert_eq!(probes, 1);

        state.stop("test");
        assert!(!state.is_running());
    }

    #[test]
    fn test_failed_probe_leaves_store_stopped() {
        let state = RunState::default();
        let result = state.start_with("test", || {
            Err(StoreError::SchemaUnavailable("no such table".to_string()))
        });

        assert!(matches!(result, Err(StoreError::SchemaUnavailable(_))));
        assert!(!state.is_running());
    }
}
