//! Shared SQLite PRAGMA setup
//!
//! Every connection opened by this crate goes through `apply_optimized_pragmas`
//! so that concurrent request handlers (separate connections, possibly separate
//! processes) share the same journal and locking behaviour.

use rusqlite::Connection;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up with SQLITE_BUSY
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Apply PRAGMAs used by every store connection
///
/// - `busy_timeout`: concurrent writers queue instead of failing immediately
/// - `journal_mode = WAL`: readers never block the single writer
/// - `synchronous = NORMAL`: safe with WAL, avoids an fsync per commit
/// - `foreign_keys = ON`: ledger/click/conversion rows must point at a signup
///
/// In-memory databases report `memory` for the journal mode; that is accepted.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // Must come first: switching to WAL needs a lock another connection may hold
    conn.busy_timeout(BUSY_TIMEOUT)?;

    let journal_mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal_mode = {}", journal_mode);

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_database_switches_to_wal() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join("pragma.db")).unwrap();

        apply_optimized_pragmas(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_in_memory_database_is_accepted() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(apply_optimized_pragmas(&conn).is_ok());
    }
}
