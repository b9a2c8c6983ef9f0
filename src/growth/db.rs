//! Store handle and schema migrations
//!
//! The relational store is the only shared mutable resource. A [`Store`] wraps
//! one SQLite connection; concurrent requests either share a handle (cloned,
//! serialized by the mutex) or open their own handle on the same file
//! (serialized by SQLite's write lock, see `sqlite_pragma`).

use super::error::{GrowthError, GrowthResult};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema files compiled into the binary, in execution order
///
/// Same content as `/sql/`, so tests and the CLI work without a schema dir.
pub const EMBEDDED_SCHEMA: &[(&str, &str)] = &[
    ("01_signups.sql", include_str!("../../sql/01_signups.sql")),
    ("02_points_ledger.sql", include_str!("../../sql/02_points_ledger.sql")),
    (
        "03_referral_conversions.sql",
        include_str!("../../sql/03_referral_conversions.sql"),
    ),
    ("04_referral_clicks.sql", include_str!("../../sql/04_referral_clicks.sql")),
];

/// Run schema migrations from SQL files
///
/// Reads all .sql files from the specified directory and executes them in
/// filename order (`01_`, `02_`, ...). All statements must use
/// `IF NOT EXISTS` so the loader can run on every startup.
///
/// Returns the number of files executed.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> GrowthResult<usize> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(GrowthError::Schema(format!(
            "Schema directory not found: {}",
            schema_dir
        )));
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in &sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);

        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)
            .map_err(|e| GrowthError::Schema(format!("{}: {}", filename, e)))?;
    }

    log::info!("✅ {} schema migrations applied", sql_files.len());

    Ok(sql_files.len())
}

/// Apply the compiled-in schema (idempotent)
pub fn init_schema(conn: &Connection) -> GrowthResult<()> {
    for (filename, sql) in EMBEDDED_SCHEMA {
        conn.execute_batch(sql)
            .map_err(|e| GrowthError::Schema(format!("{}: {}", filename, e)))?;
        log::debug!("Applied embedded schema {}", filename);
    }
    Ok(())
}

fn ensure_parent_dir(db_path: &Path) -> GrowthResult<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Shared handle on one store connection
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database file with PRAGMAs and the embedded schema
    pub fn open(db_path: impl AsRef<Path>) -> GrowthResult<Self> {
        let db_path = db_path.as_ref();
        ensure_parent_dir(db_path)?;

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        init_schema(&conn)?;

        log::debug!("Store opened at {}", db_path.display());

        Ok(Self::from_connection(conn))
    }

    /// Open a database file whose schema is managed by `run_schema_migrations`
    pub fn open_with_migrations(
        db_path: impl AsRef<Path>,
        schema_dir: &str,
    ) -> GrowthResult<Self> {
        let db_path = db_path.as_ref();
        ensure_parent_dir(db_path)?;

        let mut conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory store (unit tests, dry runs)
    pub fn open_in_memory() -> GrowthResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_optimized_pragmas(&conn)?;
        init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` with exclusive use of the connection
    ///
    /// `f` gets `&mut Connection` so it can open its own transaction.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> GrowthResult<T>,
    ) -> GrowthResult<T> {
        let mut conn = self.conn.lock().map_err(|_| GrowthError::LockPoisoned)?;
        f(&mut conn)
    }
}
