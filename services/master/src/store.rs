//! The relational store (C5): bootstraps the three fixed tables, materializes
//! per-node tables on demand, and appends reading/metadata rows.
//!
//! Built on `rusqlite` rather than the `sqlx`/Postgres stack used elsewhere
//! in this workspace — the store is a single embedded file, and the shape of
//! its `Store` type (a struct owning one `Connection`, `open`/
//! `open_in_memory` constructors, an idempotent schema-application step)
//! follows the sibling receiver crate's `Db` wrapper rather than the
//! server's pooled Postgres connection.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection};
use telemetry_protocol::ReadingFrame;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    #[error("'{0}' is not a valid store identifier (must not start with a digit, and may only contain letters, digits, and underscores)")]
    InvalidIdentifier(String),

    #[error("reading from '{0}' does not match its table's established schema")]
    SchemaMismatch(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of one persist tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub persisted: usize,
    pub skipped: usize,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    pub fn integrity_check(&self) -> StoreResult<()> {
        let result: String =
            self.conn
                .pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if result != "ok" {
            return Err(StoreError::IntegrityCheckFailed(result));
        }
        Ok(())
    }

    fn apply_pragmas(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    /// Idempotent: every statement is `CREATE TABLE IF NOT EXISTS`, so
    /// opening an existing store is a schema-wise no-op.
    fn apply_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Append one reading, committing immediately. For batched persist-tick
    /// use, prefer [`Store::persist_tick`], which shares one transaction and
    /// one commit across every snapshot entry.
    pub fn append_reading(&mut self, frame: &ReadingFrame) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        append_reading_tx(&tx, frame)?;
        tx.commit()?;
        Ok(())
    }

    /// Append one metadata row, committing immediately. Ensures the
    /// laboratories row for `user` exists, but — unlike `append_reading` —
    /// never materializes the per-node table: a `MetadataFrame`'s shape
    /// differs from a `ReadingFrame`'s, so table creation stays keyed on the
    /// first reading rather than on metadata.
    pub fn append_metadata(&mut self, user: &str, metadata_json: &str, wall_time: f64) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        append_metadata_tx(&tx, user, metadata_json, wall_time)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist every entry in a snapshot inside one transaction, committing
    /// once at the end. A schema mismatch skips just that row with a
    /// logged warning rather than aborting the whole tick.
    pub fn persist_tick<'a>(
        &mut self,
        frames: impl Iterator<Item = &'a ReadingFrame>,
    ) -> StoreResult<PersistSummary> {
        let tx = self.conn.transaction()?;
        let mut summary = PersistSummary::default();
        for frame in frames {
            match append_reading_tx(&tx, frame) {
                Ok(()) => summary.persisted += 1,
                Err(StoreError::SchemaMismatch(user)) => {
                    tracing::warn!(user = %user, "schema mismatch during persist, skipping row");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit()?;
        Ok(summary)
    }
}

fn validate_identifier(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if name.is_empty() || !starts_ok || !rest_ok {
        return Err(StoreError::InvalidIdentifier(name.to_owned()));
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

/// `(name, sql type)` for every key in a `ReadingFrame`, in wire order:
/// `user`, `error`, `x`, then each channel. Column typing follows the
/// persisted schema: `TEXT` for `user`, `INTEGER` for `error`, `REAL`
/// otherwise.
fn frame_columns(frame: &ReadingFrame) -> Vec<(String, &'static str)> {
    let mut columns = vec![
        ("user".to_owned(), "TEXT"),
        ("error".to_owned(), "INTEGER"),
        ("x".to_owned(), "REAL"),
    ];
    for key in frame.channels.keys() {
        columns.push((key.clone(), "REAL"));
    }
    columns
}

fn table_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1")?;
    Ok(stmt.exists(params![name])?)
}

fn table_columns(conn: &Connection, name: &str) -> StoreResult<Vec<String>> {
    let query = format!("PRAGMA table_info({})", quote_ident(name));
    let mut stmt = conn.prepare(&query)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn create_node_table(conn: &Connection, user: &str, frame: &ReadingFrame) -> StoreResult<()> {
    let columns = frame_columns(frame);
    for (name, _) in &columns {
        validate_identifier(name)?;
    }
    let mut sql = format!("CREATE TABLE {} (", quote_ident(user));
    for (name, sql_type) in &columns {
        sql.push_str(&quote_ident(name));
        sql.push(' ');
        sql.push_str(sql_type);
        sql.push_str(", ");
    }
    sql.push_str("ID INTEGER)");
    conn.execute_batch(&sql)?;
    Ok(())
}

fn register_laboratory(conn: &Connection, user: &str) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO laboratories (labNAME) VALUES (?1)",
        params![user],
    )?;
    Ok(conn.last_insert_rowid())
}

fn lab_id(conn: &Connection, user: &str) -> StoreResult<i64> {
    conn.query_row(
        "SELECT _id FROM laboratories WHERE labNAME = ?1",
        params![user],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

fn ensure_laboratory(conn: &Connection, user: &str) -> StoreResult<i64> {
    match lab_id(conn, user) {
        Ok(id) => Ok(id),
        Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows)) => {
            register_laboratory(conn, user)
        }
        Err(e) => Err(e),
    }
}

/// The `append_reading` algorithm against any connection-like executor
/// (a plain `Connection` or an open `Transaction`, via `Deref`).
fn append_reading_tx(conn: &Connection, frame: &ReadingFrame) -> StoreResult<()> {
    let user = &frame.user;
    validate_identifier(user)?;

    let lab_id = if !table_exists(conn, user)? {
        create_node_table(conn, user, frame)?;
        register_laboratory(conn, user)?
    } else {
        let existing: HashSet<String> = table_columns(conn, user)?.into_iter().collect();
        for (name, _) in frame_columns(frame) {
            if !existing.contains(&name) {
                return Err(StoreError::SchemaMismatch(user.clone()));
            }
        }
        lab_id(conn, user)?
    };

    conn.execute(
        "INSERT INTO observation_list (labID) VALUES (?1)",
        params![lab_id],
    )?;
    let obs_id = conn.last_insert_rowid();

    let columns = frame_columns(frame);
    let mut column_list = String::from("ID");
    let mut placeholders = String::from("?1");
    for (i, (name, _)) in columns.iter().enumerate() {
        column_list.push(',');
        column_list.push_str(&quote_ident(name));
        placeholders.push_str(&format!(",?{}", i + 2));
    }

    let sql = format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
        quote_ident(user)
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(columns.len() + 1);
    values.push(Box::new(obs_id));
    values.push(Box::new(frame.user.clone()));
    values.push(Box::new(frame.error));
    values.push(Box::new(frame.x));
    for value in frame.channels.values() {
        values.push(Box::new(*value));
    }
    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(std::convert::AsRef::as_ref).collect();
    stmt.execute(params.as_slice())?;

    Ok(())
}

fn append_metadata_tx(
    conn: &Connection,
    user: &str,
    metadata_json: &str,
    wall_time: f64,
) -> StoreResult<()> {
    validate_identifier(user)?;
    let lab_id = ensure_laboratory(conn, user)?;
    conn.execute(
        "INSERT INTO metadata_list (time, labID, metadata) VALUES (?1, ?2, ?3)",
        params![wall_time, lab_id, metadata_json],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn reading(user: &str, error: bool, channels: &[(&str, f64)]) -> ReadingFrame {
        let mut map = IndexMap::new();
        for (k, v) in channels {
            map.insert((*k).to_owned(), *v);
        }
        ReadingFrame {
            user: user.to_owned(),
            error,
            x: 1_700_000_000.0,
            channels: map,
        }
    }

    #[test]
    fn reopening_an_existing_store_is_schema_wise_a_no_op() {
        let mut store = Store::open_in_memory().unwrap();
        store.apply_schema().unwrap();
        store.apply_schema().unwrap();
        store.integrity_check().unwrap();
    }

    #[test]
    fn new_node_creates_table_and_laboratory_row() {
        let mut store = Store::open_in_memory().unwrap();
        let frame = reading("lab9", false, &[("ch0", 1.0), ("ch1", 2.0)]);
        store.append_reading(&frame).unwrap();

        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM laboratories WHERE labNAME='lab9'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM \"lab9\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn every_row_id_references_an_observation_and_lab() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_reading(&reading("lab7", false, &[("ch0", 1.0)])).unwrap();
        store.append_reading(&reading("lab7", false, &[("ch0", 2.0)])).unwrap();

        let observation_count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM observation_list", [], |r| r.get(0))
            .unwrap();
        assert_eq!(observation_count, 2);

        let orphaned: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM \"lab7\" t LEFT JOIN observation_list o ON t.ID = o._id WHERE o._id IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(orphaned, 0);
    }

    #[test]
    fn extra_keys_are_rejected_without_crashing_persist() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_reading(&reading("lab7", false, &[("ch0", 1.0)])).unwrap();

        let mismatched = reading("lab7", false, &[("ch0", 1.0), ("ch1", 2.0)]);
        let summary = store.persist_tick(std::iter::once(&mismatched)).unwrap();
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn persist_tick_does_not_abort_on_one_bad_row() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_reading(&reading("lab7", false, &[("ch0", 1.0)])).unwrap();

        let good = reading("lab7", false, &[("ch0", 2.0)]);
        let bad = reading("lab7", false, &[("ch0", 2.0), ("ch1", 3.0)]);
        let summary = store
            .persist_tick(vec![&bad, &good].into_iter())
            .unwrap();
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn rejects_labels_starting_with_a_digit() {
        let mut store = Store::open_in_memory().unwrap();
        let frame = reading("9lab", false, &[]);
        assert!(matches!(
            store.append_reading(&frame),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn error_frame_persists_with_null_channels() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_reading(&reading("lab7", false, &[("ch0", 1.0)])).unwrap();
        store.append_reading(&ReadingFrame::error("lab7", 1_700_000_001.0)).unwrap();

        let error_flag: i64 = store
            .conn
            .query_row(
                "SELECT error FROM \"lab7\" ORDER BY ID DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(error_flag, 1);
    }

    #[test]
    fn append_metadata_ensures_laboratory_row_without_a_node_table() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .append_metadata("lab6", "{\"user\":\"lab6\",\"meta\":true}", 1_700_000_000.0)
            .unwrap();

        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(*) FROM laboratories WHERE labNAME='lab6'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert!(!table_exists(&store.conn, "lab6").unwrap());
    }
}
