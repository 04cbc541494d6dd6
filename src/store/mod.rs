use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::info;

/// A persisted key/value record.
///
/// Ids are assigned by the store on insert, increase monotonically,
/// and are never reused after deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub key: String,
    pub value: String,
}

/// Owns the single SQLite connection and hands out namespace-bound
/// [`DataStore`] handles that share it. All access goes through one
/// mutex, so queued operations cannot corrupt each other under
/// concurrent callers.
#[derive(Clone)]
pub struct StoreProvider {
    conn: Arc<Mutex<Connection>>,
}

impl StoreProvider {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // Enable WAL mode for better concurrent read performance.
        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        info!("Data store opened at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A store handle bound to one namespace, initialized and ready.
    pub async fn data_store(&self, namespace: &str) -> Result<DataStore> {
        let store = DataStore::new(Arc::clone(&self.conn), namespace)?;
        store.initialize().await?;
        Ok(store)
    }
}

/// Key/value storage bound to exactly one namespace (one table).
///
/// Key and value arguments of lookup and removal operations are
/// SQL-LIKE patterns: `%` matches any run of characters, `_` exactly
/// one, everything else literally. Matching is case-insensitive for
/// ASCII.
#[derive(Clone)]
pub struct DataStore {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
}

#[allow(dead_code)]
impl DataStore {
    fn new(conn: Arc<Mutex<Connection>>, namespace: &str) -> Result<Self> {
        // The namespace becomes a table name and cannot be bound as a
        // query parameter, so restrict it to identifier characters.
        if namespace.is_empty()
            || !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("Invalid namespace name: {:?}", namespace);
        }
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    /// Create the namespace table if it does not exist yet. Safe to
    /// call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL
            );",
            self.namespace
        ))
        .with_context(|| format!("Failed to initialize namespace {}", self.namespace))?;
        Ok(())
    }

    /// Append a new record. Never overwrites an existing one.
    pub async fn add(&self, key: &str, value: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (key, value) VALUES (?1, ?2)",
                    self.namespace
                ),
                rusqlite::params![key, value],
            )
            .context("Failed to insert record")?;
        Ok(inserted > 0)
    }

    /// Look a record up by its identifier.
    pub async fn get(&self, id: i64) -> Result<Option<Record>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT id, key, value FROM \"{}\" WHERE id = ?1",
                self.namespace
            ),
            rusqlite::params![id],
            record_from_row,
        )
        .optional()
        .context("Failed to query record by id")
    }

    /// All records whose key matches the pattern. Order is unspecified.
    pub async fn get_all(&self, key_pattern: &str) -> Result<Vec<Record>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, key, value FROM \"{}\" WHERE key LIKE ?1",
                self.namespace
            ))
            .context("Failed to prepare query")?;
        let records = stmt
            .query_map(rusqlite::params![key_pattern], record_from_row)
            .context("Failed to query records")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect records")?;
        Ok(records)
    }

    /// Distinct keys across the whole namespace.
    pub async fn get_all_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("SELECT DISTINCT key FROM \"{}\"", self.namespace))
            .context("Failed to prepare query")?;
        let keys = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to query keys")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect keys")?;
        Ok(keys)
    }

    /// Uniformly random record among those whose key matches the
    /// pattern. `None` when nothing matches.
    pub async fn get_random(&self, key_pattern: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT id, key, value FROM \"{}\" WHERE key LIKE ?1 ORDER BY random() LIMIT 1",
                self.namespace
            ),
            rusqlite::params![key_pattern],
            record_from_row,
        )
        .optional()
        .context("Failed to query random record")
    }

    /// Uniformly random record across the entire namespace.
    pub async fn get_random_any(&self) -> Result<Option<Record>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT id, key, value FROM \"{}\" ORDER BY random() LIMIT 1",
                self.namespace
            ),
            [],
            record_from_row,
        )
        .optional()
        .context("Failed to query random record")
    }

    /// Delete records whose key and value both match. True when at
    /// least one row was removed.
    pub async fn remove(&self, key_pattern: &str, value_pattern: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE key LIKE ?1 AND value LIKE ?2",
                    self.namespace
                ),
                rusqlite::params![key_pattern, value_pattern],
            )
            .context("Failed to remove records")?;
        Ok(removed > 0)
    }

    /// Delete exactly one record by identifier.
    pub async fn remove_by_id(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                &format!("DELETE FROM \"{}\" WHERE id = ?1", self.namespace),
                rusqlite::params![id],
            )
            .context("Failed to remove record by id")?;
        Ok(removed > 0)
    }

    /// Delete every record whose key matches the pattern; returns the
    /// number removed.
    pub async fn remove_all(&self, key_pattern: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE key LIKE ?1", self.namespace),
            rusqlite::params![key_pattern],
        )
        .context("Failed to remove records")
    }

    /// The record matching the pattern, but only when it is the only
    /// one. Zero matches and two-or-more both yield `None`; callers
    /// that need to tell the cases apart should use [`get_count`].
    ///
    /// [`get_count`]: DataStore::get_count
    pub async fn get_single(&self, key_pattern: &str) -> Result<Option<Record>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, key, value FROM \"{}\" WHERE key LIKE ?1 ORDER BY id LIMIT 2",
                self.namespace
            ))
            .context("Failed to prepare query")?;
        let mut records = stmt
            .query_map(rusqlite::params![key_pattern], record_from_row)
            .context("Failed to query single record")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect records")?;
        if records.len() == 1 {
            Ok(records.pop())
        } else {
            Ok(None)
        }
    }

    /// Enforce "this key has at most one value": update the record in
    /// place when exactly one exists, insert when none does, collapse
    /// duplicates left by earlier non-singleton writes otherwise.
    ///
    /// The check-and-mutate sequence runs inside a single transaction
    /// while holding the connection lock, so concurrent calls for the
    /// same key are linearizable with respect to each other.
    pub async fn set_single(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("Failed to begin set_single transaction")?;

        let matches: Vec<i64> = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT id FROM \"{}\" WHERE key LIKE ?1 ORDER BY id LIMIT 2",
                    self.namespace
                ))
                .context("Failed to prepare query")?;
            let matches = stmt
                .query_map(rusqlite::params![key], |row| row.get(0))
                .context("Failed to query matching records")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to collect matching ids")?;
            matches
        };

        let insert = format!(
            "INSERT INTO \"{}\" (key, value) VALUES (?1, ?2)",
            self.namespace
        );
        let changed = match matches.as_slice() {
            [id] => tx
                .execute(
                    &format!("UPDATE \"{}\" SET value = ?1 WHERE id = ?2", self.namespace),
                    rusqlite::params![value, id],
                )
                .context("Failed to update record")?,
            [] => tx
                .execute(&insert, rusqlite::params![key, value])
                .context("Failed to insert record")?,
            _ => {
                tx.execute(
                    &format!("DELETE FROM \"{}\" WHERE key LIKE ?1", self.namespace),
                    rusqlite::params![key],
                )
                .context("Failed to collapse duplicate records")?;
                tx.execute(&insert, rusqlite::params![key, value])
                    .context("Failed to insert record")?
            }
        };

        tx.commit().context("Failed to commit set_single")?;
        Ok(changed > 0)
    }

    /// Number of records whose key matches the pattern.
    pub async fn get_count(&self, key_pattern: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT count(id) FROM \"{}\" WHERE key LIKE ?1",
                self.namespace
            ),
            rusqlite::params![key_pattern],
            |row| row.get(0),
        )
        .context("Failed to count records")
    }

    /// Whether any record matches both patterns.
    pub async fn contains(&self, key_pattern: &str, value_pattern: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT count(id) FROM \"{}\" WHERE key LIKE ?1 AND value LIKE ?2",
                    self.namespace
                ),
                rusqlite::params![key_pattern, value_pattern],
                |row| row.get(0),
            )
            .context("Failed to count records")?;
        Ok(count > 0)
    }
}

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
    })
}
