//! libSQL record store for domain records, harvested metadata, and keywords.
//!
//! The [`Storage`] struct wraps a local libSQL database. Writes go through a
//! single connection guarded by an async mutex so concurrent sinks are
//! serialized per operation; the pending-record cursor runs on its own
//! connection. The database runs in WAL mode so the cursor and the writers
//! do not block each other.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Rows, Value, params, params_from_iter};
use namex_shared::{DomainRecord, EnrichmentResult, NamexError, Result};
use tokio::sync::Mutex;

/// Pragmas applied to every connection.
const CONNECTION_PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA foreign_keys = ON;
";

/// Selects rows that have never been enriched.
const PENDING_SQL: &str = "SELECT id, domain FROM domains WHERE expiry_date IS NULL ORDER BY id";

/// Selects never-enriched rows plus rows whose recorded expiry has passed.
const PENDING_OR_EXPIRED_SQL: &str = "SELECT id, domain FROM domains
     WHERE expiry_date IS NULL OR expiry_date < datetime('now')
     ORDER BY id";

/// Rows per keyword insert; two bound parameters each, well under SQLite's
/// 32766-variable limit.
const KEYWORD_CHUNK: usize = 500;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    writer: Mutex<Connection>,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NamexError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        let conn = connect(&db).await?;

        let storage = Self {
            db,
            writer: Mutex::new(conn),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.writer.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    NamexError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let conn = self.writer.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Domain records
    // -----------------------------------------------------------------------

    /// Insert a domain. Returns the new id, or `None` if it was already present.
    pub async fn insert_domain(&self, domain: &str) -> Result<Option<i64>> {
        let domain = normalize_domain(domain)?;
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO domains (domain) VALUES (?1)",
                params![domain.as_str()],
            )
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        Ok((changed == 1).then(|| conn.last_insert_rowid()))
    }

    /// Insert many domains in one transaction. Blank lines and `#` comments are skipped.
    pub async fn import_domains<I, S>(&self, domains: I) -> Result<ImportStats>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let conn = self.writer.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        let mut stats = ImportStats::default();
        for line in domains {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let domain = match normalize_domain(line) {
                Ok(domain) => domain,
                Err(e) => {
                    tracing::warn!(line, error = %e, "skipping unusable line");
                    stats.skipped += 1;
                    continue;
                }
            };
            let changed = tx
                .execute(
                    "INSERT OR IGNORE INTO domains (domain) VALUES (?1)",
                    params![domain.as_str()],
                )
                .await
                .map_err(|e| NamexError::Storage(e.to_string()))?;
            if changed == 1 {
                stats.inserted += 1;
            } else {
                stats.skipped += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;
        Ok(stats)
    }

    /// Open a cursor over records awaiting enrichment.
    ///
    /// With `refresh_expired`, rows whose stored expiry is in the past are included too.
    pub async fn pending(&self, refresh_expired: bool) -> Result<PendingRecords> {
        let conn = connect(&self.db).await?;
        let sql = if refresh_expired {
            PENDING_OR_EXPIRED_SQL
        } else {
            PENDING_SQL
        };
        let rows = conn
            .query(sql, params![])
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        Ok(PendingRecords { rows, _conn: conn })
    }

    /// Count records the next [`Storage::pending`] call would yield.
    pub async fn count_pending(&self, refresh_expired: bool) -> Result<u64> {
        let conn = connect(&self.db).await?;
        let filter = if refresh_expired {
            "expiry_date IS NULL OR expiry_date < datetime('now')"
        } else {
            "expiry_date IS NULL"
        };
        let mut rows = conn
            .query(
                &format!("SELECT COUNT(*) FROM domains WHERE {filter}"),
                params![],
            )
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n as u64)
                .map_err(|e| NamexError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(NamexError::Storage(e.to_string())),
        }
    }

    /// Get a domain row by id.
    pub async fn get_domain(&self, id: i64) -> Result<Option<DomainRow>> {
        let conn = connect(&self.db).await?;
        let mut rows = conn
            .query(
                "SELECT id, domain, title, description, og_title, og_description, expiry_date, enriched_at
                 FROM domains WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_domain(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(NamexError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Enrichment writes
    // -----------------------------------------------------------------------

    /// Write the harvested metadata for `result.domain_id` and stamp `enriched_at`.
    pub async fn update_metadata(&self, result: &EnrichmentResult) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE domains
                 SET title = ?1, description = ?2, og_title = ?3, og_description = ?4,
                     expiry_date = ?5, enriched_at = ?6
                 WHERE id = ?7",
                params![
                    result.title.as_str(),
                    result.description.as_str(),
                    result.og_title.as_str(),
                    result.og_description.as_str(),
                    result.expiry_date.as_deref(),
                    now.as_str(),
                    result.domain_id,
                ],
            )
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(NamexError::Storage(format!(
                "no domain with id {}",
                result.domain_id
            )));
        }
        Ok(())
    }

    /// Replace the keyword rows of `domain_id` with `keywords` in one transaction.
    ///
    /// Old rows are deleted and the new set is written with multi-row inserts
    /// of at most 500 rows, so applying the same result twice
    /// leaves one copy of each keyword. Returns the number of rows inserted.
    pub async fn replace_keywords(&self, domain_id: i64, keywords: &[String]) -> Result<usize> {
        if keywords.is_empty() {
            return Ok(0);
        }

        let conn = self.writer.lock().await;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        tx.execute("DELETE FROM keywords WHERE domain_id = ?1", params![domain_id])
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        let mut inserted = 0u64;
        for chunk in keywords.chunks(KEYWORD_CHUNK) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("(?{}, ?{})", i * 2 + 1, i * 2 + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql =
                format!("INSERT OR IGNORE INTO keywords (domain_id, keyword) VALUES {placeholders}");
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|k| [Value::Integer(domain_id), Value::Text(k.clone())])
                .collect();

            inserted += tx
                .execute(&sql, params_from_iter(values))
                .await
                .map_err(|e| NamexError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        Ok(inserted as usize)
    }

    /// List the keywords stored for a domain, alphabetically.
    pub async fn keywords_for(&self, domain_id: i64) -> Result<Vec<String>> {
        let conn = connect(&self.db).await?;
        let mut rows = conn
            .query(
                "SELECT keyword FROM keywords WHERE domain_id = ?1 ORDER BY keyword",
                params![domain_id],
            )
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| NamexError::Storage(e.to_string()))?
        {
            results.push(
                row.get::<String>(0)
                    .map_err(|e| NamexError::Storage(e.to_string()))?,
            );
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Cursor and row types
// ---------------------------------------------------------------------------

/// Lazy, finite cursor over pending [`DomainRecord`]s. Not restartable.
pub struct PendingRecords {
    rows: Rows,
    _conn: Connection,
}

impl PendingRecords {
    /// Read the next record, or `None` once the cursor is exhausted.
    pub async fn next(&mut self) -> Result<Option<DomainRecord>> {
        match self.rows.next().await {
            Ok(Some(row)) => Ok(Some(DomainRecord {
                id: row
                    .get::<i64>(0)
                    .map_err(|e| NamexError::Storage(e.to_string()))?,
                domain: row
                    .get::<String>(1)
                    .map_err(|e| NamexError::Storage(e.to_string()))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(NamexError::Storage(e.to_string())),
        }
    }
}

/// A full row of the `domains` table.
#[derive(Debug, Clone)]
pub struct DomainRow {
    pub id: i64,
    pub domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub expiry_date: Option<String>,
    /// RFC 3339 timestamp of the last metadata write.
    pub enriched_at: Option<String>,
}

/// Outcome of [`Storage::import_domains`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Newly inserted domains.
    pub inserted: usize,
    /// Duplicates and unusable lines.
    pub skipped: usize,
}

/// Open a connection and apply the per-connection pragmas.
async fn connect(db: &Database) -> Result<Connection> {
    let conn = db
        .connect()
        .map_err(|e| NamexError::Storage(e.to_string()))?;
    conn.execute_batch(CONNECTION_PRAGMAS)
        .await
        .map_err(|e| NamexError::Storage(format!("failed to configure connection: {e}")))?;
    Ok(conn)
}

/// Lowercase, trim, and drop a trailing root dot.
fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    if domain.is_empty() || domain.chars().any(char::is_whitespace) {
        return Err(NamexError::validation(format!(
            "'{domain}' is not a hostname"
        )));
    }
    Ok(domain)
}

/// Convert a database row to a [`DomainRow`].
fn row_to_domain(row: &libsql::Row) -> Result<DomainRow> {
    Ok(DomainRow {
        id: row
            .get::<i64>(0)
            .map_err(|e| NamexError::Storage(e.to_string()))?,
        domain: row
            .get::<String>(1)
            .map_err(|e| NamexError::Storage(e.to_string()))?,
        title: row.get::<String>(2).ok(),
        description: row.get::<String>(3).ok(),
        og_title: row.get::<String>(4).ok(),
        og_description: row.get::<String>(5).ok(),
        expiry_date: row.get::<String>(6).ok(),
        enriched_at: row.get::<String>(7).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("namex_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn drain(mut pending: PendingRecords) -> Vec<DomainRecord> {
        let mut out = Vec::new();
        while let Some(record) = pending.next().await.expect("read pending") {
            out.push(record);
        }
        out
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("namex_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn insert_domain_ignores_duplicates() {
        let storage = test_storage().await;
        let id = storage.insert_domain("Example.COM.").await.expect("insert");
        assert!(id.is_some());

        let again = storage.insert_domain("example.com").await.expect("insert dup");
        assert!(again.is_none());

        let row = storage.get_domain(id.unwrap()).await.unwrap().unwrap();
        assert_eq!(row.domain, "example.com");
        assert!(row.expiry_date.is_none());
        assert!(row.enriched_at.is_none());
    }

    #[tokio::test]
    async fn import_skips_comments_blanks_and_duplicates() {
        let storage = test_storage().await;
        let stats = storage
            .import_domains(["example.com", "", "# comment", "example.org", "EXAMPLE.com", "bad host"])
            .await
            .expect("import");
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(storage.count_pending(false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn pending_streams_rows_without_expiry() {
        let storage = test_storage().await;
        storage
            .import_domains(["a.com", "b.com", "c.com"])
            .await
            .unwrap();

        let records = drain(storage.pending(false).await.unwrap()).await;
        let domains: Vec<&str> = records.iter().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, ["a.com", "b.com", "c.com"]);

        let done = EnrichmentResult {
            expiry_date: Some("2030-01-01 00:00:00".into()),
            ..EnrichmentResult::empty(records[1].id)
        };
        storage.update_metadata(&done).await.unwrap();

        let records = drain(storage.pending(false).await.unwrap()).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.domain != "b.com"));
    }

    #[tokio::test]
    async fn refresh_expired_includes_past_expiry() {
        let storage = test_storage().await;
        let old = storage.insert_domain("old.com").await.unwrap().unwrap();
        let fresh = storage.insert_domain("fresh.com").await.unwrap().unwrap();

        for (id, expiry) in [(old, "2001-01-01 00:00:00"), (fresh, "2999-01-01 00:00:00")] {
            storage
                .update_metadata(&EnrichmentResult {
                    expiry_date: Some(expiry.into()),
                    ..EnrichmentResult::empty(id)
                })
                .await
                .unwrap();
        }

        assert!(drain(storage.pending(false).await.unwrap()).await.is_empty());

        let expired = drain(storage.pending(true).await.unwrap()).await;
        assert_eq!(expired, vec![DomainRecord::new(old, "old.com")]);
        assert_eq!(storage.count_pending(true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_metadata_writes_all_fields() {
        let storage = test_storage().await;
        let id = storage.insert_domain("example.com").await.unwrap().unwrap();

        let result = EnrichmentResult {
            domain_id: id,
            title: "Example Domain".into(),
            description: "An example".into(),
            og_title: "OG Example".into(),
            og_description: "OG description".into(),
            keywords: "a,b".into(),
            expiry_date: Some("2025-06-01 00:00:00".into()),
            ..Default::default()
        };
        storage.update_metadata(&result).await.expect("update");

        let row = storage.get_domain(id).await.unwrap().unwrap();
        assert_eq!(row.title.as_deref(), Some("Example Domain"));
        assert_eq!(row.og_description.as_deref(), Some("OG description"));
        assert_eq!(row.expiry_date.as_deref(), Some("2025-06-01 00:00:00"));
        assert!(row.enriched_at.is_some());
    }

    #[tokio::test]
    async fn update_metadata_unknown_id_fails() {
        let storage = test_storage().await;
        let err = storage
            .update_metadata(&EnrichmentResult::empty(9999))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no domain with id 9999"));
    }

    #[tokio::test]
    async fn replace_keywords_is_idempotent() {
        let storage = test_storage().await;
        let id = storage.insert_domain("example.com").await.unwrap().unwrap();
        let keywords = vec!["rust".to_string(), "domains".to_string()];

        assert_eq!(storage.replace_keywords(id, &keywords).await.unwrap(), 2);
        assert_eq!(storage.replace_keywords(id, &keywords).await.unwrap(), 2);
        assert_eq!(storage.keywords_for(id).await.unwrap(), ["domains", "rust"]);

        // A later result replaces, rather than extends, the set.
        storage
            .replace_keywords(id, &["whois".to_string()])
            .await
            .unwrap();
        assert_eq!(storage.keywords_for(id).await.unwrap(), ["whois"]);
    }

    #[tokio::test]
    async fn replace_keywords_empty_is_noop() {
        let storage = test_storage().await;
        let id = storage.insert_domain("example.com").await.unwrap().unwrap();
        storage
            .replace_keywords(id, &["kept".to_string()])
            .await
            .unwrap();

        assert_eq!(storage.replace_keywords(id, &[]).await.unwrap(), 0);
        assert_eq!(storage.keywords_for(id).await.unwrap(), ["kept"]);
    }

    #[tokio::test]
    async fn replace_keywords_handles_oversized_sets() {
        let storage = test_storage().await;
        let id = storage.insert_domain("example.com").await.unwrap().unwrap();
        let keywords: Vec<String> = (0..20_000).map(|i| format!("kw{i:05}")).collect();

        let inserted = storage
            .replace_keywords(id, &keywords)
            .await
            .expect("chunked insert");
        assert_eq!(inserted, 20_000);

        let stored = storage.keywords_for(id).await.unwrap();
        assert_eq!(stored.len(), 20_000);
        assert_eq!(stored.first().map(String::as_str), Some("kw00000"));
        assert_eq!(stored.last().map(String::as_str), Some("kw19999"));

        // Re-applying replaces the whole set, across chunk boundaries.
        assert_eq!(storage.replace_keywords(id, &keywords).await.unwrap(), 20_000);
        assert_eq!(storage.keywords_for(id).await.unwrap().len(), 20_000);
    }
}
