//! libSQL warehouse layer: the final persisted sink for harvested records.
//!
//! The [`Warehouse`] struct wraps a libSQL database holding the
//! `publications` table and load history. The upsert path merges records by
//! title, then collapses the table to one row per title by rebuilding it
//! from a row-numbered projection and swapping the rebuilt table in — all
//! inside one transaction, so readers never observe a missing table and a
//! midway failure leaves the previous contents intact.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use uuid::Uuid;

use pubharvest_shared::{HarvestError, PublicationRecord, Result};

/// Warehouse handle wrapping a libSQL database.
pub struct Warehouse {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Warehouse {
    /// Open or create a local database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;

        Self::from_db(db).await
    }

    /// Connect to a remote database (managed warehouse deployments).
    pub async fn open_remote(url: &str, auth_token: &str) -> Result<Self> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;

        Self::from_db(db).await
    }

    async fn from_db(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;

        let warehouse = Self { db, conn };
        warehouse.run_migrations().await?;
        Ok(warehouse)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Warehouse(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
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
    // Upsert
    // -----------------------------------------------------------------------

    /// Merge `records` into `publications` and collapse to one row per title.
    ///
    /// Any failure aborts the whole upsert; there is no partial commit.
    pub async fn upsert(&self, records: &[PublicationRecord]) -> Result<()> {
        self.exec("BEGIN IMMEDIATE").await?;
        match self.merge_and_dedupe(records).await {
            Ok(()) => self.exec("COMMIT").await,
            Err(e) => {
                let _ = self.exec("ROLLBACK").await;
                Err(e)
            }
        }
    }

    async fn merge_and_dedupe(&self, records: &[PublicationRecord]) -> Result<()> {
        for record in records {
            let changed = self
                .conn
                .execute(
                    "UPDATE publications
                     SET summary = ?2, document_ref = ?3, image_ref = ?4
                     WHERE title = ?1",
                    params![
                        record.title.as_str(),
                        record.summary.as_str(),
                        record.document_ref.as_deref(),
                        record.image_ref.as_deref(),
                    ],
                )
                .await
                .map_err(|e| HarvestError::Warehouse(e.to_string()))?;

            if changed == 0 {
                self.conn
                    .execute(
                        "INSERT INTO publications (title, summary, document_ref, image_ref)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            record.title.as_str(),
                            record.summary.as_str(),
                            record.document_ref.as_deref(),
                            record.image_ref.as_deref(),
                        ],
                    )
                    .await
                    .map_err(|e| HarvestError::Warehouse(e.to_string()))?;
            }
        }

        // Rebuild a one-row-per-title projection and swap it in. The rename
        // pair keeps the table name resolvable at every point; the index is
        // recreated because it is dropped with the old table.
        self.conn
            .execute_batch(
                r#"
DROP TABLE IF EXISTS publications_clean;
CREATE TABLE publications_clean AS
SELECT title, summary, document_ref, image_ref
FROM (
    SELECT title, summary, document_ref, image_ref,
           ROW_NUMBER() OVER (PARTITION BY title ORDER BY rowid) AS row_num
    FROM publications
)
WHERE row_num = 1;
ALTER TABLE publications RENAME TO publications_old;
ALTER TABLE publications_clean RENAME TO publications;
DROP TABLE publications_old;
CREATE INDEX IF NOT EXISTS idx_publications_title ON publications(title);
"#,
            )
            .await
            .map_err(|e| HarvestError::Warehouse(format!("dedupe rebuild failed: {e}")))?;

        Ok(())
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        self.conn
            .execute(sql, params![])
            .await
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Load history
    // -----------------------------------------------------------------------

    /// Record a completed load. Returns the generated run ID.
    pub async fn record_run(&self, record_count: usize, stats_json: &str) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO harvest_runs (id, loaded_at, record_count, stats_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), now.as_str(), record_count as i64, stats_json],
            )
            .await
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All publication rows, ordered by title.
    pub async fn list(&self) -> Result<Vec<PublicationRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title, summary, document_ref, image_ref
                 FROM publications ORDER BY title",
                params![],
            )
            .await
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(PublicationRecord {
                title: row
                    .get::<String>(0)
                    .map_err(|e| HarvestError::Warehouse(e.to_string()))?,
                summary: row
                    .get::<String>(1)
                    .map_err(|e| HarvestError::Warehouse(e.to_string()))?,
                document_ref: row.get::<String>(2).ok(),
                image_ref: row.get::<String>(3).ok(),
            });
        }
        Ok(results)
    }

    /// Number of rows carrying `title`.
    pub async fn count_rows_for_title(&self, title: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM publications WHERE title = ?1",
                params![title],
            )
            .await
            .map_err(|e| HarvestError::Warehouse(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<u64>(0)
                .map_err(|e| HarvestError::Warehouse(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(HarvestError::Warehouse(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file warehouse for testing.
    async fn test_warehouse() -> Warehouse {
        let tmp = std::env::temp_dir().join(format!("ph_test_{}.db", Uuid::now_v7()));
        Warehouse::open(&tmp).await.expect("open test warehouse")
    }

    fn record(title: &str, summary: &str) -> PublicationRecord {
        PublicationRecord {
            title: title.into(),
            summary: summary.into(),
            document_ref: Some(format!("https://store/staging/pdfs/{title}.pdf")),
            image_ref: None,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let warehouse = test_warehouse().await;
        assert_eq!(warehouse.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ph_test_{}.db", Uuid::now_v7()));
        let w1 = Warehouse::open(&tmp).await.expect("first open");
        drop(w1);
        let w2 = Warehouse::open(&tmp).await.expect("second open");
        assert_eq!(w2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn upsert_inserts_new_rows() {
        let warehouse = test_warehouse().await;
        warehouse
            .upsert(&[record("Report A", "s1"), record("Report B", "s2")])
            .await
            .expect("upsert");

        let rows = warehouse.list().await.expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Report A");
        assert_eq!(
            rows[0].document_ref.as_deref(),
            Some("https://store/staging/pdfs/Report A.pdf")
        );
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let warehouse = test_warehouse().await;
        let records = vec![record("Report A", "summary"), record("Report B", "other")];

        warehouse.upsert(&records).await.expect("first upsert");
        warehouse.upsert(&records).await.expect("second upsert");

        for rec in &records {
            assert_eq!(
                warehouse.count_rows_for_title(&rec.title).await.unwrap(),
                1
            );
        }
        let rows = warehouse.list().await.unwrap();
        assert_eq!(rows, records);
    }

    #[tokio::test]
    async fn merge_updates_matching_title() {
        let warehouse = test_warehouse().await;
        warehouse
            .upsert(&[record("Report A", "old summary")])
            .await
            .unwrap();

        let mut updated = record("Report A", "new summary");
        updated.image_ref = Some("https://store/staging/images/Report A.jpg".into());
        warehouse.upsert(&[updated.clone()]).await.unwrap();

        let rows = warehouse.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], updated);
    }

    #[tokio::test]
    async fn dedupe_collapses_preexisting_duplicates() {
        let warehouse = test_warehouse().await;

        // Seed duplicate rows directly, bypassing the merge
        for _ in 0..3 {
            warehouse
                .conn
                .execute(
                    "INSERT INTO publications (title, summary) VALUES ('Report A', 'dup')",
                    params![],
                )
                .await
                .unwrap();
        }

        warehouse.upsert(&[record("Report B", "s")]).await.unwrap();

        assert_eq!(warehouse.count_rows_for_title("Report A").await.unwrap(), 1);
        assert_eq!(warehouse.count_rows_for_title("Report B").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_titles_in_input_collapse_to_one_row() {
        let warehouse = test_warehouse().await;
        warehouse
            .upsert(&[record("Report A", "first"), record("Report A", "second")])
            .await
            .unwrap();

        assert_eq!(warehouse.count_rows_for_title("Report A").await.unwrap(), 1);
        // The second merge matched the row the first inserted
        let rows = warehouse.list().await.unwrap();
        assert_eq!(rows[0].summary, "second");
    }

    #[tokio::test]
    async fn failed_upsert_rolls_back_previous_contents() {
        let warehouse = test_warehouse().await;
        warehouse
            .upsert(&[record("Report A", "original")])
            .await
            .unwrap();

        // Block inserts so the next merge fails partway through
        warehouse
            .conn
            .execute(
                "CREATE TRIGGER block_inserts BEFORE INSERT ON publications
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END",
                params![],
            )
            .await
            .unwrap();

        // The merge updates Report A, then fails inserting Report B
        let err = warehouse
            .upsert(&[record("Report A", "updated"), record("Report B", "new")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("blocked"));

        // Rolled back: Report A keeps its pre-failure summary, B never landed
        let rows = warehouse.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Report A");
        assert_eq!(rows[0].summary, "original");
    }

    #[tokio::test]
    async fn null_refs_round_trip() {
        let warehouse = test_warehouse().await;
        let rec = PublicationRecord {
            title: "Report A".into(),
            summary: "Hello world".into(),
            document_ref: None,
            image_ref: None,
        };
        warehouse.upsert(std::slice::from_ref(&rec)).await.unwrap();

        let rows = warehouse.list().await.unwrap();
        assert_eq!(rows, vec![rec]);
    }

    #[tokio::test]
    async fn record_run_persists_history() {
        let warehouse = test_warehouse().await;
        let id = warehouse
            .record_run(12, r#"{"pages_visited": 10}"#)
            .await
            .expect("record run");
        assert!(!id.is_empty());

        let mut rows = warehouse
            .conn
            .query("SELECT record_count FROM harvest_runs WHERE id = ?1", params![id.as_str()])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 12);
    }
}
