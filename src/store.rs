// =============================================================================
// SQLite rule store — read-only access to extracted firm rules
// =============================================================================
//
// The scraper/extraction pipeline owns the write side of this database; the
// monitor only reads. Rules rows are stored as JSON payloads keyed by
// (firm, program_id) with the firm name normalized. Soft rules are advisory
// strings served to the review API.
//
// WAL journal mode and a small pool match the access pattern: many short
// concurrent reads at startup and on review requests.
// =============================================================================

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::errors::StoreError;
use crate::resolver::RuleStore;
use crate::rules::Rules;

/// Rule store backed by a SQLite database file (or `sqlite::memory:`).
#[derive(Clone)]
pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // An in-memory database exists per connection; it must not be pooled.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;

        info!(url, "rule store connected");
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS firm_rules (
                firm        TEXT NOT NULL,
                program_id  TEXT NOT NULL,
                payload     TEXT NOT NULL,
                updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (firm, program_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS soft_rules (
                firm        TEXT NOT NULL,
                program_id  TEXT,
                guidance    TEXT NOT NULL,
                position    INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn lookup_rules(
        &self,
        firm: &str,
        program_id: &str,
    ) -> Result<Option<Rules>, StoreError> {
        let row = sqlx::query("SELECT payload FROM firm_rules WHERE firm = ? AND program_id = ?")
            .bind(firm)
            .bind(program_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.try_get("payload")?;
        let rules: Rules =
            serde_json::from_str(&payload).map_err(|source| StoreError::Malformed {
                firm: firm.to_string(),
                program_id: program_id.to_string(),
                source,
            })?;

        Ok(Some(rules))
    }

    async fn soft_rules(
        &self,
        firm: &str,
        program_id: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        // Firm-wide rows (NULL program_id) apply to every program.
        let rows = match program_id {
            Some(program) => {
                sqlx::query(
                    "SELECT guidance FROM soft_rules \
                     WHERE firm = ? AND (program_id IS NULL OR program_id = ?) \
                     ORDER BY position, rowid",
                )
                .bind(firm)
                .bind(program)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT guidance FROM soft_rules \
                     WHERE firm = ? AND program_id IS NULL \
                     ORDER BY position, rowid",
                )
                .bind(firm)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("guidance").map_err(StoreError::from))
            .collect()
    }
}
