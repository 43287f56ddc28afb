//! PostgreSQL cache tables
//!
//! Comparisons and ordering use the "C" collation so the key walk follows
//! byte order regardless of the column's collation. When the key column
//! collates differently (the usual `en_US.UTF-8` database default), the
//! primary key index cannot serve the walk and each page sorts the prefix
//! range. A companion index restores index scans:
//!
//! ```sql
//! CREATE INDEX CONCURRENTLY cache_key_c ON cache ("key" COLLATE "C");
//! ```

use super::{quote_table, CacheTable};
use crate::error::Result;
use crate::types::CacheRow;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

/// Effective collation of the key column: its own, else the database default
const COLLATION_SQL: &str = r#"
    SELECT COALESCE(
        (SELECT c.collname::TEXT
         FROM pg_attribute a
         JOIN pg_collation c ON c.oid = a.attcollation
         WHERE a.attrelid = $1::regclass AND a.attname = 'key' AND c.collname <> 'default'),
        (SELECT datcollate::TEXT FROM pg_database WHERE datname = current_database())
    )
"#;

/// A cache table in PostgreSQL
pub struct PgCacheTable {
    pool: PgPool,
    table: String,
    count_sql: String,
    batch_sql: String,
    delete_sql: String,
}

impl PgCacheTable {
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        let table = quote_table(table, '"')?;
        Ok(Self {
            pool,
            count_sql: format!(
                r#"SELECT COUNT(*) FROM {} WHERE left("key", char_length($1)) = $1"#,
                table
            ),
            batch_sql: format!(
                r#"
                SELECT "key", "expiration"::BIGINT
                FROM {}
                WHERE "key" COLLATE "C" > $1
                  AND left("key", char_length($2)) = $2
                ORDER BY "key" COLLATE "C"
                LIMIT $3
                "#,
                table
            ),
            delete_sql: format!(
                r#"DELETE FROM {} WHERE "key" = ANY($1) AND "expiration" <= $2"#,
                table
            ),
            table,
        })
    }

    /// Warn when the key column does not sort bytewise, since the walk then
    /// needs a `COLLATE "C"` index to avoid sorting on every page
    async fn check_key_collation(&self) {
        let collation: Option<String> = match sqlx::query_scalar(COLLATION_SQL)
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await
        {
            Ok(collation) => collation,
            Err(e) => {
                debug!(table = %self.table, error = %e, "Could not determine key collation");
                return;
            }
        };

        if let Some(collation) = collation.filter(|c| !collation_is_bytewise(c)) {
            warn!(
                table = %self.table,
                collation = %collation,
                "Cache key column is not byte-ordered; add an index on (\"key\" COLLATE \"C\") so the key walk can use it"
            );
        }
    }
}

/// Collations whose order equals the byte order of UTF-8 strings
pub(crate) fn collation_is_bytewise(collation: &str) -> bool {
    matches!(collation, "C" | "POSIX" | "ucs_basic" | "pg_c_utf8") || collation.starts_with("C.")
}

#[async_trait]
impl CacheTable for PgCacheTable {
    async fn count_prefixed(&self, prefix: &str) -> Result<u64> {
        self.check_key_collation().await;

        let count: i64 = sqlx::query_scalar(&self.count_sql)
            .bind(prefix)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn next_batch(&self, prefix: &str, after: &str, limit: u32) -> Result<Vec<CacheRow>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&self.batch_sql)
            .bind(after)
            .bind(prefix)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(key, expiration)| CacheRow { key, expiration })
            .collect())
    }

    async fn delete_expired(&self, keys: &[String], now: i64) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(&self.delete_sql)
            .bind(keys)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
