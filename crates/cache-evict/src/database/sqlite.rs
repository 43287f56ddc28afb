//! SQLite cache tables

use super::{quote_table, CacheTable};
use crate::error::Result;
use crate::types::CacheRow;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// A cache table in SQLite, compared with the BINARY collation
pub struct SqliteCacheTable {
    pool: SqlitePool,
    table: String,
    count_sql: String,
    batch_sql: String,
}

impl SqliteCacheTable {
    pub fn new(pool: SqlitePool, table: &str) -> Result<Self> {
        let table = quote_table(table, '"')?;
        Ok(Self {
            pool,
            count_sql: format!(
                r#"SELECT COUNT(*) FROM {} WHERE substr("key", 1, length(?)) = ?"#,
                table
            ),
            batch_sql: format!(
                r#"
                SELECT "key", "expiration"
                FROM {}
                WHERE "key" COLLATE BINARY > ?
                  AND substr("key", 1, length(?)) = ?
                ORDER BY "key" COLLATE BINARY
                LIMIT ?
                "#,
                table
            ),
            table,
        })
    }
}

#[async_trait]
impl CacheTable for SqliteCacheTable {
    async fn count_prefixed(&self, prefix: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&self.count_sql)
            .bind(prefix)
            .bind(prefix)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn next_batch(&self, prefix: &str, after: &str, limit: u32) -> Result<Vec<CacheRow>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(&self.batch_sql)
            .bind(after)
            .bind(prefix)
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

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!(r#"DELETE FROM {} WHERE "key" IN ("#, self.table));
        let mut list = query.separated(", ");
        for key in keys {
            list.push_bind(key.as_str());
        }
        list.push_unseparated(r#") AND "expiration" <= "#);
        query.push_bind(now);

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
