//! MySQL cache tables
//!
//! Cache tables are usually created with a case-insensitive, PAD SPACE
//! collation (`utf8mb4_unicode_ci` and friends), under which `'A:' = 'a:'`
//! and `'k ' = 'k'`. Every comparison here therefore casts to `BINARY`,
//! which compares the UTF-8 bytes exactly. Binary comparisons cannot use the
//! key index, so each page scans the store's rows.

use super::{quote_table, CacheTable};
use crate::error::Result;
use crate::types::CacheRow;
use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};

/// A cache table in MySQL or MariaDB
pub struct MySqlCacheTable {
    pool: MySqlPool,
    table: String,
    count_sql: String,
    batch_sql: String,
}

impl MySqlCacheTable {
    pub fn new(pool: MySqlPool, table: &str) -> Result<Self> {
        let table = quote_table(table, '`')?;
        Ok(Self {
            pool,
            count_sql: format!(
                "SELECT COUNT(*) FROM {} \
                 WHERE CAST(LEFT(`key`, CHAR_LENGTH(?)) AS BINARY) = CAST(? AS BINARY)",
                table
            ),
            batch_sql: format!(
                r#"
                SELECT `key`, CAST(`expiration` AS SIGNED)
                FROM {}
                WHERE CAST(`key` AS BINARY) > CAST(? AS BINARY)
                  AND CAST(LEFT(`key`, CHAR_LENGTH(?)) AS BINARY) = CAST(? AS BINARY)
                ORDER BY CAST(`key` AS BINARY)
                LIMIT ?
                "#,
                table
            ),
            table,
        })
    }
}

#[async_trait]
impl CacheTable for MySqlCacheTable {
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

        // The plain list can use the primary key; the binary one drops rows
        // that only match through case folding or trailing-space padding.
        let mut query: QueryBuilder<MySql> =
            QueryBuilder::new(format!("DELETE FROM {} WHERE `key` IN (", self.table));
        let mut list = query.separated(", ");
        for key in keys {
            list.push_bind(key.as_str());
        }
        list.push_unseparated(") AND CAST(`key` AS BINARY) IN (");
        let mut exact = query.separated(", ");
        for key in keys {
            exact.push("CAST(");
            exact.push_bind_unseparated(key.as_str());
            exact.push_unseparated(" AS BINARY)");
        }
        exact.push_unseparated(") AND `expiration` <= ");
        query.push_bind(now);

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
