//! SQLite schema for the local store.
//!
//! A `collections` registry records each collection's kind and declared
//! dimension. Every collection gets its own row table, named
//! `c_<name>` with `-` mapped to `_`, plus an FTS5 table over its lexical
//! field. FTS5 keeps diacritics (`remove_diacritics 0`) so its tokens agree
//! with [`sentinelle_core::store::tokenize`]. Reputation tables carry a
//! B-tree index on `user_id`.

use sentinelle_core::schema::{CollectionKind, CollectionSpec};
use sqlx::{SqliteConnection, SqlitePool};

/// Create the registry table. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            vector_name TEXT NOT NULL,
            dims INTEGER NOT NULL,
            distance TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Row table for a collection name.
pub fn table_name(collection: &str) -> String {
    format!("c_{}", collection.replace('-', "_"))
}

/// FTS5 table for a collection name.
pub fn fts_table_name(collection: &str) -> String {
    format!("{}_fts", table_name(collection))
}

/// Create the row table, FTS table and indexes for `spec`. Idempotent.
pub async fn create_collection_tables(
    conn: &mut SqliteConnection,
    spec: &CollectionSpec,
) -> Result<(), sqlx::Error> {
    let table = table_name(&spec.name);
    let fts = fts_table_name(&spec.name);

    let (columns, fts_column) = match spec.kind {
        CollectionKind::Knowledge => (
            "text TEXT NOT NULL, tags_json TEXT NOT NULL DEFAULT '[]'",
            Some("text"),
        ),
        CollectionKind::ToxicImagery => ("caption TEXT NOT NULL, label TEXT NOT NULL", Some("caption")),
        CollectionKind::Reputation => (
            "user_id TEXT NOT NULL, toxicity_score REAL NOT NULL, summary TEXT NOT NULL",
            None,
        ),
    };

    sqlx::query(&format!(
        r#"CREATE TABLE IF NOT EXISTS "{table}" (
            id TEXT PRIMARY KEY,
            vector BLOB NOT NULL,
            {columns}
        )"#
    ))
    .execute(&mut *conn)
    .await?;

    // FTS5 CREATE has no IF NOT EXISTS, so check first
    if let Some(field) = fts_column {
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(&fts)
        .fetch_one(&mut *conn)
        .await?;

        if !fts_exists {
            sqlx::query(&format!(
                r#"CREATE VIRTUAL TABLE "{fts}" USING fts5(record_id UNINDEXED, {field}, tokenize = 'unicode61 remove_diacritics 0')"#
            ))
            .execute(&mut *conn)
            .await?;
        }
    }

    if spec.kind == CollectionKind::Reputation {
        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "idx_{table}_user_id" ON "{table}"(user_id)"#
        ))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(table_name("gbv_knowledge_base"), "c_gbv_knowledge_base");
        assert_eq!(table_name("toxic-imagery"), "c_toxic_imagery");
        assert_eq!(fts_table_name("toxic-imagery"), "c_toxic_imagery_fts");
    }
}
