//! PostgreSQL + pgvector adapter.
//!
//! Rows are keyed by the natural `(url, chunk_index)` pair; upserts use
//! `ON CONFLICT` on that key. Embeddings travel as pgvector literal strings
//! (`[x1,x2,…]`) cast to `vector` inside SQL, so no driver-side vector type
//! is needed. Filtered vector search runs server-side: cosine distance via
//! `<=>` plus a `metadata @> $filter` containment predicate. Keyword search
//! is a server-side `ILIKE` scan (this adapter's documented choice).
//!
//! Schema creation is idempotent and runs at `initialize`.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::models::{ChunkHit, CodeExample, DocumentChunk, SourceRecord};

use super::{check_chunk_dims, check_code_dims, MetadataFilter, StoreError, VectorStore};

pub struct PgVectorStore {
    pool: PgPool,
    dims: usize,
}

/// Serialize a vector to the pgvector literal format: `[x1,x2,…]`.
fn vector_literal(v: &[f32]) -> String {
    let inner: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", inner.join(","))
}

impl PgVectorStore {
    pub async fn connect(database_url: &str, dims: usize) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("postgres unreachable: {}", e)))?;
        Ok(Self { pool, dims })
    }

    fn row_to_hit(row: &sqlx::postgres::PgRow, score: f64) -> ChunkHit {
        let metadata: serde_json::Value = row.get("metadata");
        let chunk_index: i32 = row.get("chunk_index");
        ChunkHit {
            id: row.get::<uuid::Uuid, _>("id").to_string(),
            url: row.get("url"),
            chunk_index: chunk_index as usize,
            content: row.get("content"),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            source_id: row.get("source_id"),
            score,
            rerank_score: None,
        }
    }

    async fn dense_search(
        &self,
        table: &str,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        if query_embedding.len() != self.dims {
            return Err(StoreError::Rejected(format!(
                "query dimension mismatch: got {}, collection expects {}",
                query_embedding.len(),
                self.dims
            )));
        }

        let filter_json = filter_metadata
            .filter(|f| !f.is_empty())
            .map(|f| serde_json::Value::Object(f.clone()));

        let sql = format!(
            "SELECT id, url, chunk_index, content, metadata, source_id, \
                    1 - (embedding <=> $1::vector) AS similarity \
             FROM {} \
             WHERE $2::jsonb IS NULL OR metadata @> $2::jsonb \
             ORDER BY embedding <=> $1::vector \
             LIMIT $3",
            table
        );

        let rows = sqlx::query(&sql)
            .bind(vector_literal(query_embedding))
            .bind(filter_json)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let similarity: f64 = row.get("similarity");
                Self::row_to_hit(row, similarity.clamp(0.0, 1.0))
            })
            .collect())
    }

    async fn keyword_search(
        &self,
        table: &str,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let sql = format!(
            "SELECT id, url, chunk_index, content, metadata, source_id \
             FROM {} \
             WHERE content ILIKE '%' || $1 || '%' \
               AND ($2::text IS NULL OR source_id = $2) \
             ORDER BY url, chunk_index \
             LIMIT $3",
            table
        );

        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(source)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| Self::row_to_hit(row, 1.0)).collect())
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::Rejected(format!(
                    "could not enable pgvector extension (is it installed?): {}",
                    e
                ))
            })?;

        for table in ["crawled_pages", "code_examples"] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    url TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    embedding vector({dims}) NOT NULL,
                    metadata JSONB NOT NULL DEFAULT '{{}}',
                    source_id TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE(url, chunk_index)
                )",
                table = table,
                dims = self.dims
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_url ON {table}(url)",
                table = table
            ))
            .execute(&self.pool)
            .await?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_source ON {table}(source_id)",
                table = table
            ))
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sources (
                source_id TEXT PRIMARY KEY,
                summary TEXT NOT NULL DEFAULT '',
                total_words BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        // HNSW needs pgvector >= 0.5; degrade to a sequential scan if absent.
        for table in ["crawled_pages", "code_examples"] {
            if let Err(e) = sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_embedding \
                 ON {table} USING hnsw (embedding vector_cosine_ops)",
                table = table
            ))
            .execute(&self.pool)
            .await
            {
                tracing::warn!(table, error = %e, "could not create HNSW index");
            }
        }

        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError> {
        check_chunk_dims(chunks, self.dims)?;
        if chunks.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for c in chunks {
            let id = crate::models::point_id(&DocumentChunk::natural_key(
                &c.source_id,
                &c.url,
                c.chunk_index,
            ));
            sqlx::query(
                "INSERT INTO crawled_pages (id, url, chunk_index, content, embedding, metadata, source_id)
                 VALUES ($1, $2, $3, $4, $5::vector, $6, $7)
                 ON CONFLICT (url, chunk_index) DO UPDATE SET
                     content = excluded.content,
                     embedding = excluded.embedding,
                     metadata = excluded.metadata,
                     source_id = excluded.source_id",
            )
            .bind(id)
            .bind(&c.url)
            .bind(c.chunk_index as i32)
            .bind(&c.content)
            .bind(vector_literal(&c.embedding))
            .bind(serde_json::Value::Object(c.metadata.clone()))
            .bind(&c.source_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks_by_url(&self, url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM crawled_pages WHERE url = $1")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_chunks(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.dense_search("crawled_pages", query_embedding, k, filter_metadata)
            .await
    }

    async fn keyword_search_chunks(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.keyword_search("crawled_pages", query, k, source).await
    }

    async fn upsert_code_examples(&self, examples: &[CodeExample]) -> Result<(), StoreError> {
        check_code_dims(examples, self.dims)?;
        if examples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for c in examples {
            let id = crate::models::point_id(&format!(
                "{}|{}|code:{}",
                c.source_id, c.url, c.code_index
            ));
            let mut metadata = c.metadata.clone();
            metadata.insert("summary".into(), c.summary.clone().into());
            if let Some(ref lang) = c.language {
                metadata.insert("language".into(), lang.clone().into());
            }
            metadata.insert(
                "surrounding_context".into(),
                c.surrounding_context.clone().into(),
            );

            sqlx::query(
                "INSERT INTO code_examples (id, url, chunk_index, content, embedding, metadata, source_id)
                 VALUES ($1, $2, $3, $4, $5::vector, $6, $7)
                 ON CONFLICT (url, chunk_index) DO UPDATE SET
                     content = excluded.content,
                     embedding = excluded.embedding,
                     metadata = excluded.metadata,
                     source_id = excluded.source_id",
            )
            .bind(id)
            .bind(&c.url)
            .bind(c.code_index as i32)
            .bind(&c.code)
            .bind(vector_literal(&c.embedding))
            .bind(serde_json::Value::Object(metadata))
            .bind(&c.source_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_code_examples_by_url(&self, url: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM code_examples WHERE url = $1")
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_code_examples(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter_metadata: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.dense_search("code_examples", query_embedding, k, filter_metadata)
            .await
    }

    async fn keyword_search_code_examples(
        &self,
        query: &str,
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        self.keyword_search("code_examples", query, k, source).await
    }

    async fn total_words(&self, source_id: &str) -> Result<usize, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM((metadata->>'word_count')::bigint), 0) AS total \
             FROM crawled_pages WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.get("total");
        Ok(total.max(0) as usize)
    }

    async fn get_sources(&self) -> Result<Vec<SourceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT source_id, summary, total_words, created_at, updated_at \
             FROM sources ORDER BY source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let total_words: i64 = row.get("total_words");
                SourceRecord {
                    source_id: row.get("source_id"),
                    summary: row.get("summary"),
                    total_words: total_words.max(0) as usize,
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                }
            })
            .collect())
    }

    async fn upsert_source(
        &self,
        source_id: &str,
        summary: &str,
        total_words: usize,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sources (source_id, summary, total_words)
             VALUES ($1, $2, $3)
             ON CONFLICT (source_id) DO UPDATE SET
                 summary = excluded.summary,
                 total_words = excluded.total_words,
                 updated_at = NOW()",
        )
        .bind(source_id)
        .bind(summary)
        .bind(total_words as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal_format() {
        assert_eq!(vector_literal(&[1.0, 2.5, -0.5]), "[1,2.5,-0.5]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn test_vector_literal_roundtrip_shape() {
        let s = vector_literal(&[0.125, -3.0]);
        assert!(s.starts_with('[') && s.ends_with(']'));
        assert_eq!(s.matches(',').count(), 1);
    }
}
