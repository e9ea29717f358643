//! SQLite Vector Store - rusqlite 기반 청크 저장소
//!
//! 메타데이터는 JSON 텍스트, 임베딩은 little-endian f32 BLOB으로 저장합니다.
//! 최근접 검색은 전체 행 코사인 스캔(brute-force)입니다.
//!
//! 연결은 작업마다 열고 닫습니다. 쓰기는 트랜잭션 안에서 수행되며
//! 에러 시 롤백됩니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::vector::{
    cosine_similarity, decode_embedding, encode_embedding, sort_by_similarity, ChunkMetadata,
    NewChunk, ScoredChunk, VectorStore, SCHEMA_VERSION,
};
use crate::error::RagError;

/// 기본 DB 파일 이름
pub const DB_FILE_NAME: &str = "rag.db";

const META_SCHEMA_VERSION: &str = "schema_version";
const META_DIMENSION: &str = "embedding_dimension";

// ============================================================================
// SqliteVectorStore
// ============================================================================

/// SQLite 벡터 저장소
pub struct SqliteVectorStore {
    db_path: PathBuf,
    dimension: usize,
}

impl SqliteVectorStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// 기존 저장소의 스키마 버전이나 임베딩 차원이 다르면 실패합니다.
    /// 데이터는 절대 암묵적으로 삭제하지 않습니다.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        ensure_parent_dir(path)?;

        let store = Self {
            db_path: path.to_path_buf(),
            dimension,
        };

        let conn = store.connect()?;
        store.initialize(&conn)?;
        Ok(store)
    }

    /// 기존 스키마를 검증하지 않고 삭제 후 `dimension`으로 재생성
    ///
    /// 차원이나 스키마 버전이 맞지 않아 `open`이 실패하는 저장소도 초기화할 수 있습니다.
    pub fn reset_at(path: &Path, dimension: usize) -> Result<Self> {
        ensure_parent_dir(path)?;

        let store = Self {
            db_path: path.to_path_buf(),
            dimension,
        };

        let mut conn = store.connect()?;
        store.recreate(&mut conn)?;
        Ok(store)
    }

    /// 작업 단위 연결 생성
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open SQLite database at {:?}", self.db_path))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        Ok(conn)
    }

    /// 스키마 생성 및 메타데이터 검증
    fn initialize(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_source
                ON chunks(json_extract(metadata, '$.source'));

            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query TEXT NOT NULL,
                chunk_id INTEGER REFERENCES chunks(id) ON DELETE SET NULL,
                is_relevant INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create store schema")?;

        let version = read_meta(conn, META_SCHEMA_VERSION)?;
        let dimension = read_meta(conn, META_DIMENSION)?;

        match (version, dimension) {
            (None, None) => {
                write_meta(conn, META_SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
                write_meta(conn, META_DIMENSION, &self.dimension.to_string())?;
                tracing::info!(
                    "Created store schema v{} (dimension {}) at {:?}",
                    SCHEMA_VERSION,
                    self.dimension,
                    self.db_path
                );
            }
            (version, dimension) => {
                let found = version.unwrap_or_default();
                if found != SCHEMA_VERSION.to_string() {
                    return Err(RagError::SchemaVersion {
                        found,
                        supported: SCHEMA_VERSION,
                    }
                    .into());
                }

                let stored: usize = dimension
                    .as_deref()
                    .unwrap_or_default()
                    .parse()
                    .context("Corrupt embedding_dimension in store_meta")?;
                RagError::check_dimension(stored, self.dimension)?;
            }
        }

        tracing::debug!("SQLite store ready at {:?}", self.db_path);
        Ok(())
    }

    /// 모든 테이블 삭제 후 재생성 (단일 트랜잭션)
    fn recreate(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute_batch(
            r#"
            DROP TABLE IF EXISTS feedback;
            DROP TABLE IF EXISTS chunks;
            DROP TABLE IF EXISTS store_meta;
            "#,
        )
        .context("Failed to drop store tables")?;
        self.initialize(&tx)?;
        tx.commit().context("Failed to commit reset")?;

        tracing::info!("Store reset at {:?} (dimension {})", self.db_path, self.dimension);
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    Ok(())
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to read store_meta")
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .context("Failed to write store_meta")?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn ping(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("SQLite ping failed")?;
        Ok(())
    }

    async fn insert(&self, chunk: &NewChunk) -> Result<i64> {
        RagError::check_dimension(self.dimension, chunk.embedding.len())?;

        let metadata =
            serde_json::to_string(&chunk.metadata).context("Failed to serialize metadata")?;
        let blob = encode_embedding(&chunk.embedding);

        let mut conn = self.connect()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO chunks (content, metadata, embedding) VALUES (?1, ?2, ?3)",
            params![chunk.content, metadata, blob],
        )
        .context("Failed to insert chunk")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit chunk insert")?;

        Ok(id)
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let deleted = tx
            .execute(
                "DELETE FROM chunks WHERE json_extract(metadata, '$.source') = ?1",
                params![source],
            )
            .context("Failed to delete chunks")?;
        tx.commit().context("Failed to commit delete")?;

        tracing::debug!("Deleted {} chunks for {}", deleted, source);
        Ok(deleted)
    }

    async fn replace_source(&self, source: &str, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            RagError::check_dimension(self.dimension, chunk.embedding.len())?;
            let metadata =
                serde_json::to_string(&chunk.metadata).context("Failed to serialize metadata")?;
            rows.push((
                chunk.metadata.chunk_index,
                chunk.content.as_str(),
                metadata,
                encode_embedding(&chunk.embedding),
            ));
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let deleted = tx
            .execute(
                "DELETE FROM chunks WHERE json_extract(metadata, '$.source') = ?1",
                params![source],
            )
            .context("Failed to delete chunks")?;

        let mut ids = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx
                .prepare("INSERT INTO chunks (content, metadata, embedding) VALUES (?1, ?2, ?3)")?;
            for (index, content, metadata, blob) in &rows {
                // 실패한 행만 되돌리고 다음 청크 계속
                match stmt.execute(params![content, metadata, blob]) {
                    Ok(_) => ids.push(tx.last_insert_rowid()),
                    Err(e) => tracing::warn!("Rolled back chunk {} of {}: {}", index, source, e),
                }
            }
        }
        if ids.is_empty() && !rows.is_empty() {
            anyhow::bail!("No chunks of {} could be stored", source);
        }
        tx.commit().context("Failed to commit source replacement")?;

        tracing::debug!(
            "Replaced {} chunks of {} with {}",
            deleted,
            source,
            ids.len()
        );
        Ok(ids)
    }

    async fn list_sources(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT json_extract(metadata, '$.source') AS source
             FROM chunks
             WHERE json_extract(metadata, '$.source') IS NOT NULL
             ORDER BY source",
        )?;

        let sources = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list sources")?;

        Ok(sources)
    }

    async fn contains_source(&self, source: &str) -> Result<bool> {
        let conn = self.connect()?;
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM chunks WHERE json_extract(metadata, '$.source') = ?1)",
                params![source],
                |row| row.get(0),
            )
            .context("Failed to check source")?;
        Ok(exists)
    }

    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        RagError::check_dimension(self.dimension, embedding.len())?;
        if k == 0 {
            return Ok(vec![]);
        }

        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, content, metadata, embedding FROM chunks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, content, metadata, blob) = row?;

            let metadata: ChunkMetadata = match serde_json::from_str(&metadata) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Skipping chunk {} with invalid metadata: {}", id, e);
                    continue;
                }
            };
            let stored = match decode_embedding(&blob) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Skipping chunk {} with invalid embedding: {}", id, e);
                    continue;
                }
            };
            if stored.len() != self.dimension {
                tracing::warn!(
                    "Skipping chunk {} with {}-dim embedding (store is {})",
                    id,
                    stored.len(),
                    self.dimension
                );
                continue;
            }

            results.push(ScoredChunk {
                id,
                content,
                metadata,
                similarity: cosine_similarity(embedding, &stored),
            });
        }

        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .context("Failed to count chunks")?;
        Ok(count as usize)
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.connect()?;
        self.recreate(&mut conn)
    }

    async fn record_feedback(&self, query: &str, chunk_id: i64, relevant: bool) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO feedback (query, chunk_id, is_relevant, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![query, chunk_id, relevant, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to record feedback for chunk {}", chunk_id))?;
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

// ============================================================================
// Tests
// ============================================================================
