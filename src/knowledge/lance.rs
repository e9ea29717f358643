//! LanceDB Vector Store - 선택형 벡터 저장소 백엔드
//!
//! 테이블 이름에 스키마 버전을 포함합니다 (`chunks_v1`).
//! 코사인 거리로 검색하며 유사도는 `1 - distance`입니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::DistanceType;

use super::vector::{ChunkMetadata, NewChunk, ScoredChunk, VectorStore, SCHEMA_VERSION};
use crate::error::RagError;

/// 테이블 이름 접두사
const TABLE_PREFIX: &str = "chunks_v";

fn table_name() -> String {
    format!("{}{}", TABLE_PREFIX, SCHEMA_VERSION)
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: usize,
    next_id: AtomicI64,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        let db = connect(path).await?;

        let store = Self {
            db,
            dimension,
            next_id: AtomicI64::new(1),
        };

        store.ensure_table().await?;
        let max_id = store.max_id().await?;
        store.next_id.store(max_id + 1, Ordering::SeqCst);

        Ok(store)
    }

    /// 기존 청크 테이블(모든 버전)을 검증 없이 삭제한 뒤 `dimension`으로 열기
    pub async fn reset_at(path: &Path, dimension: usize) -> Result<Self> {
        let db = connect(path).await?;
        drop_chunk_tables(&db).await?;
        tracing::info!("LanceDB store reset at {:?} (dimension {})", path, dimension);

        Self::open(path, dimension).await
    }

    /// 청크 테이블 스키마
    fn create_schema(dimension: usize) -> Result<SchemaRef> {
        let list_size = i32::try_from(dimension).context("Embedding dimension too large")?;
        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    list_size,
                ),
                false,
            ),
        ])))
    }

    /// 테이블이 없으면 생성, 있으면 스키마 검증
    async fn ensure_table(&self) -> Result<()> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list LanceDB tables")?;

        let current = table_name();
        if names.contains(&current) {
            let table = self.open_table().await?;
            let schema = table.schema().await.context("Failed to read table schema")?;
            let stored = schema
                .field_with_name("embedding")
                .ok()
                .and_then(|f| match f.data_type() {
                    DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                    _ => None,
                })
                .ok_or_else(|| anyhow::anyhow!("Missing embedding column in {}", current))?;
            RagError::check_dimension(stored, self.dimension)?;
            return Ok(());
        }

        if let Some(other) = names.iter().find(|n| n.starts_with(TABLE_PREFIX)) {
            return Err(RagError::SchemaVersion {
                found: other.trim_start_matches(TABLE_PREFIX).to_string(),
                supported: SCHEMA_VERSION,
            }
            .into());
        }

        self.db
            .create_empty_table(&current, Self::create_schema(self.dimension)?)
            .execute()
            .await
            .context("Failed to create chunk table")?;

        tracing::info!(
            "Created LanceDB table {} (dimension {})",
            current,
            self.dimension
        );
        Ok(())
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(table_name())
            .execute()
            .await
            .context("Failed to open chunk table")
    }

    /// 현재 최대 ID (없으면 0)
    async fn max_id(&self) -> Result<i64> {
        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["id"]))
            .execute()
            .await
            .context("Failed to scan ids")?
            .try_collect()
            .await?;

        let mut max_id = 0;
        for batch in &batches {
            let ids = int64_column(batch, "id")?;
            for i in 0..ids.len() {
                max_id = max_id.max(ids.value(i));
            }
        }
        Ok(max_id)
    }

    /// 청크들을 Arrow RecordBatch로 변환 (ID는 `first_id`부터 연속)
    fn chunks_to_batch(&self, first_id: i64, chunks: &[NewChunk]) -> Result<RecordBatch> {
        let mut ids = Vec::with_capacity(chunks.len());
        let mut sources = Vec::with_capacity(chunks.len());
        let mut indexes = Vec::with_capacity(chunks.len());
        let mut contents = Vec::with_capacity(chunks.len());
        let mut metadata = Vec::with_capacity(chunks.len());
        let mut values = Vec::with_capacity(chunks.len() * self.dimension);

        for (id, chunk) in (first_id..).zip(chunks) {
            RagError::check_dimension(self.dimension, chunk.embedding.len())?;
            ids.push(id);
            sources.push(chunk.metadata.source.as_str());
            indexes.push(
                i32::try_from(chunk.metadata.chunk_index).context("chunk_index out of range")?,
            );
            contents.push(chunk.content.as_str());
            metadata.push(
                serde_json::to_string(&chunk.metadata).context("Failed to serialize metadata")?,
            );
            values.extend_from_slice(&chunk.embedding);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            i32::try_from(self.dimension).context("Embedding dimension too large")?,
            Arc::new(Float32Array::from(values)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Self::create_schema(self.dimension)?,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(Int32Array::from(indexes)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 배치 추가, 첫 ID 반환
    async fn add_chunks(&self, chunks: &[NewChunk]) -> Result<i64> {
        let count = i64::try_from(chunks.len()).context("Too many chunks")?;
        let first_id = self.next_id.fetch_add(count, Ordering::SeqCst);
        let batch = self.chunks_to_batch(first_id, chunks)?;
        let schema = batch.schema();

        let table = self.open_table().await?;
        table
            .add(RecordBatchIterator::new(vec![Ok(batch)], schema))
            .execute()
            .await
            .context("Failed to add chunks to table")?;

        Ok(first_id)
    }
}

async fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create LanceDB directory")?;
        }
    }

    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

    lancedb::connect(path_str)
        .execute()
        .await
        .context("Failed to connect to LanceDB")
}

/// `chunks_v*` 테이블 전부 삭제
async fn drop_chunk_tables(db: &Connection) -> Result<()> {
    let names = db
        .table_names()
        .execute()
        .await
        .context("Failed to list LanceDB tables")?;

    for name in names.iter().filter(|n| n.starts_with(TABLE_PREFIX)) {
        db.drop_table(name)
            .await
            .with_context(|| format!("Failed to drop table {}", name))?;
        tracing::debug!("Dropped LanceDB table {}", name);
    }
    Ok(())
}

/// 필터 문자열 리터럴 이스케이프
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn ping(&self) -> Result<()> {
        self.db
            .table_names()
            .execute()
            .await
            .context("LanceDB ping failed")?;
        Ok(())
    }

    async fn insert(&self, chunk: &NewChunk) -> Result<i64> {
        RagError::check_dimension(self.dimension, chunk.embedding.len())?;
        self.add_chunks(std::slice::from_ref(chunk)).await
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let table = self.open_table().await?;
        let filter = format!("source = '{}'", escape_literal(source));

        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for source")?;
        if before == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .context("Failed to delete chunks")?;

        tracing::debug!("Deleted {} chunks for {}", before, source);
        Ok(before)
    }

    async fn replace_source(&self, source: &str, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        if chunks.is_empty() {
            self.delete_by_source(source).await?;
            return Ok(vec![]);
        }

        // 새 청크를 먼저 추가하고, 성공하면 이전 ID의 청크만 삭제
        let first_id = self.add_chunks(chunks).await?;
        let table = self.open_table().await?;
        table
            .delete(&format!(
                "source = '{}' AND id < {}",
                escape_literal(source),
                first_id
            ))
            .await
            .context("Failed to delete replaced chunks")?;

        let count = i64::try_from(chunks.len()).context("Too many chunks")?;
        Ok((first_id..first_id + count).collect())
    }

    async fn list_sources(&self) -> Result<Vec<String>> {
        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["source"]))
            .execute()
            .await
            .context("Failed to scan sources")?
            .try_collect()
            .await?;

        let mut sources = BTreeSet::new();
        for batch in &batches {
            let column = string_column(batch, "source")?;
            for i in 0..column.len() {
                sources.insert(column.value(i).to_string());
            }
        }
        Ok(sources.into_iter().collect())
    }

    async fn contains_source(&self, source: &str) -> Result<bool> {
        let table = self.open_table().await?;
        let filter = format!("source = '{}'", escape_literal(source));
        let count = table
            .count_rows(Some(filter))
            .await
            .context("Failed to count rows for source")?;
        Ok(count > 0)
    }

    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        RagError::check_dimension(self.dimension, embedding.len())?;
        if k == 0 {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut results = Vec::new();
        for batch in &batches {
            let ids = int64_column(batch, "id")?;
            let contents = string_column(batch, "content")?;
            let metadata = string_column(batch, "metadata")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let meta: ChunkMetadata = match serde_json::from_str(metadata.value(i)) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(
                            "Skipping chunk {} with invalid metadata: {}",
                            ids.value(i),
                            e
                        );
                        continue;
                    }
                };
                results.push(ScoredChunk {
                    id: ids.value(i),
                    content: contents.value(i).to_string(),
                    metadata: meta,
                    similarity: 1.0 - distances.value(i),
                });
            }
        }

        super::vector::sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        let table = self.open_table().await?;
        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    async fn reset(&self) -> Result<()> {
        drop_chunk_tables(&self.db).await?;
        self.ensure_table().await?;
        self.next_id.store(1, Ordering::SeqCst);

        tracing::info!("LanceDB table {} reset", table_name());
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "lance"
    }
}

// ============================================================================
// Tests
// ============================================================================
