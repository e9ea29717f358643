//! Document Store - 임베딩 + 벡터 저장소 파사드
//!
//! 본문을 임베딩한 뒤 백엔드에 저장하고, 질의 텍스트로 최근접 청크를 찾습니다.
//! 임베딩은 쓰기 트랜잭션을 열기 전에 끝나므로
//! 모델 호출 동안 트랜잭션이 열려 있지 않습니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::lance::LanceVectorStore;
use super::sqlite::{SqliteVectorStore, DB_FILE_NAME};
use super::vector::{ChunkMetadata, NewChunk, ScoredChunk, VectorStore};
use crate::config::{Config, StoreBackend};
use crate::embedding::{embed_or_empty, EmbeddingProvider};
use crate::error::RagError;

/// LanceDB 디렉토리 이름
pub const LANCE_DIR_NAME: &str = "chunks.lance";

/// 저장소 통계
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub location: PathBuf,
    pub dimension: usize,
    pub chunk_count: usize,
    pub source_count: usize,
}

// ============================================================================
// DocumentStore
// ============================================================================

/// 문서 저장소
pub struct DocumentStore {
    backend: Box<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    location: PathBuf,
}

impl DocumentStore {
    /// 설정에 따라 백엔드를 선택해 열기
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open_backend(config, embedder, false).await
    }

    /// 기존 데이터를 검증 없이 삭제하고 설정된 차원으로 다시 생성
    ///
    /// 임베딩 차원이나 스키마 버전이 바뀌어 `open`이 실패할 때 쓰는 유일한 삭제 경로입니다.
    pub async fn reset_with(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open_backend(config, embedder, true).await
    }

    async fn open_backend(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        reset: bool,
    ) -> Result<Self> {
        let data_dir = config.data_dir();
        let dimension = config.embedding.dimension;

        let (backend, location): (Box<dyn VectorStore>, PathBuf) = match config.store.backend {
            StoreBackend::Sqlite => {
                let path = data_dir.join(DB_FILE_NAME);
                let store = if reset {
                    SqliteVectorStore::reset_at(&path, dimension)?
                } else {
                    SqliteVectorStore::open(&path, dimension)?
                };
                (Box::new(store), path)
            }
            StoreBackend::Lance => {
                let path = data_dir.join(LANCE_DIR_NAME);
                let store = if reset {
                    LanceVectorStore::reset_at(&path, dimension).await?
                } else {
                    LanceVectorStore::open(&path, dimension).await?
                };
                (Box::new(store), path)
            }
        };

        tracing::info!(
            "Opened {} store at {:?} (dimension {})",
            backend.name(),
            location,
            dimension
        );

        Ok(Self::with_backend(backend, embedder, location))
    }

    /// 저장소가 열릴 때까지 재시도하며 연결
    ///
    /// `retries`번까지 `delay` 간격으로 열기와 ping을 시도합니다.
    /// 차원/스키마 불일치는 재시도해도 바뀌지 않으므로 바로 반환합니다.
    pub async fn connect(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        retries: u32,
        delay: Duration,
    ) -> Result<Self> {
        let attempts = retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match Self::open(config, embedder.clone()).await {
                Ok(store) => match store.backend.ping().await {
                    Ok(()) => Ok(store),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(store) => {
                    tracing::debug!("Store ready after {} attempt(s)", attempt);
                    return Ok(store);
                }
                Err(e) if e.downcast_ref::<RagError>().is_some() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Store not ready (attempt {}/{}): {:#}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Store not ready"))
            .context(format!("Store unavailable after {} attempts", attempts)))
    }

    /// 이미 생성된 백엔드로 구성
    pub fn with_backend(
        backend: Box<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        location: PathBuf,
    ) -> Self {
        Self {
            backend,
            embedder,
            location,
        }
    }

    /// 임베딩 프로바이더 참조
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 본문 임베딩 (실패하거나 비어 있으면 None)
    pub async fn embed_chunk(&self, content: &str, metadata: ChunkMetadata) -> Option<NewChunk> {
        let embedding = embed_or_empty(self.embedder.as_ref(), content).await;
        if embedding.is_empty() {
            tracing::warn!(
                "Skipping chunk {} of {}: empty embedding",
                metadata.chunk_index,
                metadata.source
            );
            return None;
        }

        Some(NewChunk {
            content: content.to_string(),
            metadata,
            embedding,
        })
    }

    /// 본문 임베딩 후 저장
    ///
    /// 임베딩이 비어 있으면 `Ok(None)`으로 건너뜁니다.
    pub async fn put(&self, content: &str, metadata: ChunkMetadata) -> Result<Option<i64>> {
        let Some(chunk) = self.embed_chunk(content, metadata).await else {
            return Ok(None);
        };

        match self.backend.insert(&chunk).await {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                tracing::warn!(
                    "Rolled back chunk {} of {}: {:#}",
                    chunk.metadata.chunk_index,
                    chunk.metadata.source,
                    e
                );
                Err(e)
            }
        }
    }

    /// source의 청크를 이미 임베딩된 청크로 교체
    ///
    /// 실패하면 기존 청크가 그대로 남습니다.
    pub async fn replace_source(&self, source: &str, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        self.backend
            .replace_source(source, chunks)
            .await
            .with_context(|| format!("Failed to store chunks for {}", source))
    }

    /// source의 모든 청크 삭제
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        self.backend
            .delete_by_source(source)
            .await
            .with_context(|| format!("Failed to delete chunks for {}", source))
    }

    /// 저장된 source 목록
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        self.backend.list_sources().await
    }

    /// source 존재 여부
    pub async fn contains_source(&self, source: &str) -> Result<bool> {
        self.backend.contains_source(source).await
    }

    /// 벡터로 최근접 검색
    pub async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        self.backend.nearest(embedding, k).await
    }

    /// 질의 텍스트로 최근접 검색
    ///
    /// 질의 임베딩이 실패하면 빈 결과를 반환합니다.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = embed_or_empty(self.embedder.as_ref(), query).await;
        if embedding.is_empty() {
            tracing::warn!("Query embedding failed, returning no results");
            return Ok(vec![]);
        }
        self.nearest(&embedding, k).await
    }

    /// 피드백 기록
    pub async fn record_feedback(&self, query: &str, chunk_id: i64, relevant: bool) -> Result<()> {
        self.backend.record_feedback(query, chunk_id, relevant).await
    }

    /// 모든 데이터 삭제 후 재생성
    pub async fn reset(&self) -> Result<()> {
        self.backend.reset().await
    }

    /// 저장소 통계
    pub async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            backend: self.backend.name(),
            location: self.location.clone(),
            dimension: self.backend.dimension(),
            chunk_count: self.backend.count().await?,
            source_count: self.backend.list_sources().await?.len(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
