//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 청크 단위로 (본문, 메타데이터, 임베딩)을 저장하고
//! 코사인 유사도 기준 최근접 검색을 제공합니다.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// 저장소 스키마 버전
///
/// 스키마가 바뀌면 올리고, 저장된 값과 다르면 열기에 실패합니다.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// 원본 파일 경로 (정규화된 문자열)
    pub source: String,
    /// 문서 내 청크 순번 (0-based)
    pub chunk_index: usize,
    /// PDF 페이지 번호 (1-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl ChunkMetadata {
    pub fn new(source: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            source: source.into(),
            chunk_index,
            page: None,
        }
    }

    pub fn with_page(mut self, page: Option<usize>) -> Self {
        self.page = page;
        self
    }
}

/// 저장할 청크
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// 검색 결과 청크
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    /// 저장소가 부여한 청크 ID
    pub id: i64,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 모든 벡터는 저장소가 생성될 때 고정된 차원을 가져야 합니다.
/// 차원이 다른 벡터는 `RagError::DimensionMismatch`로 거부됩니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 저장소 연결 확인 (스키마 초기화 포함)
    async fn ping(&self) -> Result<()>;

    /// 청크 삽입, 생성된 ID 반환
    async fn insert(&self, chunk: &NewChunk) -> Result<i64>;

    /// source가 일치하는 모든 청크 삭제, 삭제 개수 반환
    async fn delete_by_source(&self, source: &str) -> Result<usize>;

    /// source의 기존 청크를 새 청크로 교체, 생성된 ID 반환
    ///
    /// 실패하면 기존 청크는 그대로 남아야 합니다.
    async fn replace_source(&self, source: &str, chunks: &[NewChunk]) -> Result<Vec<i64>>;

    /// 저장된 고유 source 목록 (정렬됨)
    async fn list_sources(&self) -> Result<Vec<String>>;

    /// source 존재 여부
    async fn contains_source(&self, source: &str) -> Result<bool>;

    /// 유사도 내림차순 최근접 k개
    async fn nearest(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// 청크 개수
    async fn count(&self) -> Result<usize>;

    /// 모든 데이터 삭제 후 스키마 재생성
    async fn reset(&self) -> Result<()>;

    /// 검색 결과 관련성 피드백 기록
    async fn record_feedback(&self, _query: &str, _chunk_id: i64, _relevant: bool) -> Result<()> {
        Err(RagError::Unsupported {
            backend: self.name(),
            operation: "feedback",
        }
        .into())
    }

    /// 벡터 차원
    fn dimension(&self) -> usize;

    /// 백엔드 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 길이가 다르거나 영벡터가 포함되면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 임베딩을 little-endian f32 바이트로 직렬화
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// little-endian f32 바이트를 임베딩으로 역직렬화
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("Invalid embedding blob length: {}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// 유사도 내림차순 정렬
pub(crate) fn sort_by_similarity(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ============================================================================
// Tests
// ============================================================================
