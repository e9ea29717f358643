//! Text Chunking Module
//!
//! 문서 텍스트를 고정 크기의 겹치는 문자 윈도우로 분할합니다.
//! 문장/문단 경계는 고려하지 않습니다.
//!
//! 길이 L, 크기 C, 오버랩 O (O < C)일 때 윈도우 수는
//! `ceil((L - O) / (C - O))` (최소 1, L = 0이면 0)입니다.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkConfig {
    /// 윈도우 크기 (문자 수)
    pub chunk_size: usize,
    /// 이웃 윈도우 간 오버랩 (문자 수)
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// 짧은 청크 설정 (문서 디렉토리 일괄 처리용)
    pub fn compact() -> Self {
        Self {
            chunk_size: 350,
            overlap: 30,
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// 윈도우 시작 간격
    fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 여러 하위 문서(PDF 페이지 등)를 순서대로 분할
    fn chunk_documents(&self, documents: &[String]) -> Vec<String> {
        documents.iter().flat_map(|d| self.chunk(d)).collect()
    }

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// WindowChunker
// ============================================================================

/// 문자 기반 슬라이딩 윈도우 청커
pub struct WindowChunker {
    config: ChunkConfig,
}

impl WindowChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        // 바이트가 아닌 문자 단위로 자르기 위해 경계 오프셋 수집
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_count = boundaries.len() - 1;

        if char_count == 0 {
            return vec![];
        }

        let size = self.config.chunk_size.max(1);
        let stride = self.config.stride();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + size).min(char_count);
            chunks.push(text[boundaries[start]..boundaries[end]].to_string());

            if end >= char_count {
                break;
            }
            start += stride;
        }

        tracing::debug!(
            "Chunked {} chars into {} windows (size={}, overlap={})",
            char_count,
            chunks.len(),
            size,
            self.config.overlap
        );

        chunks
    }

    fn name(&self) -> &'static str {
        "WindowChunker"
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정 지정 청커 생성
pub fn window_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(WindowChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
