//! 설정 모듈
//!
//! 모든 컴포넌트가 생성 시점에 주입받는 단일 설정 구조체입니다.
//! 저장 위치: ~/.rag-assistant/config.toml (없으면 기본값)
//!
//! 환경변수 오버라이드:
//! - `OLLAMA_HOST`: Ollama 서버 URL
//! - `RAG_CHAT_MODEL`: 채팅 모델
//! - `RAG_EMBEDDING_MODEL`: 임베딩 모델
//! - `RAG_DATA_DIR`: 데이터 디렉토리

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::knowledge::ChunkConfig;

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.toml";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.rag-assistant/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rag-assistant")
}

// ============================================================================
// Config Sections
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkConfig,
    pub store: StoreConfig,
    pub retrieval: RetrievalConfig,
    pub responder: ResponderConfig,
    pub server: ServerConfig,
}

/// Ollama 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "llama3".to_string(),
            timeout_secs: 120,
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// 벡터 차원 (저장소 스키마에 기록되어 이후 검증에 사용)
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 768 }
    }
}

/// 저장소 백엔드 종류
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Lance,
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// 데이터 디렉토리 (None이면 기본 위치)
    pub data_dir: Option<PathBuf>,
    /// 시작 시 연결 확인 재시도 횟수
    pub connect_retries: u32,
    /// 재시도 간격 (초)
    pub connect_delay_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            data_dir: None,
            connect_retries: 5,
            connect_delay_secs: 5,
        }
    }
}

/// 검색 전략
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// 쿼리 1회 임베딩 후 top-k
    Direct,
    /// 쿼리 확장 + 쿼리별 top-k + 재정렬
    #[default]
    MultiQuery,
}

/// 재정렬 방식
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
    /// 저장된 유사도로 재정렬
    #[default]
    Similarity,
    /// Cross-encoder 엔드포인트로 재채점
    CrossEncoder,
    /// 채팅 모델 yes/no 분류
    LlmClassifier,
}

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub strategy: RetrievalStrategy,
    pub rerank: RerankMode,
    /// Direct 전략의 결과 개수
    pub top_k: usize,
    /// MultiQuery에서 확장 쿼리당 결과 개수
    pub per_query_k: usize,
    /// 재정렬 후 최종 결과 개수
    pub final_n: usize,
    /// 모든 후보가 이 값 미만이면 컨텍스트 없이 응답
    pub min_similarity: f32,
    /// 확장 쿼리 최대 개수
    pub max_queries: usize,
    /// Cross-encoder rerank 엔드포인트 (예: http://localhost:8080)
    pub cross_encoder_url: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::MultiQuery,
            rerank: RerankMode::Similarity,
            top_k: 5,
            per_query_k: 3,
            final_n: 3,
            min_similarity: 0.1,
            max_queries: 5,
            cross_encoder_url: None,
        }
    }
}

/// 응답 생성 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResponderConfig {
    pub system_prompt: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful AI assistant. If provided with context, use it to \
                            answer questions accurately. If no context is provided, answer to the \
                            best of your ability based on your training."
                .to_string(),
        }
    }
}

/// 대시보드 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8501".to_string(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid Ollama URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name for {0} (cannot be empty)")]
    EmptyModel(&'static str),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidDimension(usize),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
    #[error("Invalid retrieval limit {name}: {value} (must be greater than 0)")]
    InvalidLimit { name: &'static str, value: usize },
    #[error("Invalid similarity cutoff: {0} (must be between -1.0 and 1.0)")]
    InvalidCutoff(f32),
    #[error("Cross-encoder reranking requires retrieval.cross_encoder_url")]
    MissingCrossEncoderUrl,
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// 설정 로드
    ///
    /// `path`가 없으면 기본 데이터 디렉토리의 config.toml을 사용합니다.
    /// 파일이 없으면 기본값으로 시작합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => env_data_dir().unwrap_or_else(get_data_dir).join(CONFIG_FILE_NAME),
        };

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env_overrides();
        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// 환경변수 오버라이드 적용
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("OLLAMA_HOST") {
            self.ollama.base_url = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{}", host)
            };
        }
        if let Some(model) = non_empty_env("RAG_CHAT_MODEL") {
            self.ollama.chat_model = model;
        }
        if let Some(model) = non_empty_env("RAG_EMBEDDING_MODEL") {
            self.ollama.embedding_model = model;
        }
        if let Some(dir) = env_data_dir() {
            self.store.data_dir = Some(dir);
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.ollama.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.ollama.base_url.clone()))?;

        if self.ollama.chat_model.trim().is_empty() {
            return Err(ConfigError::EmptyModel("chat"));
        }
        if self.ollama.embedding_model.trim().is_empty() {
            return Err(ConfigError::EmptyModel("embedding"));
        }

        if self.embedding.dimension == 0 || self.embedding.dimension > 8192 {
            return Err(ConfigError::InvalidDimension(self.embedding.dimension));
        }

        self.chunking.validate()?;

        for (name, value) in [
            ("top_k", self.retrieval.top_k),
            ("per_query_k", self.retrieval.per_query_k),
            ("final_n", self.retrieval.final_n),
            ("max_queries", self.retrieval.max_queries),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidLimit { name, value });
            }
        }

        if !(-1.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(ConfigError::InvalidCutoff(self.retrieval.min_similarity));
        }

        if self.retrieval.rerank == RerankMode::CrossEncoder
            && self.retrieval.cross_encoder_url.is_none()
        {
            return Err(ConfigError::MissingCrossEncoderUrl);
        }

        Ok(())
    }

    /// 실제 데이터 디렉토리
    pub fn data_dir(&self) -> PathBuf {
        self.store.data_dir.clone().unwrap_or_else(get_data_dir)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_data_dir() -> Option<PathBuf> {
    non_empty_env("RAG_DATA_DIR").map(PathBuf::from)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.min_similarity, 0.1);
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[embedding]
dimension = 500

[chunking]
chunk_size = 350
overlap = 30

[retrieval]
strategy = "direct"
rerank = "llm_classifier"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.embedding.dimension, 500);
        assert_eq!(config.chunking.chunk_size, 350);
        assert_eq!(config.chunking.overlap, 30);
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::Direct);
        assert_eq!(config.retrieval.rerank, RerankMode::LlmClassifier);
        // 지정하지 않은 섹션은 기본값
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.retrieval.final_n, 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.store.connect_retries, 5);
    }

    #[test]
    fn test_validate_overlap() {
        let mut config = Config::default();
        config.chunking.overlap = config.chunking.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn test_validate_cross_encoder_requires_url() {
        let mut config = Config::default();
        config.retrieval.rerank = RerankMode::CrossEncoder;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCrossEncoderUrl)
        ));

        config.retrieval.cross_encoder_url = Some("http://localhost:8080".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_url() {
        let mut config = Config::default();
        config.ollama.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
