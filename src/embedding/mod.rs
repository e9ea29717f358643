//! 임베딩 모듈 - Ollama를 통한 텍스트 벡터화
//!
//! 로컬 Ollama 서버의 `/api/embed` 엔드포인트로 고정 길이 벡터를 생성합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OllamaEmbedding::new(&config.ollama, 768)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::OllamaConfig;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 서버 연결 확인
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// 실패를 빈 벡터로 변환하는 임베딩 호출
///
/// 호출 실패나 차원 불일치 시 경고를 남기고 빈 벡터를 반환합니다.
/// 수집 경로는 빈 벡터를 건너뛰고, 검색 경로는 질의를 중단합니다.
pub async fn embed_or_empty(provider: &dyn EmbeddingProvider, text: &str) -> Vec<f32> {
    match provider.embed(text).await {
        Ok(embedding) if embedding.len() == provider.dimension() => embedding,
        Ok(embedding) => {
            tracing::warn!(
                "Embedding from {} has {} dimensions, expected {}",
                provider.name(),
                embedding.len(),
                provider.dimension()
            );
            vec![]
        }
        Err(e) => {
            tracing::warn!("Embedding failed ({}): {:#}", provider.name(), e);
            vec![]
        }
    }
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// Ollama 임베딩 구현체
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    base_url: Url,
    model: String,
    client: reqwest::Client,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaEmbedding {
    /// 설정으로 생성
    pub fn new(config: &OllamaConfig, dimension: usize) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid Ollama URL: {}", config.base_url))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            model: config.embedding_model.clone(),
            client,
            dimension,
        })
    }

    /// 모델 이름
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// 에러 응답 본문에서 메시지 추출
pub(crate) fn ollama_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<OllamaError>(body) {
        Ok(e) => format!("Ollama API error ({}): {}", status, e.error),
        Err(_) => format!("Ollama API error ({}): {}", status, body),
    }
}

/// Ollama 서버 연결 확인 (`GET /api/tags`)
pub(crate) async fn ping_ollama(client: &reqwest::Client, base_url: &Url) -> Result<()> {
    let url = base_url
        .join("/api/tags")
        .context("Failed to build ping URL")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Ollama server not reachable at {}", base_url))?;

    if !response.status().is_success() {
        anyhow::bail!("Ollama server at {} returned {}", base_url, response.status());
    }
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Ollama returned no embeddings"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        tracing::debug!(
            "Embedding {} texts with {} at {}",
            texts.len(),
            self.model,
            url
        );

        let response = self
            .client
            .post(url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            anyhow::bail!(ollama_error_message(status, &body));
        }

        let parsed: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        if parsed.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }

        Ok(parsed.embeddings)
    }

    async fn health_check(&self) -> Result<()> {
        ping_ollama(&self.client, &self.base_url).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에서 임베딩 프로바이더 생성
pub fn create_embedder(config: &crate::config::Config) -> Result<OllamaEmbedding> {
    let embedder = OllamaEmbedding::new(&config.ollama, config.embedding.dimension)?;
    tracing::info!(
        "Using Ollama embedding {} (dimension: {})",
        embedder.model(),
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder_for(server: &MockServer, dimension: usize) -> OllamaEmbedding {
        let config = OllamaConfig {
            base_url: server.uri(),
            ..OllamaConfig::default()
        };
        OllamaEmbedding::new(&config, dimension).unwrap()
    }

    #[tokio::test]
    async fn test_embed_single() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(serde_json::json!({
                "model": "nomic-embed-text",
                "input": ["hello"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3]]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3);
        let embedding = embedder.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_batch_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 2);
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(embedder.embed_batch(&texts).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "model \"nomic-embed-text\" not found"
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_embed_or_empty_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 3);
        assert!(embed_or_empty(&embedder, "hello").await.is_empty());
    }

    #[tokio::test]
    async fn test_embed_or_empty_on_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_for(&server, 768);
        assert!(embed_or_empty(&embedder, "hello").await.is_empty());
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": []
            })))
            .mount(&server)
            .await;

        assert!(embedder_for(&server, 3).health_check().await.is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let config = OllamaConfig {
            base_url: "not a url".to_string(),
            ..OllamaConfig::default()
        };
        assert!(OllamaEmbedding::new(&config, 768).is_err());
    }
}
