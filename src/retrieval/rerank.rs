//! 재정렬 / 관련성 필터
//!
//! 검색 후보를 다시 정렬하거나 걸러냅니다. 구현체:
//! - `SimilarityReranker`: 저장된 유사도 순 (결정적)
//! - `CrossEncoderReranker`: HTTP rerank 엔드포인트 점수 순
//! - `LlmRelevanceFilter`: 채팅 모델에 후보별 yes/no 질의

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::RetrievedChunk;
use crate::llm::{ChatMessage, ChatProvider};

const RELEVANCE_INSTRUCTION: &str = "Determine if the given context is directly related to the query. Respond with only 'yes' or 'no'.";

// ============================================================================
// Reranker Trait
// ============================================================================

/// 재정렬기 트레이트
#[async_trait]
pub trait Reranker: Send + Sync {
    /// 후보를 재정렬(또는 필터링)하여 최대 `top_n`개 반환
    ///
    /// 각 결과의 `score`는 최종 정렬 기준 값입니다.
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Vec<RetrievedChunk>;

    fn name(&self) -> &'static str;
}

/// 유사도 내림차순 정렬 후 top_n
fn by_similarity(mut candidates: Vec<RetrievedChunk>, top_n: usize) -> Vec<RetrievedChunk> {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_n);
    for c in &mut candidates {
        c.score = c.similarity;
    }
    candidates
}

// ============================================================================
// SimilarityReranker
// ============================================================================

/// 저장된 유사도로 정렬
#[derive(Debug, Default)]
pub struct SimilarityReranker;

#[async_trait]
impl Reranker for SimilarityReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Vec<RetrievedChunk> {
        by_similarity(candidates, top_n)
    }

    fn name(&self) -> &'static str {
        "similarity"
    }
}

// ============================================================================
// CrossEncoderReranker
// ============================================================================

/// HTTP cross-encoder 재정렬기
///
/// `POST {url}/rerank` `{query, texts}` → `[{index, score}]`
pub struct CrossEncoderReranker {
    endpoint: Url,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

impl CrossEncoderReranker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid cross-encoder URL: {}", base_url))?;
        let endpoint = base.join("rerank").context("Failed to build rerank URL")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { endpoint, client })
    }

    async fn score(&self, query: &str, candidates: &[RetrievedChunk]) -> Result<Vec<RerankScore>> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RerankRequest {
                query,
                texts: candidates.iter().map(|c| c.content.as_str()).collect(),
            })
            .send()
            .await
            .context("Failed to send rerank request")?;

        if !response.status().is_success() {
            anyhow::bail!("Rerank endpoint returned {}", response.status());
        }

        response
            .json::<Vec<RerankScore>>()
            .await
            .context("Failed to parse rerank response")
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Vec<RetrievedChunk> {
        if candidates.is_empty() {
            return candidates;
        }

        let scores = match self.score(query, &candidates).await {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!("Cross-encoder rerank failed, using similarity order: {:#}", e);
                return by_similarity(candidates, top_n);
            }
        };

        let mut slots: Vec<Option<RetrievedChunk>> = candidates.into_iter().map(Some).collect();
        let mut ranked: Vec<RetrievedChunk> = Vec::new();
        for s in scores {
            if let Some(mut chunk) = slots.get_mut(s.index).and_then(Option::take) {
                chunk.score = s.score;
                ranked.push(chunk);
            }
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(top_n);
        ranked
    }

    fn name(&self) -> &'static str {
        "cross_encoder"
    }
}

// ============================================================================
// LlmRelevanceFilter
// ============================================================================

/// 채팅 모델 yes/no 관련성 필터
///
/// "yes"로 시작하는 답만 관련 있음으로 간주합니다.
/// 에러나 해석할 수 없는 답은 관련 없음입니다.
pub struct LlmRelevanceFilter {
    chat: Arc<dyn ChatProvider>,
}

impl LlmRelevanceFilter {
    pub fn new(chat: Arc<dyn ChatProvider>) -> Self {
        Self { chat }
    }

    fn build_messages(query: &str, context: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(RELEVANCE_INSTRUCTION),
            ChatMessage::user(format!("Query: {}\nContext: {}", query, context)),
        ]
    }

    async fn is_relevant(&self, query: &str, context: &str) -> bool {
        match self.chat.chat(&Self::build_messages(query, context)).await {
            Ok(answer) => parse_yes_no(&answer).unwrap_or(false),
            Err(e) => {
                tracing::warn!("Relevance classification failed: {:#}", e);
                false
            }
        }
    }
}

/// yes/no 답 해석
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    let word: String = answer
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase();

    match word.as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

#[async_trait]
impl Reranker for LlmRelevanceFilter {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Vec<RetrievedChunk> {
        let mut kept = Vec::new();
        for candidate in by_similarity(candidates, usize::MAX) {
            if self.is_relevant(query, &candidate.content).await {
                kept.push(candidate);
                if kept.len() >= top_n {
                    break;
                }
            } else {
                tracing::debug!("Filtered out chunk {} as not relevant", candidate.id);
            }
        }
        kept
    }

    fn name(&self) -> &'static str {
        "llm_classifier"
    }
}

// ============================================================================
// Tests
// ============================================================================
