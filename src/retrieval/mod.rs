//! Retrieval 모듈 - 질의 → 관련 청크
//!
//! - Direct: 질의를 한 번 임베딩하여 top-k 검색
//! - MultiQuery: 질의 확장 → 하위 질의별 top-k → 중복 제거 → 최종 N개
//!
//! 두 전략 모두 후보 전체가 유사도 하한 미만이면 빈 결과를 돌려줍니다.

mod expansion;
mod rerank;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

pub use expansion::{parse_query_list, QueryExpander};
pub use rerank::{
    parse_yes_no, CrossEncoderReranker, LlmRelevanceFilter, Reranker, SimilarityReranker,
};

use crate::config::{RerankMode, RetrievalConfig, RetrievalStrategy};
use crate::embedding::embed_or_empty;
use crate::knowledge::{DocumentStore, ScoredChunk};
use crate::llm::ChatProvider;

/// 검색 결과 청크
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: i64,
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    /// 저장소 코사인 유사도
    pub similarity: f32,
    /// 재정렬 후 점수 (유사도 정렬이면 similarity와 같음)
    pub score: f32,
}

impl From<ScoredChunk> for RetrievedChunk {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            id: chunk.id,
            content: chunk.content,
            source: chunk.metadata.source,
            chunk_index: chunk.metadata.chunk_index,
            page: chunk.metadata.page,
            similarity: chunk.similarity,
            score: chunk.similarity,
        }
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색기
pub struct Retriever {
    store: Arc<DocumentStore>,
    expander: QueryExpander,
    reranker: Box<dyn Reranker>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<DocumentStore>,
        expander: QueryExpander,
        reranker: Box<dyn Reranker>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            expander,
            reranker,
            config,
        }
    }

    /// 설정에 맞는 재정렬기/확장기로 구성
    pub fn from_config(
        store: Arc<DocumentStore>,
        chat: Arc<dyn ChatProvider>,
        config: &RetrievalConfig,
        http_timeout: Duration,
    ) -> Result<Self> {
        let reranker: Box<dyn Reranker> = match config.rerank {
            RerankMode::Similarity => Box::new(SimilarityReranker),
            RerankMode::CrossEncoder => {
                let url = config
                    .cross_encoder_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("cross_encoder_url is required"))?;
                Box::new(CrossEncoderReranker::new(url, http_timeout)?)
            }
            RerankMode::LlmClassifier => Box::new(LlmRelevanceFilter::new(chat.clone())),
        };

        tracing::debug!(
            "Retriever: strategy={:?}, reranker={}",
            config.strategy,
            reranker.name()
        );

        Ok(Self::new(
            store,
            QueryExpander::new(chat, config.max_queries),
            reranker,
            config.clone(),
        ))
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// 질의에 대한 관련 청크 검색
    ///
    /// 빈 결과도 정상입니다 (질의 임베딩 실패, 빈 저장소, 하한 미달).
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let (candidates, limit) = match self.config.strategy {
            RetrievalStrategy::Direct => (self.direct(query).await?, self.config.top_k),
            RetrievalStrategy::MultiQuery => (self.multi_query(query).await?, self.config.final_n),
        };

        if candidates.is_empty() {
            return Ok(vec![]);
        }

        if all_below(&candidates, self.config.min_similarity) {
            tracing::info!(
                "All {} candidates below similarity {:.2}, using no context",
                candidates.len(),
                self.config.min_similarity
            );
            return Ok(vec![]);
        }

        Ok(self.reranker.rerank(query, candidates, limit).await)
    }

    async fn direct(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let embedding = embed_or_empty(self.store.embedder().as_ref(), query).await;
        if embedding.is_empty() {
            tracing::warn!("Query embedding failed, aborting retrieval");
            return Ok(vec![]);
        }

        let results = self.store.nearest(&embedding, self.config.top_k).await?;
        Ok(results.into_iter().map(RetrievedChunk::from).collect())
    }

    async fn multi_query(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let queries = self.expander.expand(query).await;

        let mut all = Vec::new();
        for sub_query in &queries {
            let embedding = embed_or_empty(self.store.embedder().as_ref(), sub_query).await;
            if embedding.is_empty() {
                tracing::warn!("Embedding failed for sub-query {:?}, skipping", sub_query);
                continue;
            }
            let results = self
                .store
                .nearest(&embedding, self.config.per_query_k)
                .await?;
            all.extend(results.into_iter().map(RetrievedChunk::from));
        }

        Ok(dedupe_by_id(all))
    }
}

/// 모든 후보가 하한 미만인지
fn all_below(candidates: &[RetrievedChunk], min_similarity: f32) -> bool {
    candidates.iter().all(|c| c.similarity < min_similarity)
}

/// 청크 ID 기준 중복 제거 (가장 높은 유사도 유지, 첫 등장 순서 보존)
fn dedupe_by_id(chunks: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut unique: Vec<RetrievedChunk> = Vec::new();

    for chunk in chunks {
        match index.get(&chunk.id) {
            Some(&i) => {
                if chunk.similarity > unique[i].similarity {
                    unique[i] = chunk;
                }
            }
            None => {
                index.insert(chunk.id, unique.len());
                unique.push(chunk);
            }
        }
    }
    unique
}

// ============================================================================
// Tests
// ============================================================================
