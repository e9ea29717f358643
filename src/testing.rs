//! 테스트 전용 대역(test double)
//!
//! - `HashEmbedding`: 단어 해시 기반 결정적 임베딩
//! - `ScriptedChat`: 규칙에 따라 고정 응답을 돌려주는 채팅 모델

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::embedding::EmbeddingProvider;
use crate::llm::{ChatMessage, ChatProvider};

// ============================================================================
// HashEmbedding
// ============================================================================

/// 단어 빈도를 해시 버킷에 누적하는 임베딩
///
/// 공통 단어가 많은 텍스트끼리 코사인 유사도가 높습니다.
pub struct HashEmbedding {
    dimension: usize,
    fail: bool,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail: false,
        }
    }

    /// 항상 실패하는 임베딩
    pub fn failing(dimension: usize) -> Self {
        Self {
            dimension,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            anyhow::bail!("embedding backend unavailable");
        }

        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// ScriptedChat
// ============================================================================

/// 마지막 메시지 내용에 포함된 키워드로 응답을 고르는 채팅 모델
pub struct ScriptedChat {
    rules: Vec<(String, String)>,
    fallback: String,
    fail: bool,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.into(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 항상 실패하는 채팅 모델
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    /// 마지막 메시지에 `needle`이 있으면 `reply`로 응답
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// 지금까지 받은 메시지 목록
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn reply_for(&self, messages: &[ChatMessage]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        if self.fail {
            anyhow::bail!("chat backend unavailable");
        }

        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| last.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.reply_for(messages)
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<mpsc::Receiver<Result<String>>> {
        let reply = self.reply_for(messages)?;
        let (tx, rx) = mpsc::channel(reply.len().max(1));
        for word in reply.split_inclusive(' ') {
            let _ = tx.send(Ok(word.to_string())).await;
        }
        Ok(rx)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
