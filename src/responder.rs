//! Responder - 검색 컨텍스트로 프롬프트를 구성하고 응답을 스트리밍
//!
//! 메시지 순서: 시스템 지시 → 컨텍스트별 system 메시지 → 사용자 질의.
//! 컨텍스트가 비어 있어도 같은 형태를 유지합니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::llm::{ChatMessage, ChatProvider};
use crate::retrieval::RetrievedChunk;

/// 응답 생성기
pub struct Responder {
    chat: Arc<dyn ChatProvider>,
    system_prompt: String,
}

impl Responder {
    pub fn new(chat: Arc<dyn ChatProvider>, system_prompt: impl Into<String>) -> Self {
        Self {
            chat,
            system_prompt: system_prompt.into(),
        }
    }

    /// 컨텍스트 메시지 본문
    pub fn context_message(chunk: &RetrievedChunk) -> String {
        format!(
            "Relevant context (similarity {:.2}):\n{}",
            chunk.similarity, chunk.content
        )
    }

    /// 채팅 메시지 목록 구성
    pub fn build_messages(&self, query: &str, context: &[RetrievedChunk]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.as_str()));
        messages.extend(
            context
                .iter()
                .map(|c| ChatMessage::system(Self::context_message(c))),
        );
        messages.push(ChatMessage::user(query));
        messages
    }

    /// 응답 조각 스트림
    pub async fn stream(
        &self,
        query: &str,
        context: &[RetrievedChunk],
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let messages = self.build_messages(query, context);
        tracing::debug!(
            "Streaming response with {} context message(s) from {}",
            context.len(),
            self.chat.name()
        );
        self.chat
            .stream_chat(&messages)
            .await
            .context("Failed to start response stream")
    }

    /// 조각을 콜백으로 전달하고 전체 응답 반환
    pub async fn respond<F>(
        &self,
        query: &str,
        context: &[RetrievedChunk],
        mut on_fragment: F,
    ) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let mut rx = self.stream(query, context).await?;
        let mut full = String::new();

        while let Some(fragment) = rx.recv().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            full.push_str(&fragment);
        }

        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::testing::ScriptedChat;

    fn context_chunk(content: &str, similarity: f32) -> RetrievedChunk {
        RetrievedChunk {
            id: 1,
            content: content.to_string(),
            source: "france.txt".to_string(),
            chunk_index: 0,
            page: None,
            similarity,
            score: similarity,
        }
    }

    #[test]
    fn test_build_messages_with_context() {
        let responder = Responder::new(Arc::new(ScriptedChat::new("")), "Be helpful.");
        let context = vec![
            context_chunk("Paris is the capital of France", 0.873),
            context_chunk("France is in Europe", 0.5),
        ];
        let messages = responder.build_messages("capital?", &context);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system("Be helpful."));
        assert_eq!(
            messages[1].content,
            "Relevant context (similarity 0.87):\nParis is the capital of France"
        );
        assert_eq!(messages[2].role, Role::System);
        assert_eq!(messages[3], ChatMessage::user("capital?"));
    }

    #[test]
    fn test_build_messages_without_context() {
        let responder = Responder::new(Arc::new(ScriptedChat::new("")), "Be helpful.");
        let messages = responder.build_messages("hello", &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_respond_forwards_fragments() {
        let chat = Arc::new(ScriptedChat::new("The capital is Paris."));
        let responder = Responder::new(chat, "Be helpful.");

        let mut fragments = Vec::new();
        let full = responder
            .respond("capital?", &[], |f| fragments.push(f.to_string()))
            .await
            .unwrap();

        assert_eq!(full, "The capital is Paris.");
        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), full);
    }

    #[tokio::test]
    async fn test_respond_propagates_chat_error() {
        let responder = Responder::new(Arc::new(ScriptedChat::failing()), "Be helpful.");
        assert!(responder.respond("q", &[], |_| {}).await.is_err());
    }
}
