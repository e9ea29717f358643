//! LLM 모듈 - Ollama 채팅 클라이언트
//!
//! `/api/chat` 엔드포인트를 사용합니다. 스트리밍 응답은 줄 단위 JSON(NDJSON)이며
//! `done: true`로 끝납니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::config::OllamaConfig;
use crate::embedding::ollama_error_message;

/// 스트림 채널 버퍼 크기
const STREAM_BUFFER: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 채팅 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// ChatProvider Trait
// ============================================================================

/// 채팅 모델 트레이트
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 전체 응답을 한 번에 받기
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    /// 응답 조각을 채널로 스트리밍
    ///
    /// 채널은 응답이 끝나면 닫힙니다. 중간 에러는 `Err` 항목으로 전달됩니다.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<mpsc::Receiver<Result<String>>>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Chat
// ============================================================================

/// Ollama 채팅 구현체
#[derive(Debug, Clone)]
pub struct OllamaChat {
    base_url: Url,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// `/api/chat` 응답 (스트리밍 시 한 줄)
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChat {
    /// 설정으로 생성
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid Ollama URL: {}", config.base_url))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            model: config.chat_model.clone(),
            client,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let url = self
            .base_url
            .join("/api/chat")
            .context("Failed to build chat URL")?;

        let response = self
            .client
            .post(url)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream,
            })
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(ollama_error_message(status, &body));
        }

        Ok(response)
    }
}

/// NDJSON 한 줄 파싱
///
/// 반환값: (내용 조각, 종료 여부)
fn parse_line(line: &[u8]) -> Result<(Option<String>, bool)> {
    let line = std::str::from_utf8(line).context("Chat stream is not valid UTF-8")?;
    let line = line.trim();
    if line.is_empty() {
        return Ok((None, false));
    }

    let chunk: ChatChunk =
        serde_json::from_str(line).with_context(|| format!("Invalid chat stream line: {}", line))?;

    if let Some(error) = chunk.error {
        anyhow::bail!("Ollama chat error: {}", error);
    }

    let content = chunk
        .message
        .map(|m| m.content)
        .filter(|c| !c.is_empty());
    Ok((content, chunk.done))
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let chunk: ChatChunk = response
            .json()
            .await
            .context("Failed to parse chat response")?;

        if let Some(error) = chunk.error {
            anyhow::bail!("Ollama chat error: {}", error);
        }

        Ok(chunk.message.map(|m| m.content).unwrap_or_default())
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<mpsc::Receiver<Result<String>>> {
        let response = self.send(messages, true).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            // 네트워크 청크 경계와 줄 경계가 다르므로 버퍼에 누적
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("Chat stream interrupted")))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_line(&line) {
                        Ok((content, done)) => {
                            if let Some(content) = content {
                                if tx.send(Ok(content)).await.is_err() {
                                    return;
                                }
                            }
                            if done {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // 마지막 줄에 개행이 없는 경우
            match parse_line(&buffer) {
                Ok((Some(content), _)) => {
                    let _ = tx.send(Ok(content)).await;
                }
                Ok((None, _)) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 설정에서 채팅 프로바이더 생성
pub fn create_chat(config: &crate::config::Config) -> Result<OllamaChat> {
    let chat = OllamaChat::new(&config.ollama)?;
    tracing::info!("Using Ollama chat model {}", chat.name());
    Ok(chat)
}

// ============================================================================
// Tests
// ============================================================================
