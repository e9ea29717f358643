//! Assistant - 수집/삭제/목록/질의 핵심 연산
//!
//! CLI와 대시보드 서버는 모두 이 구조체 하나를 감싸는 어댑터입니다.
//!
//! 수집 경로: 로더 → 청커 → 저장소(임베딩 포함)
//! 질의 경로: 질의 → 검색기(확장/재정렬/하한) → 응답기

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::collector::{normalize_path, source_key, FileCollector};
use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::extractor::{load_bytes, load_document, LoadedPage};
use crate::knowledge::{window_chunker, ChunkMetadata, Chunker, DocumentStore, ScoredChunk};
use crate::knowledge::SCHEMA_VERSION;
use crate::llm::{create_chat, ChatProvider};
use crate::responder::Responder;
use crate::retrieval::{RetrievedChunk, Retriever};

// ============================================================================
// Reports
// ============================================================================

/// 단일 문서 수집 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source: String,
    /// 생성된 청크 수
    pub total: usize,
    /// 저장된 청크 수
    pub stored: usize,
    /// 임베딩/저장 실패로 건너뛴 청크 수
    pub skipped: usize,
    /// 이미 저장되어 있어 수집하지 않음
    pub already_present: bool,
}

impl IngestReport {
    fn already_present(source: String) -> Self {
        Self {
            source,
            total: 0,
            stored: 0,
            skipped: 0,
            already_present: true,
        }
    }
}

/// 폴더 수집 결과
#[derive(Debug, Default, Serialize)]
pub struct DirectoryReport {
    pub ingested: Vec<IngestReport>,
    pub failed: Vec<(PathBuf, String)>,
}

/// 질의 응답
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub context: Vec<RetrievedChunk>,
}

/// 상태 정보
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub data_dir: PathBuf,
    pub backend: &'static str,
    pub location: PathBuf,
    pub schema_version: u32,
    pub dimension: usize,
    pub chunk_count: usize,
    pub source_count: usize,
    pub embedding_model: String,
    pub chat_model: String,
    pub ollama_reachable: bool,
}

// ============================================================================
// Assistant
// ============================================================================

/// RAG 어시스턴트
pub struct Assistant {
    config: Config,
    store: Arc<DocumentStore>,
    chunker: Box<dyn Chunker>,
    collector: FileCollector,
    retriever: Retriever,
    responder: Responder,
}

impl Assistant {
    /// 설정으로 Ollama 클라이언트와 저장소를 만들고 준비될 때까지 대기
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(create_embedder(&config)?);
        let chat: Arc<dyn ChatProvider> = Arc::new(create_chat(&config)?);

        let store = DocumentStore::connect(
            &config,
            embedder,
            config.store.connect_retries,
            Duration::from_secs(config.store.connect_delay_secs),
        )
        .await
        .context("Failed to open document store")?;

        Self::with_components(config, Arc::new(store), chat)
    }

    /// 저장소를 열지 않고 모든 데이터 삭제
    ///
    /// 임베딩 차원이나 스키마 버전이 바뀌어 `from_config`가 실패해도 동작합니다.
    pub async fn reset_store(config: &Config) -> Result<()> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(create_embedder(config)?);
        DocumentStore::reset_with(config, embedder)
            .await
            .context("Failed to reset document store")?;
        Ok(())
    }

    /// 이미 구성된 저장소와 채팅 모델로 생성
    pub fn with_components(
        config: Config,
        store: Arc<DocumentStore>,
        chat: Arc<dyn ChatProvider>,
    ) -> Result<Self> {
        let retriever = Retriever::from_config(
            store.clone(),
            chat.clone(),
            &config.retrieval,
            Duration::from_secs(config.ollama.timeout_secs),
        )?;
        let responder = Responder::new(chat, config.responder.system_prompt.clone());

        Ok(Self {
            chunker: window_chunker(config.chunking.clone()),
            collector: FileCollector::with_defaults(),
            config,
            store,
            retriever,
            responder,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    /// 파일 수집
    ///
    /// 이미 저장된 파일은 `force`가 아니면 건너뜁니다.
    /// `force`면 새 청크가 준비된 뒤에 기존 청크와 교체합니다.
    pub async fn ingest_file(&self, path: &Path, force: bool) -> Result<IngestReport> {
        let file = self.collector.collect_file(path)?;
        let source = source_key(&file.path);

        if !self.should_ingest(&source, force).await? {
            return Ok(IngestReport::already_present(source));
        }

        let pages = load_document(&file.path, file.file_type).await?;
        self.ingest_pages(&source, pages).await
    }

    /// 업로드된 바이트 수집 (source는 `name`)
    pub async fn ingest_bytes(&self, name: &str, bytes: Vec<u8>, force: bool) -> Result<IngestReport> {
        let source = name.trim().to_string();
        if source.is_empty() {
            anyhow::bail!("Upload name must not be empty");
        }

        let pages = load_bytes(&source, bytes).await?;
        if !self.should_ingest(&source, force).await? {
            return Ok(IngestReport::already_present(source));
        }

        self.ingest_pages(&source, pages).await
    }

    /// 폴더 재귀 수집
    ///
    /// 파일별 실패는 기록만 하고 계속 진행합니다.
    pub async fn ingest_directory(&self, dir: &Path, force: bool) -> Result<DirectoryReport> {
        let files = self.collector.collect_directory(dir)?;
        let mut report = DirectoryReport::default();

        for file in files {
            match self.ingest_file(&file.path, force).await {
                Ok(r) => report.ingested.push(r),
                Err(e) => {
                    tracing::warn!("Failed to ingest {:?}: {:#}", file.path, e);
                    report.failed.push((file.path, format!("{:#}", e)));
                }
            }
        }

        Ok(report)
    }

    /// 수집 여부 결정 (false면 이미 존재)
    async fn should_ingest(&self, source: &str, force: bool) -> Result<bool> {
        if !self.store.contains_source(source).await? {
            return Ok(true);
        }
        if !force {
            tracing::info!("{} is already in the store, skipping", source);
            return Ok(false);
        }

        tracing::info!("Re-ingesting {}", source);
        Ok(true)
    }

    /// 로드된 페이지를 청킹/임베딩한 뒤 source의 청크로 저장
    ///
    /// 기존 청크는 새 청크 저장과 함께 교체됩니다.
    /// 임베딩된 청크가 하나도 없으면 기존 청크를 그대로 둡니다.
    pub async fn ingest_pages(&self, source: &str, pages: Vec<LoadedPage>) -> Result<IngestReport> {
        let mut total = 0;
        let mut chunks = Vec::new();

        for page in pages {
            for content in self.chunker.chunk(&page.text) {
                let metadata = ChunkMetadata::new(source, total).with_page(page.page);
                total += 1;

                if let Some(chunk) = self.store.embed_chunk(&content, metadata).await {
                    chunks.push(chunk);
                }
            }
        }

        let mut report = IngestReport {
            source: source.to_string(),
            total,
            stored: 0,
            skipped: total,
            already_present: false,
        };

        if chunks.is_empty() {
            tracing::warn!(
                "No chunks of {} could be embedded, existing chunks left unchanged",
                source
            );
            return Ok(report);
        }

        let ids = self.store.replace_source(source, &chunks).await?;
        report.stored = ids.len();
        report.skipped = total - ids.len();
        tracing::info!(
            "Ingested {}: {} chunks stored, {} skipped",
            source,
            report.stored,
            report.skipped
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Forget / List / Search
    // ------------------------------------------------------------------------

    /// source의 모든 청크 삭제
    ///
    /// 입력 그대로의 source와 정규화된 경로를 모두 시도합니다.
    pub async fn forget(&self, source: &str) -> Result<usize> {
        let raw = source.trim().to_string();
        let resolved = source_key(&normalize_path(source));

        let mut removed = self.store.delete_by_source(&raw).await?;
        if resolved != raw {
            removed += self.store.delete_by_source(&resolved).await?;
        }

        tracing::info!("Forgot {} ({} chunks)", source, removed);
        Ok(removed)
    }

    /// 저장된 source 목록
    pub async fn list_sources(&self) -> Result<Vec<String>> {
        self.store.list_sources().await
    }

    /// 단순 유사도 검색 (재정렬/하한 없음)
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        self.store.search(query, limit).await
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 질의 관련 컨텍스트 검색
    pub async fn recall(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.retriever.retrieve(query).await
    }

    /// 질의 응답 (조각은 콜백으로 전달)
    pub async fn ask<F>(&self, query: &str, on_fragment: F) -> Result<Answer>
    where
        F: FnMut(&str) + Send,
    {
        let context = self.recall(query).await?;
        tracing::debug!("Answering with {} context chunk(s)", context.len());

        let text = self.responder.respond(query, &context, on_fragment).await?;
        Ok(Answer { text, context })
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// 검색 결과 관련성 피드백 기록
    pub async fn record_feedback(&self, query: &str, chunk_id: i64, relevant: bool) -> Result<()> {
        self.store.record_feedback(query, chunk_id, relevant).await
    }

    /// 모든 데이터 삭제
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }

    /// 상태 조회
    pub async fn status(&self) -> Result<Status> {
        let stats = self.store.stats().await?;
        let ollama_reachable = match self.store.embedder().health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Ollama health check failed: {:#}", e);
                false
            }
        };

        Ok(Status {
            data_dir: self.config.data_dir(),
            backend: stats.backend,
            location: stats.location,
            schema_version: SCHEMA_VERSION,
            dimension: stats.dimension,
            chunk_count: stats.chunk_count,
            source_count: stats.source_count,
            embedding_model: self.config.ollama.embedding_model.clone(),
            chat_model: self.config.ollama.chat_model.clone(),
            ollama_reachable,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RetrievalStrategy;
    use crate::knowledge::{ChunkConfig, SqliteVectorStore};
    use crate::testing::{HashEmbedding, ScriptedChat};
    use tempfile::TempDir;

    pub(crate) fn test_config(dimension: usize) -> Config {
        let mut config = Config::default();
        config.embedding.dimension = dimension;
        config.chunking = ChunkConfig {
            chunk_size: 200,
            overlap: 20,
        };
        config.retrieval.strategy = RetrievalStrategy::Direct;
        config
    }

    pub(crate) fn test_assistant_with(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
    ) -> (Assistant, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let assistant = assistant_at(&temp_dir, config, embedder, chat);
        (assistant, temp_dir)
    }

    /// 같은 디렉토리의 DB를 공유하는 어시스턴트
    fn assistant_at(
        dir: &TempDir,
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
    ) -> Assistant {
        let path = dir.path().join("assistant.db");
        let backend = SqliteVectorStore::open(&path, embedder.dimension()).unwrap();
        let store = Arc::new(DocumentStore::with_backend(Box::new(backend), embedder, path));
        Assistant::with_components(config, store, chat).unwrap()
    }

    pub(crate) fn test_assistant() -> (Assistant, TempDir) {
        test_assistant_with(
            test_config(256),
            Arc::new(HashEmbedding::new(256)),
            Arc::new(ScriptedChat::new("I don't have any documents about that.")),
        )
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_ingest_then_list_once() {
        let (assistant, temp) = test_assistant();
        let path = write_file(&temp, "france.txt", &"Paris is the capital of France. ".repeat(20));

        let report = assistant.ingest_file(&path, false).await.unwrap();
        assert!(report.total > 1);
        assert_eq!(report.stored, report.total);
        assert_eq!(report.skipped, 0);

        let sources = assistant.list_sources().await.unwrap();
        assert_eq!(sources, vec![source_key(&path)]);

        // 재수집은 건너뜀
        let again = assistant.ingest_file(&path, false).await.unwrap();
        assert!(again.already_present);
        assert_eq!(assistant.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_force_reingest_replaces_chunks() {
        let (assistant, temp) = test_assistant();
        let path = write_file(&temp, "notes.md", "short note about rust");
        assistant.ingest_file(&path, false).await.unwrap();

        std::fs::write(&path, "a completely different note ".repeat(30)).unwrap();
        let report = assistant.ingest_file(&path, true).await.unwrap();
        assert!(!report.already_present);

        let status = assistant.status().await.unwrap();
        assert_eq!(status.chunk_count, report.stored);
        assert_eq!(status.source_count, 1);
    }

    #[tokio::test]
    async fn test_force_reingest_keeps_old_chunks_when_load_fails() {
        let (assistant, temp) = test_assistant();
        let path = write_file(&temp, "notes.txt", "Paris is the capital of France");
        let first = assistant.ingest_file(&path, false).await.unwrap();

        std::fs::write(&path, [0xff, 0xfe, 0xfd]).unwrap();
        assert!(assistant.ingest_file(&path, true).await.is_err());

        assert_eq!(assistant.list_sources().await.unwrap(), vec![source_key(&path)]);
        let status = assistant.status().await.unwrap();
        assert_eq!(status.chunk_count, first.stored);
    }

    #[tokio::test]
    async fn test_force_reingest_keeps_old_chunks_when_embedding_fails() {
        let temp = TempDir::new().unwrap();
        let path = write_file(&temp, "notes.txt", "Paris is the capital of France");
        let chat: Arc<dyn ChatProvider> = Arc::new(ScriptedChat::new("ok"));

        let healthy = assistant_at(
            &temp,
            test_config(32),
            Arc::new(HashEmbedding::new(32)),
            chat.clone(),
        );
        healthy.ingest_file(&path, false).await.unwrap();

        // 임베딩 서버가 내려간 상태에서 강제 재수집
        let offline = assistant_at(&temp, test_config(32), Arc::new(HashEmbedding::failing(32)), chat);
        let report = offline.ingest_file(&path, true).await.unwrap();
        assert_eq!(report.stored, 0);
        assert_eq!(report.skipped, report.total);

        let results = healthy.search("capital of France", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.source, source_key(&path));
    }

    #[tokio::test]
    async fn test_forget_deleted_file() {
        let (assistant, temp) = test_assistant();
        let path = write_file(&temp, "gone.md", "soon to be deleted");
        assistant.ingest_file(&path, false).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(assistant.forget(&path.to_string_lossy()).await.unwrap(), 1);
        assert!(assistant.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_store_after_dimension_change() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(768);
        config.store.data_dir = Some(temp.path().to_path_buf());

        let store = DocumentStore::open(&config, Arc::new(HashEmbedding::new(768)))
            .await
            .unwrap();
        store
            .put("Paris is the capital of France", ChunkMetadata::new("france.txt", 0))
            .await
            .unwrap();
        drop(store);

        config.embedding.dimension = 500;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedding::new(500));
        assert!(DocumentStore::open(&config, embedder.clone()).await.is_err());

        Assistant::reset_store(&config).await.unwrap();

        let store = DocumentStore::open(&config, embedder).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.dimension, 500);
        assert_eq!(stats.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_forget_then_nothing_from_source() {
        let (assistant, temp) = test_assistant();
        let a = write_file(&temp, "a.txt", "alpha beta gamma");
        let b = write_file(&temp, "b.txt", "alpha delta epsilon");
        assistant.ingest_file(&a, false).await.unwrap();
        assistant.ingest_file(&b, false).await.unwrap();

        let removed = assistant.forget(&a.to_string_lossy()).await.unwrap();
        assert_eq!(removed, 1);

        let results = assistant.search("alpha beta gamma", 10).await.unwrap();
        let key = source_key(&a);
        assert!(results.iter().all(|r| r.metadata.source != key));
        assert_eq!(assistant.forget("never-ingested.txt").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_paris_scenario() {
        let (assistant, _temp) = test_assistant();
        assistant
            .ingest_pages(
                "geo.txt",
                vec![LoadedPage {
                    text: "Paris is the capital of France".to_string(),
                    page: None,
                }],
            )
            .await
            .unwrap();

        let context = assistant.recall("capital of France").await.unwrap();
        assert!(!context.is_empty());
        assert!(context[0].content.contains("Paris"));
        assert!(context[0].similarity > 0.1);
    }

    #[tokio::test]
    async fn test_all_below_cutoff_gives_empty_context() {
        let mut config = test_config(256);
        config.retrieval.min_similarity = 0.99;
        let chat = Arc::new(ScriptedChat::new("Answer without context."));
        let (assistant, _temp) =
            test_assistant_with(config, Arc::new(HashEmbedding::new(256)), chat.clone());
        assistant
            .ingest_pages(
                "bread.md",
                vec![LoadedPage {
                    text: "Sourdough bread needs a starter".to_string(),
                    page: None,
                }],
            )
            .await
            .unwrap();

        let answer = assistant.ask("bread recipes for beginners", |_| {}).await.unwrap();
        assert!(answer.context.is_empty());
        assert_eq!(answer.text, "Answer without context.");

        // 컨텍스트 없이 시스템 지시 + 질의만 전달
        let calls = chat.calls();
        assert_eq!(calls.last().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_store_still_answers() {
        let (assistant, _temp) = test_assistant();
        let mut streamed = String::new();
        let answer = assistant
            .ask("What is the capital of France?", |f| streamed.push_str(f))
            .await
            .unwrap();

        assert!(!answer.text.is_empty());
        assert_eq!(streamed, answer.text);
        assert!(answer.context.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_chunks() {
        let (assistant, _temp) = test_assistant_with(
            test_config(16),
            Arc::new(HashEmbedding::failing(16)),
            Arc::new(ScriptedChat::new("ok")),
        );
        let report = assistant
            .ingest_pages(
                "x.txt",
                vec![LoadedPage {
                    text: "some text".to_string(),
                    page: None,
                }],
            )
            .await
            .unwrap();

        assert_eq!(report.total, 1);
        assert_eq!(report.stored, 0);
        assert_eq!(report.skipped, 1);
        assert!(assistant.list_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pdf_pages_keep_page_numbers() {
        let (assistant, _temp) = test_assistant();
        let pages = vec![
            LoadedPage {
                text: "first page text".to_string(),
                page: Some(1),
            },
            LoadedPage {
                text: "second page text".to_string(),
                page: Some(2),
            },
        ];
        let report = assistant.ingest_pages("doc.pdf", pages).await.unwrap();
        assert_eq!(report.stored, 2);

        let results = assistant.search("second page text", 1).await.unwrap();
        assert_eq!(results[0].metadata.page, Some(2));
        assert_eq!(results[0].metadata.chunk_index, 1);
    }

    #[tokio::test]
    async fn test_ingest_bytes_and_directory() {
        let (assistant, temp) = test_assistant();

        let report = assistant
            .ingest_bytes("upload.md", b"uploaded markdown".to_vec(), false)
            .await
            .unwrap();
        assert_eq!(report.source, "upload.md");
        assert_eq!(report.stored, 1);
        assert!(assistant.ingest_bytes("pic.png", vec![1], false).await.is_err());

        let docs = temp.path().join("docs");
        std::fs::create_dir_all(docs.join("nested")).unwrap();
        std::fs::write(docs.join("one.md"), "one").unwrap();
        std::fs::write(docs.join("nested/two.txt"), "two").unwrap();
        std::fs::write(docs.join("skip.bin"), "bin").unwrap();

        let dir_report = assistant.ingest_directory(&docs, false).await.unwrap();
        assert_eq!(dir_report.ingested.len(), 2);
        assert!(dir_report.failed.is_empty());
        assert_eq!(assistant.list_sources().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ingest_missing_file_names_path() {
        let (assistant, temp) = test_assistant();
        let missing = temp.path().join("nope.md");
        let err = assistant.ingest_file(&missing, false).await.unwrap_err();
        assert!(err.to_string().contains("nope.md"));
    }

    #[tokio::test]
    async fn test_feedback_and_reset() {
        let (assistant, _temp) = test_assistant();
        assistant
            .ingest_pages(
                "a.txt",
                vec![LoadedPage {
                    text: "feedback target".to_string(),
                    page: None,
                }],
            )
            .await
            .unwrap();
        let hit = &assistant.search("feedback target", 1).await.unwrap()[0];
        assistant
            .record_feedback("feedback target", hit.id, true)
            .await
            .unwrap();

        assistant.reset().await.unwrap();
        assert!(assistant.list_sources().await.unwrap().is_empty());

        let status = assistant.status().await.unwrap();
        assert_eq!(status.schema_version, SCHEMA_VERSION);
        assert_eq!(status.dimension, 256);
        assert!(status.ollama_reachable);
    }
}
