//! rag-assistant - 로컬 RAG 어시스턴트
//!
//! 문서를 청크로 나누어 Ollama로 임베딩하고 SQLite(또는 LanceDB)에 저장한 뒤,
//! 질문과 유사한 청크를 컨텍스트로 붙여 채팅 모델의 응답을 스트리밍합니다.
//!
//! 핵심 연산은 [`Assistant`]에 있고, CLI(REPL)와 대시보드 서버는 이를 감싸는 어댑터입니다.

pub mod assistant;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;
pub mod llm;
pub mod responder;
pub mod retrieval;
pub mod server;

#[cfg(test)]
mod testing;

// Re-exports
pub use assistant::{Answer, Assistant, DirectoryReport, IngestReport, Status};
pub use config::{get_data_dir, Config};
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use error::RagError;
pub use knowledge::{
    ChunkConfig, ChunkMetadata, Chunker, DocumentStore, LanceVectorStore, ScoredChunk,
    SqliteVectorStore, StoreStats, VectorStore, WindowChunker,
};
pub use llm::{ChatMessage, ChatProvider, OllamaChat, Role};
pub use responder::Responder;
pub use retrieval::{RetrievedChunk, Retriever};
