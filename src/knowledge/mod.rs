//! Knowledge 모듈 - 청킹 및 벡터 지식 저장소
//!
//! - Chunker: 고정 크기 겹침 윈도우 분할
//! - SQLite: 기본 벡터 저장소 (brute-force 코사인 검색)
//! - LanceDB: 선택형 벡터 저장소
//! - DocumentStore: 임베딩 + 저장 파사드

mod chunker;
mod lance;
mod sqlite;
mod store;
mod vector;

// Re-exports
pub use chunker::{window_chunker, ChunkConfig, Chunker, WindowChunker};
pub use lance::LanceVectorStore;
pub use sqlite::{SqliteVectorStore, DB_FILE_NAME};
pub use store::{DocumentStore, StoreStats, LANCE_DIR_NAME};
pub use vector::{
    cosine_similarity, decode_embedding, encode_embedding, ChunkMetadata, NewChunk, ScoredChunk,
    VectorStore, SCHEMA_VERSION,
};
