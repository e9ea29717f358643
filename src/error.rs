//! 타입 에러 정의
//!
//! 대부분의 경로는 `anyhow::Result`로 전파하고,
//! 호출자가 분기해야 하는 조건만 `RagError`로 표현합니다.

use std::path::PathBuf;

use thiserror::Error;

/// 호출자가 구분해서 처리해야 하는 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 저장소 차원과 벡터 길이 불일치
    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 저장소 스키마 버전 불일치
    #[error("unsupported store schema version {found} (this build uses {supported}); run `reset --yes` to recreate")]
    SchemaVersion { found: String, supported: u32 },

    /// 지원하지 않는 파일 형식
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    /// 파일 없음
    #[error("file does not exist at path: {0}")]
    FileNotFound(PathBuf),

    /// 백엔드가 지원하지 않는 기능
    #[error("operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl RagError {
    /// 차원 검증 헬퍼
    pub fn check_dimension(expected: usize, actual: usize) -> Result<(), RagError> {
        if expected == actual {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch { expected, actual })
        }
    }
}
