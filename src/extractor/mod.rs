//! 콘텐츠 추출 모듈
//!
//! 파일 또는 업로드된 바이트에서 텍스트를 추출합니다.
//! - 텍스트/마크다운: UTF-8로 읽기
//! - PDF: pdf-extract로 페이지별 추출

pub mod pdf;

use std::path::Path;

use anyhow::{Context, Result};

use crate::collector::FileType;
use crate::error::RagError;

// ============================================================================
// Loaded Page
// ============================================================================

/// 추출된 하위 문서 (텍스트 파일은 1개, PDF는 페이지별)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    pub text: String,
    /// PDF 페이지 번호 (1부터 시작)
    pub page: Option<usize>,
}

impl LoadedPage {
    fn whole(text: String) -> Self {
        Self { text, page: None }
    }
}

fn pdf_pages(pages: Vec<(usize, String)>) -> Vec<LoadedPage> {
    pages
        .into_iter()
        .map(|(page, text)| LoadedPage {
            text,
            page: Some(page),
        })
        .collect()
}

// ============================================================================
// Loaders
// ============================================================================

/// 파일에서 문서 로드
pub async fn load_document(path: &Path, file_type: FileType) -> Result<Vec<LoadedPage>> {
    match file_type {
        FileType::Text | FileType::Markdown => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read text file: {:?}", path))?;
            Ok(vec![LoadedPage::whole(text)])
        }
        FileType::Pdf => {
            // PDF 추출은 CPU 바운드이므로 spawn_blocking 사용
            let path = path.to_path_buf();
            let pages = tokio::task::spawn_blocking(move || pdf::extract_text_from_pdf(&path))
                .await
                .context("PDF extraction task failed")??;
            Ok(pdf_pages(pages))
        }
    }
}

/// 업로드된 바이트에서 문서 로드
///
/// 파일 타입은 `name`의 확장자로 결정합니다.
pub async fn load_bytes(name: &str, bytes: Vec<u8>) -> Result<Vec<LoadedPage>> {
    let file_type = FileType::from_path(Path::new(name))
        .ok_or_else(|| RagError::UnsupportedFileType(name.into()))?;

    match file_type {
        FileType::Text | FileType::Markdown => {
            let text = String::from_utf8(bytes)
                .with_context(|| format!("Upload is not valid UTF-8: {}", name))?;
            Ok(vec![LoadedPage::whole(text)])
        }
        FileType::Pdf => {
            let pages = tokio::task::spawn_blocking(move || pdf::extract_pages_from_mem(&bytes))
                .await
                .context("PDF extraction task failed")??;
            Ok(pdf_pages(pages))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_text_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "# Title\n\nBody").unwrap();

        let pages = load_document(&path, FileType::Markdown).await.unwrap();
        assert_eq!(pages, vec![LoadedPage::whole("# Title\n\nBody".to_string())]);
    }

    #[tokio::test]
    async fn test_load_bytes_text() {
        let pages = load_bytes("upload.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "hello");
        assert!(pages[0].page.is_none());
    }

    #[tokio::test]
    async fn test_load_bytes_rejects_unknown_type() {
        let err = load_bytes("image.png", vec![0, 1, 2]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::UnsupportedFileType(_))
        ));
    }

    #[tokio::test]
    async fn test_load_bytes_rejects_invalid_utf8() {
        assert!(load_bytes("bad.txt", vec![0xff, 0xfe, 0xfd]).await.is_err());
    }

    #[test]
    fn test_pdf_pages_numbering() {
        let pages = pdf_pages(vec![(1, "a".to_string()), (2, "b".to_string())]);
        assert_eq!(pages[1].page, Some(2));
    }
}
