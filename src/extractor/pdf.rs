//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 페이지별 텍스트를 추출합니다.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

/// "--- Page 3 ---" 형태의 페이지 구분선
static PAGE_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").expect("valid regex")
});

/// PDF 파일에서 텍스트 추출
///
/// (페이지 번호, 텍스트) 목록을 반환합니다. 페이지 번호는 1부터 시작합니다.
pub fn extract_text_from_pdf(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;
    extract_pages_from_mem(&bytes).with_context(|| format!("Failed to extract PDF: {:?}", path))
}

/// 메모리의 PDF 바이트에서 텍스트 추출
pub fn extract_pages_from_mem(bytes: &[u8]) -> Result<Vec<(usize, String)>> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).context("Failed to extract text from PDF")?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .collect())
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)로 페이지 분리 시도
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴으로 시도 (일부 PDF에서 사용)
    if PAGE_SEPARATOR.is_match(text) {
        let pages: Vec<String> = PAGE_SEPARATOR
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================
