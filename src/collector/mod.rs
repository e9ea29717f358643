//! 파일 수집 모듈
//!
//! 사용자가 입력한 경로를 정규화하고, 폴더를 재귀 탐색하여
//! 수집 가능한 문서 파일을 모읍니다. .gitignore 패턴을 존중합니다.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::{Captures, Regex};

use crate::error::RagError;

// ============================================================================
// File Types
// ============================================================================

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// 일반 텍스트 (코드, 설정 파일 등)
    Text,
    /// 마크다운
    Markdown,
    /// PDF 파일
    Pdf,
}

impl FileType {
    /// 확장자로 파일 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(FileType::Markdown),

            "txt" | "rst" | "rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "json" | "toml"
            | "yaml" | "yml" | "html" | "css" | "go" | "java" | "c" | "cpp" | "h" | "hpp"
            | "sh" | "sql" | "xml" | "csv" | "log" => Some(FileType::Text),

            "pdf" => Some(FileType::Pdf),

            _ => None,
        }
    }

    /// 파일 경로에서 타입 결정
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

// ============================================================================
// Path Normalization
// ============================================================================

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

static BACKSLASH_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(.)").expect("valid regex"));

/// 사용자 입력 경로 정규화
///
/// 공백과 감싼 따옴표를 제거하고, `~`와 `$VAR`/`${VAR}`를 확장한 뒤
/// 백슬래시 이스케이프(`My\ Docs`)를 풉니다. 정의되지 않은 변수는 그대로 둡니다.
pub fn normalize_path(input: &str) -> PathBuf {
    let mut s = input.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            s = &s[1..s.len() - 1];
        }
    }

    let mut expanded = s.to_string();
    if expanded == "~" || expanded.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            expanded = format!("{}{}", home.display(), &expanded[1..]);
        }
    }

    let expanded = ENV_VAR.replace_all(&expanded, |caps: &Captures| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });

    PathBuf::from(BACKSLASH_ESCAPE.replace_all(&expanded, "$1").into_owned())
}

/// 경로를 저장용 source 문자열로 변환 (가능하면 절대 경로)
pub fn source_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 파일 타입
    pub file_type: FileType,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedFile {
    /// 파일에서 CollectedFile 생성 (지원하지 않는 확장자는 None)
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        let file_type = match FileType::from_path(&path) {
            Some(ft) => ft,
            None => return Ok(None),
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            file_type,
            size: metadata.len(),
        }))
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    /// 새 수집기 생성
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 검증
    ///
    /// 존재, 파일 여부, 읽기 권한, 지원 확장자를 순서대로 확인합니다.
    pub fn collect_file(&self, path: &Path) -> Result<CollectedFile> {
        if !path.exists() {
            return Err(RagError::FileNotFound(path.to_path_buf()).into());
        }
        if !path.is_file() {
            anyhow::bail!("Not a file: {}", path.display());
        }
        std::fs::File::open(path)
            .with_context(|| format!("File is not readable: {}", path.display()))?;

        CollectedFile::from_path(path.to_path_buf())?
            .ok_or_else(|| RagError::UnsupportedFileType(path.to_path_buf()).into())
    }

    /// 폴더 재귀 수집
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        if !path.exists() {
            anyhow::bail!("Directory not found: {}", path.display());
        }

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf()) {
                Ok(Some(file)) => {
                    if self.should_include(&file) {
                        files.push(file);
                    }
                }
                Ok(None) => {
                    tracing::debug!("Skipping unsupported file: {:?}", entry.path());
                }
                Err(e) => {
                    tracing::warn!("Failed to collect file: {}", e);
                }
            }
        }

        tracing::info!("Collected {} files from {:?}", files.len(), path);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, file: &CollectedFile) -> bool {
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("md"), Some(FileType::Markdown));
        assert_eq!(FileType::from_extension("txt"), Some(FileType::Text));
        assert_eq!(FileType::from_extension("rs"), Some(FileType::Text));
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("png"), None);
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn test_normalize_path_quotes_and_escapes() {
        assert_eq!(normalize_path("  \"/tmp/a b.md\"  "), PathBuf::from("/tmp/a b.md"));
        assert_eq!(normalize_path("'/tmp/x.txt'"), PathBuf::from("/tmp/x.txt"));
        assert_eq!(normalize_path(r"/tmp/My\ Docs/a.md"), PathBuf::from("/tmp/My Docs/a.md"));
    }

    #[test]
    fn test_normalize_path_home_and_vars() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(normalize_path("~/notes.md"), home.join("notes.md"));
        }

        std::env::set_var("RAG_TEST_NORMALIZE_DIR", "/srv/docs");
        assert_eq!(
            normalize_path("$RAG_TEST_NORMALIZE_DIR/a.md"),
            PathBuf::from("/srv/docs/a.md")
        );
        assert_eq!(
            normalize_path("${RAG_TEST_NORMALIZE_DIR}/b.md"),
            PathBuf::from("/srv/docs/b.md")
        );
        assert_eq!(
            normalize_path("$RAG_TEST_UNSET_VARIABLE_X/c.md"),
            PathBuf::from("$RAG_TEST_UNSET_VARIABLE_X/c.md")
        );
    }

    #[test]
    fn test_collect_file_checks() {
        let dir = TempDir::new().unwrap();
        let collector = FileCollector::with_defaults();

        let missing = dir.path().join("missing.md");
        let err = collector.collect_file(&missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::FileNotFound(_))
        ));

        assert!(collector.collect_file(dir.path()).is_err());

        let image = dir.path().join("photo.png");
        std::fs::write(&image, b"\x89PNG").unwrap();
        let err = collector.collect_file(&image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::UnsupportedFileType(_))
        ));

        let note = dir.path().join("note.md");
        std::fs::write(&note, "# hi").unwrap();
        let file = collector.collect_file(&note).unwrap();
        assert_eq!(file.file_type, FileType::Markdown);
        assert_eq!(file.size, 4);
    }

    #[test]
    fn test_collect_directory_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("sub/c.bin"), "c").unwrap();
        std::fs::write(dir.path().join(".hidden.md"), "h").unwrap();

        let files = FileCollector::with_defaults()
            .collect_directory(dir.path())
            .unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["a.md", "b.txt"]);
    }

    #[test]
    fn test_collect_directory_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.md");
        std::fs::write(&file, "a").unwrap();
        assert!(FileCollector::with_defaults().collect_directory(&file).is_err());
    }

    #[test]
    fn test_source_key_is_absolute() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.md");
        std::fs::write(&file, "a").unwrap();
        assert!(Path::new(&source_key(&file)).is_absolute());
    }

    #[test]
    fn test_source_key_missing_relative_path() {
        // 삭제된 파일도 현재 디렉토리 기준 절대 경로로 변환
        let key = source_key(Path::new("gone/notes.md"));
        let expected = std::env::current_dir().unwrap().join("gone/notes.md");
        assert_eq!(key, expected.to_string_lossy());
    }
}
