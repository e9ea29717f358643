//! CLI 모듈
//!
//! rag-assistant CLI 명령어 정의 및 구현

pub mod repl;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use crate::assistant::{Answer, Assistant, DirectoryReport, IngestReport};
use crate::collector::normalize_path;
use crate::config::Config;
use crate::knowledge::ScoredChunk;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "rag-assistant")]
#[command(version, about = "로컬 RAG 어시스턴트", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: <데이터 디렉토리>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 생략하면 대화형 모드(chat)로 실행
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 또는 폴더를 지식베이스에 추가
    Ingest {
        /// 수집할 파일 경로
        #[arg(long)]
        file: Option<String>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<String>,

        /// 강제 재수집 (이미 존재하는 문서도 다시 수집)
        #[arg(long)]
        force: bool,
    },

    /// 문서 삭제
    Forget {
        /// 삭제할 문서 경로 또는 이름
        source: String,
    },

    /// 저장된 문서 목록
    List,

    /// 유사도 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 한 번 질문하고 종료
    Ask {
        /// 질문
        query: String,
    },

    /// 대화형 모드
    Chat,

    /// 대시보드 API 서버 실행
    Serve {
        /// 바인드 주소 (기본: 설정값)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// 상태 확인
    Status,

    /// 모든 데이터 삭제
    Reset {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },

    /// 검색 결과 관련성 피드백
    Feedback {
        /// 청크 ID (search 출력의 #번호)
        chunk_id: i64,

        /// 검색에 사용한 쿼리
        query: String,

        /// 관련 없음으로 표시
        #[arg(long)]
        irrelevant: bool,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("설정 로드 실패")?;

    // 초기화는 저장소를 검증하며 열지 않음 (차원/스키마가 바뀐 저장소도 초기화 가능)
    let command = cli.command.unwrap_or(Commands::Chat);
    if let Commands::Reset { yes } = command {
        return cmd_reset(&config, yes).await;
    }

    let assistant = Assistant::from_config(config)
        .await
        .context("어시스턴트 초기화 실패")?;

    match command {
        Commands::Ingest { file, dir, force } => cmd_ingest(&assistant, file, dir, force).await,
        Commands::Forget { source } => cmd_forget(&assistant, &source).await,
        Commands::List => cmd_list(&assistant).await,
        Commands::Search { query, limit } => cmd_search(&assistant, &query, limit).await,
        Commands::Ask { query } => cmd_ask(&assistant, &query).await,
        Commands::Chat => repl::run_repl(&assistant).await,
        Commands::Serve { bind } => cmd_serve(assistant, bind).await,
        Commands::Status => cmd_status(&assistant).await,
        Commands::Reset { yes } => cmd_reset(assistant.config(), yes).await,
        Commands::Feedback {
            chunk_id,
            query,
            irrelevant,
        } => cmd_feedback(&assistant, chunk_id, &query, !irrelevant).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    assistant: &Assistant,
    file: Option<String>,
    dir: Option<String>,
    force: bool,
) -> Result<()> {
    if let Some(ref file) = file {
        let path = normalize_path(file);
        println!("{} 문서 처리 중: {}", style("[*]").cyan(), path.display());
        let report = assistant.ingest_file(&path, force).await?;
        print_ingest_report(&report);
        return Ok(());
    }

    if let Some(ref dir) = dir {
        let path = normalize_path(dir);
        println!("{} 폴더 처리 중: {}", style("[*]").cyan(), path.display());
        let report = assistant.ingest_directory(&path, force).await?;
        print_directory_report(&report);
        return Ok(());
    }

    bail!("--file 또는 --dir를 지정해야 합니다");
}

/// 삭제 명령어 (forget)
async fn cmd_forget(assistant: &Assistant, source: &str) -> Result<()> {
    let removed = assistant.forget(source).await?;
    print_forget_result(source, removed);
    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(assistant: &Assistant) -> Result<()> {
    let sources = assistant.list_sources().await.context("문서 목록 조회 실패")?;
    print_sources(&sources);
    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(assistant: &Assistant, query: &str, limit: usize) -> Result<()> {
    println!("{} 검색 중: \"{}\"", style("[*]").cyan(), query);
    let results = assistant.search(query, limit).await.context("검색 실패")?;
    print_search_results(&results);
    Ok(())
}

/// 단일 질문 명령어 (ask)
async fn cmd_ask(assistant: &Assistant, query: &str) -> Result<()> {
    stream_answer(assistant, query).await?;
    Ok(())
}

/// 서버 명령어 (serve)
async fn cmd_serve(assistant: Assistant, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| assistant.config().server.bind.clone());
    println!("{} 대시보드 API: http://{}", style("[*]").cyan(), bind);
    crate::server::serve(Arc::new(assistant), &bind).await
}

/// 상태 명령어 (status)
async fn cmd_status(assistant: &Assistant) -> Result<()> {
    println!("rag-assistant v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let status = assistant.status().await.context("상태 조회 실패")?;

    println!("{} 데이터 디렉토리: {}", style("[*]").cyan(), status.data_dir.display());
    println!(
        "{} 저장소: {} ({})",
        style("[*]").cyan(),
        status.backend,
        status.location.display()
    );
    println!(
        "{} 스키마 버전: {}, 임베딩 차원: {}",
        style("[*]").cyan(),
        status.schema_version,
        status.dimension
    );
    println!(
        "{} 저장된 문서: {} 건, 청크: {} 개",
        style("[OK]").green(),
        status.source_count,
        status.chunk_count
    );

    if status.ollama_reachable {
        println!(
            "{} Ollama 연결됨 (임베딩: {}, 채팅: {})",
            style("[OK]").green(),
            status.embedding_model,
            status.chat_model
        );
    } else {
        println!(
            "{} Ollama에 연결할 수 없습니다: {}",
            style("[!]").red(),
            assistant.config().ollama.base_url
        );
        println!("    실행: ollama serve");
    }

    Ok(())
}

/// 초기화 명령어 (reset)
async fn cmd_reset(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("모든 문서가 삭제됩니다. 계속하려면 --yes를 지정하세요");
    }
    Assistant::reset_store(config).await.context("초기화 실패")?;
    println!("{} 모든 문서가 삭제되었습니다", style("[OK]").green());
    Ok(())
}

/// 피드백 명령어 (feedback)
async fn cmd_feedback(
    assistant: &Assistant,
    chunk_id: i64,
    query: &str,
    relevant: bool,
) -> Result<()> {
    assistant
        .record_feedback(query, chunk_id, relevant)
        .await
        .context("피드백 기록 실패")?;

    let label = if relevant { "관련 있음" } else { "관련 없음" };
    println!("{} 청크 #{}: {}", style("[OK]").green(), chunk_id, label);
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

pub(crate) fn print_ingest_report(report: &IngestReport) {
    if report.already_present {
        println!(
            "{} 이미 저장된 문서입니다 (--force로 재수집): {}",
            style("[!]").yellow(),
            report.source
        );
        return;
    }

    println!(
        "{} {} 청크 저장 ({} 개 중 {} 개 건너뜀)",
        style("[OK]").green(),
        report.stored,
        report.total,
        report.skipped
    );
    println!("     {}", report.source);
}

pub(crate) fn print_directory_report(report: &DirectoryReport) {
    for r in &report.ingested {
        print_ingest_report(r);
    }
    for (path, err) in &report.failed {
        println!("{} {}: {}", style("[!]").red(), path.display(), err);
    }

    let stored: usize = report.ingested.iter().map(|r| r.stored).sum();
    println!();
    println!(
        "{} 완료: 파일 {} 개, 청크 {} 개, 실패 {} 개",
        style("[OK]").green(),
        report.ingested.len(),
        stored,
        report.failed.len()
    );
}

pub(crate) fn print_forget_result(source: &str, removed: usize) {
    if removed == 0 {
        println!("{} 삭제할 문서를 찾을 수 없습니다: {}", style("[!]").yellow(), source);
    } else {
        println!(
            "{} 문서 삭제됨: {} ({} 청크)",
            style("[OK]").green(),
            source,
            removed
        );
    }
}

pub(crate) fn print_sources(sources: &[String]) {
    if sources.is_empty() {
        println!("{} 저장된 문서가 없습니다.", style("[!]").yellow());
        return;
    }

    println!("{} 저장된 문서 ({} 건):\n", style("[OK]").green(), sources.len());
    for source in sources {
        println!("  - {}", source);
    }
}

pub(crate) fn print_search_results(results: &[ScoredChunk]) {
    if results.is_empty() {
        println!("\n{} 검색 결과가 없습니다.", style("[!]").yellow());
        return;
    }

    println!("\n{} 검색 결과 ({} 건):\n", style("[OK]").green(), results.len());

    for (i, result) in results.iter().enumerate() {
        let location = match result.metadata.page {
            Some(page) => format!("{} (p.{})", result.metadata.source, page),
            None => result.metadata.source.clone(),
        };

        println!(
            "{}. #{} [유사도: {:.4}] {}",
            i + 1,
            result.id,
            result.similarity,
            location
        );
        println!("   {}", truncate_text(&result.content, 200));
        println!();
    }
}

/// 질문에 답하며 조각을 즉시 출력
pub(crate) async fn stream_answer(assistant: &Assistant, query: &str) -> Result<Answer> {
    print!("{}", style("Assistant: ").yellow());
    let _ = std::io::stdout().flush();

    let answer = assistant
        .ask(query, |fragment| {
            print!("{}", style(fragment).green());
            let _ = std::io::stdout().flush();
        })
        .await;
    println!("\n");

    let answer = answer?;
    if answer.context.is_empty() {
        println!(
            "{}",
            style("No relevant context found. Responded without RAG context.").yellow()
        );
    } else {
        println!("{} 참고한 컨텍스트:", style("[*]").cyan());
        for chunk in &answer.context {
            println!("    [{:.2}] {}", chunk.similarity, chunk.source);
        }
    }
    println!();

    Ok(answer)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
