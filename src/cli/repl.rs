//! 대화형 모드 (REPL)
//!
//! 명령: process, process_dir, forget, list, search, exit.
//! 그 외 입력은 질문으로 처리합니다. 인자가 없으면 다시 입력받습니다.

use std::io::Write;

use anyhow::Result;
use console::style;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use super::{
    print_directory_report, print_forget_result, print_ingest_report, print_search_results,
    print_sources, stream_answer,
};
use crate::assistant::Assistant;
use crate::collector::normalize_path;

// ============================================================================
// Command Parsing
// ============================================================================

/// REPL 입력 한 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Process(Option<String>),
    ProcessDir(Option<String>),
    Forget(Option<String>),
    List,
    Search(Option<String>),
    Exit,
    Ask(String),
    Empty,
}

/// 입력 해석
///
/// 첫 단어가 명령어면 나머지를 인자로 사용합니다.
/// `list`, `exit`는 인자가 붙으면 질문으로 취급합니다.
pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    match (head.to_lowercase().as_str(), arg) {
        ("exit", None) => ReplCommand::Exit,
        ("list", None) => ReplCommand::List,
        ("process", arg) => ReplCommand::Process(arg),
        ("process_dir", arg) => ReplCommand::ProcessDir(arg),
        ("forget", arg) => ReplCommand::Forget(arg),
        ("search", arg) => ReplCommand::Search(arg),
        _ => ReplCommand::Ask(line.to_string()),
    }
}

// ============================================================================
// Loop
// ============================================================================

fn print_banner() {
    println!("{}", style("Welcome to the Local RAG AI Agent!").yellow());
    println!("{}", style("Commands:").yellow());
    println!("- 'exit' to quit");
    println!("- 'process <path>' to add a document");
    println!("- 'process_dir <path>' to add all documents in a directory");
    println!("- 'forget <path>' to remove a document");
    println!("- 'list' to show all stored documents");
    println!("- 'search <query>' to find relevant documents");
    println!("- Or simply ask a question");
    println!();
}

fn prompt(label: &str) {
    print!("{}", style(label).white());
    let _ = std::io::stdout().flush();
}

/// 인자가 없으면 한 줄 더 입력받기 (EOF나 빈 입력이면 None)
async fn require<R>(lines: &mut Lines<R>, arg: Option<String>, label: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    if arg.is_some() {
        return Ok(arg);
    }

    prompt(label);
    let input = lines.next_line().await?;
    Ok(input.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}

/// 표준 입력으로 REPL 실행
pub async fn run_repl(assistant: &Assistant) -> Result<()> {
    run_repl_with(assistant, BufReader::new(tokio::io::stdin())).await
}

/// 주어진 입력으로 REPL 실행
///
/// 명령 실패는 출력만 하고 루프를 계속합니다.
pub async fn run_repl_with<R>(assistant: &Assistant, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    print_banner();
    let mut lines = reader.lines();

    loop {
        prompt("You: ");
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let result = match parse_command(&line) {
            ReplCommand::Exit => break,
            ReplCommand::Empty => Ok(()),
            ReplCommand::List => assistant.list_sources().await.map(|s| print_sources(&s)),
            ReplCommand::Process(arg) => {
                match require(&mut lines, arg, "Enter the path to the document: ").await? {
                    Some(path) => assistant
                        .ingest_file(&normalize_path(&path), false)
                        .await
                        .map(|r| print_ingest_report(&r)),
                    None => Ok(()),
                }
            }
            ReplCommand::ProcessDir(arg) => {
                match require(&mut lines, arg, "Enter the path to the directory: ").await? {
                    Some(path) => assistant
                        .ingest_directory(&normalize_path(&path), false)
                        .await
                        .map(|r| print_directory_report(&r)),
                    None => Ok(()),
                }
            }
            ReplCommand::Forget(arg) => {
                match require(&mut lines, arg, "Enter the path of the document to forget: ")
                    .await?
                {
                    Some(source) => assistant
                        .forget(&source)
                        .await
                        .map(|n| print_forget_result(&source, n)),
                    None => Ok(()),
                }
            }
            ReplCommand::Search(arg) => {
                match require(&mut lines, arg, "Enter your search query: ").await? {
                    Some(query) => assistant
                        .search(&query, assistant.config().retrieval.top_k)
                        .await
                        .map(|r| print_search_results(&r)),
                    None => Ok(()),
                }
            }
            ReplCommand::Ask(query) => stream_answer(assistant, &query).await.map(|_| ()),
        };

        if let Err(e) = result {
            tracing::debug!("REPL command failed: {:?}", e);
            println!("{} {:#}", style("[!]").red(), e);
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::tests::test_assistant;
    use crate::collector::source_key;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), ReplCommand::Empty);
        assert_eq!(parse_command("exit"), ReplCommand::Exit);
        assert_eq!(parse_command("LIST"), ReplCommand::List);
        assert_eq!(parse_command("process"), ReplCommand::Process(None));
        assert_eq!(
            parse_command("process  ~/notes/a.md "),
            ReplCommand::Process(Some("~/notes/a.md".to_string()))
        );
        assert_eq!(
            parse_command("process_dir docs"),
            ReplCommand::ProcessDir(Some("docs".to_string()))
        );
        assert_eq!(parse_command("forget"), ReplCommand::Forget(None));
        assert_eq!(
            parse_command("search capital of France"),
            ReplCommand::Search(Some("capital of France".to_string()))
        );
    }

    #[test]
    fn test_parse_free_text_is_question() {
        assert_eq!(
            parse_command("What is the capital of France?"),
            ReplCommand::Ask("What is the capital of France?".to_string())
        );
        assert_eq!(
            parse_command("list all the planets"),
            ReplCommand::Ask("list all the planets".to_string())
        );
        assert_eq!(
            parse_command("exit strategies?"),
            ReplCommand::Ask("exit strategies?".to_string())
        );
    }

    #[tokio::test]
    async fn test_repl_prompts_for_missing_argument() {
        let (assistant, temp) = test_assistant();
        let path = temp.path().join("france.txt");
        std::fs::write(&path, "Paris is the capital of France").unwrap();

        let input = format!("process\n{}\nlist\nexit\nprocess never-read.md\n", path.display());
        run_repl_with(&assistant, input.as_bytes()).await.unwrap();

        assert_eq!(
            assistant.list_sources().await.unwrap(),
            vec![source_key(&path)]
        );
    }

    #[tokio::test]
    async fn test_repl_continues_after_error() {
        let (assistant, temp) = test_assistant();
        let good = temp.path().join("good.md");
        std::fs::write(&good, "good document").unwrap();

        let input = format!(
            "process {}\nprocess {}\nsearch good\nWhat is in the good document?\n",
            temp.path().join("missing.md").display(),
            good.display()
        );
        run_repl_with(&assistant, input.as_bytes()).await.unwrap();

        assert_eq!(assistant.list_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repl_forget() {
        let (assistant, temp) = test_assistant();
        let doc = temp.path().join("doc.txt");
        std::fs::write(&doc, "to be forgotten").unwrap();
        assistant.ingest_file(&doc, false).await.unwrap();

        let input = format!("forget\n{}\nexit\n", doc.display());
        run_repl_with(&assistant, input.as_bytes()).await.unwrap();

        assert!(assistant.list_sources().await.unwrap().is_empty());
    }
}
