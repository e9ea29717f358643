//! 질의 확장 - 채팅 모델로 하위 검색 질의 생성
//!
//! 모델에게 문자열 리스트만 돌려달라고 요청합니다.
//! JSON 배열과 작은따옴표 리스트를 모두 받아들이고,
//! 파싱에 실패하면 원래 질의 하나로 대체합니다.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::llm::{ChatMessage, ChatProvider};

const EXPANSION_INSTRUCTION: &str = "Generate a list of search queries to find relevant context for the following prompt. Return only a list of strings.";
const EXAMPLE_QUESTION: &str = "What's the capital of France?";
const EXAMPLE_ANSWER: &str = "['capital of France', 'French cities', 'Paris facts']";

/// 질의 확장기
pub struct QueryExpander {
    chat: Arc<dyn ChatProvider>,
    max_queries: usize,
}

impl QueryExpander {
    pub fn new(chat: Arc<dyn ChatProvider>, max_queries: usize) -> Self {
        Self {
            chat,
            max_queries: max_queries.max(1),
        }
    }

    /// few-shot 프롬프트 구성
    pub fn build_messages(query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(EXPANSION_INSTRUCTION),
            ChatMessage::user(EXAMPLE_QUESTION),
            ChatMessage::assistant(EXAMPLE_ANSWER),
            ChatMessage::user(query),
        ]
    }

    /// 질의를 하위 질의 목록으로 확장
    ///
    /// 결과는 비어 있지 않으며 최대 `max_queries`개입니다.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let response = match self.chat.chat(&Self::build_messages(query)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Query expansion failed, using original query: {:#}", e);
                return vec![query.to_string()];
            }
        };

        match parse_query_list(&response, self.max_queries) {
            Some(queries) => {
                tracing::debug!("Expanded query into {:?}", queries);
                queries
            }
            None => {
                tracing::warn!(
                    "Unparsable expansion output, using original query: {:?}",
                    response
                );
                vec![query.to_string()]
            }
        }
    }
}

/// 작은따옴표/큰따옴표 문자열 리터럴
static QUOTED_STRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});

/// 모델 출력에서 문자열 리스트 추출
///
/// 빈 항목과 중복은 제거합니다. 유효한 항목이 없으면 `None`입니다.
pub fn parse_query_list(output: &str, max_queries: usize) -> Option<Vec<String>> {
    let start = output.find('[')?;
    let end = output.rfind(']')?;
    if end <= start {
        return None;
    }
    let list = &output[start..=end];

    let items: Vec<String> = match serde_json::from_str::<Vec<String>>(list) {
        Ok(items) => items,
        Err(_) => QUOTED_STRING
            .captures_iter(list)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().replace("\\'", "'").replace("\\\"", "\""))
            .collect(),
    };

    let mut queries: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !queries.contains(&item) {
            queries.push(item);
        }
    }
    queries.truncate(max_queries);

    if queries.is_empty() {
        None
    } else {
        Some(queries)
    }
}
