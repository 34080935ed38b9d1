//! Web search backed by the DuckDuckGo instant-answer API.
//!
//! The provider seam keeps the engine testable without network access. A
//! provider hands back ordered result records; this module serializes them
//! into the status-tagged JSON the model receives, so every backend shares
//! one wire contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::llm::ToolDefinition;

pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

pub const DEFAULT_NUM_RESULTS: usize = 5;
pub const MAX_NUM_RESULTS: usize = 10;

const DUCKDUCKGO_ENDPOINT: &str = "https://api.duckduckgo.com/";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Network(String),

    #[error("Search response was not valid JSON: {0}")]
    Malformed(String),
}

/// One search hit, before positioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Serialize)]
struct PositionedResult<'a> {
    position: usize,
    title: &'a str,
    url: &'a str,
    snippet: &'a str,
}

/// Seam between the tool layer and a search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// Serialize a search attempt into the JSON string handed to the model.
pub fn render_search_output(query: &str, outcome: Result<Vec<SearchResult>, SearchError>) -> String {
    let payload = match outcome {
        Ok(results) if results.is_empty() => json!({
            "status": "no_results",
            "message": format!("No results found for: {query}"),
        }),
        Ok(results) => {
            let records: Vec<PositionedResult<'_>> = results
                .iter()
                .enumerate()
                .map(|(idx, result)| PositionedResult {
                    position: idx + 1,
                    title: &result.title,
                    url: &result.url,
                    snippet: &result.snippet,
                })
                .collect();
            json!({
                "status": "success",
                "query": query,
                "results": records,
            })
        }
        Err(err) => json!({
            "status": "error",
            "message": format!("Search failed: {err}"),
        }),
    };
    payload.to_string()
}

pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new() -> Self {
        Self::with_endpoint(DUCKDUCKGO_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for DuckDuckGoSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        debug!(target = "turngate::search", query, num_results, "dispatching web search");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|err| SearchError::Network(err.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|err| SearchError::Malformed(err.to_string()))?;

        Ok(collect_results(&body, num_results))
    }
}

/// Flatten an instant-answer payload into ordered result records. The
/// abstract, when present, outranks related topics.
fn collect_results(body: &Value, num_results: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    let abstract_text = text_field(body, "AbstractText");
    if !abstract_text.is_empty() {
        results.push(SearchResult {
            title: text_field(body, "Heading"),
            url: text_field(body, "AbstractURL"),
            snippet: abstract_text,
        });
    }

    if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
        for topic in topics {
            // Category entries nest their hits one level down.
            if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
                for nested_topic in nested {
                    push_topic(&mut results, nested_topic);
                }
            } else {
                push_topic(&mut results, topic);
            }
        }
    }

    results.truncate(num_results);
    results
}

fn push_topic(results: &mut Vec<SearchResult>, topic: &Value) {
    let snippet = text_field(topic, "Text");
    if snippet.is_empty() {
        return;
    }
    results.push(SearchResult {
        title: snippet.split(" - ").next().unwrap_or(&snippet).to_owned(),
        url: text_field(topic, "FirstURL"),
        snippet,
    });
}

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Schema bound to the model when web search is enabled.
pub fn web_search_tool_definition() -> ToolDefinition {
    ToolDefinition::function(
        WEB_SEARCH_TOOL_NAME,
        "Search the web for up-to-date information. Use for recent events, real-time data, \
         current prices, weather, news, or facts you are not confident about.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "How many results to return (1-10, default 5)"
                }
            },
            "required": ["query"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(title: &str, url: &str, snippet: &str) -> SearchResult {
        SearchResult {
            title: title.to_owned(),
            url: url.to_owned(),
            snippet: snippet.to_owned(),
        }
    }

    #[test]
    fn abstract_outranks_related_topics() {
        let body = json!({
            "Heading": "Rust",
            "AbstractText": "A systems programming language.",
            "AbstractURL": "https://example.com/rust",
            "RelatedTopics": [
                {"Text": "Cargo - package manager", "FirstURL": "https://example.com/cargo"}
            ]
        });
        let results = collect_results(&body, 5);
        assert_eq!(
            results,
            vec![
                result("Rust", "https://example.com/rust", "A systems programming language."),
                result("Cargo", "https://example.com/cargo", "Cargo - package manager"),
            ]
        );
    }

    #[test]
    fn nested_category_topics_are_flattened_and_capped() {
        let body = json!({
            "RelatedTopics": [
                {"Topics": [
                    {"Text": "one", "FirstURL": "u1"},
                    {"Text": "two", "FirstURL": "u2"}
                ]},
                {"Text": "three", "FirstURL": "u3"},
                {"Text": "four", "FirstURL": "u4"}
            ]
        });
        let results = collect_results(&body, 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].snippet, "three");
    }

    #[test]
    fn success_output_numbers_results_from_one() {
        let output = render_search_output(
            "rust",
            Ok(vec![result("Rust", "https://example.com", "snippet")]),
        );
        let payload: Value = serde_json::from_str(&output).expect("valid JSON");
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["query"], "rust");
        assert_eq!(
            payload["results"],
            json!([{
                "position": 1,
                "title": "Rust",
                "url": "https://example.com",
                "snippet": "snippet"
            }])
        );
    }

    #[test]
    fn empty_results_report_no_results_status() {
        let output = render_search_output("obscure query", Ok(vec![]));
        assert!(output.contains("\"status\":\"no_results\""));
        assert!(output.contains("No results found for: obscure query"));
    }

    #[test]
    fn errors_become_a_status_payload() {
        let output = render_search_output(
            "q",
            Err(SearchError::Network("connection refused".to_owned())),
        );
        assert!(output.contains("\"status\":\"error\""));
        assert!(output.contains("Search failed: Search request failed: connection refused"));
    }
}
