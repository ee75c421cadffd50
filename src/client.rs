use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::payload::{
    BackendConfig, Board, BoardList, IssueHistory, IssueSummary, ResolutionMetrics, SearchResults,
    SprintList,
};

const PROXY_PREFIX: &str = "/proxy";
const SEARCH_PAGE_SIZE: u32 = 100;
const SEARCH_FIELDS: &str = "status";

/// Errors from talking to the tracker proxy.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("invalid proxy configuration: {0}")]
    InvalidConfig(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("proxy returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
}

/// Anything that can hand out a ticket's status history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn issue_history(&self, key: &str) -> Result<IssueHistory, ClientError>;
}

/// `project = BOARD [AND sprint = ID] ORDER BY created DESC`
pub fn issue_jql(board: Option<&str>, sprint: Option<u64>) -> String {
    let mut parts = Vec::new();
    if let Some(board) = board {
        parts.push(format!("project = {board}"));
    }
    if let Some(sprint) = sprint {
        parts.push(format!("sprint = {sprint}"));
    }

    if parts.is_empty() {
        "ORDER BY created DESC".to_string()
    } else {
        format!("{} ORDER BY created DESC", parts.join(" AND "))
    }
}

/// Resolved tickets only; the proxy adds the project filter itself.
pub fn resolution_jql(sprint: Option<u64>) -> String {
    let base = "resolution is not EMPTY ORDER BY created DESC";
    match sprint {
        Some(sprint) => format!("sprint = {sprint} AND {base}"),
        None => base.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    base_url: String,
}

impl ProxyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidConfig(format!(
                "proxy url must start with http:// or https://, got {base_url:?}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "proxy request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ClientError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|err| ClientError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    pub async fn config(&self) -> Result<BackendConfig, ClientError> {
        self.get_json("/config", &[]).await
    }

    /// Round-trips through the proxy to the tracker to prove credentials work.
    pub async fn server_info(&self) -> Result<serde_json::Value, ClientError> {
        self.get_json(&format!("{PROXY_PREFIX}/serverInfo"), &[]).await
    }

    /// Threshold hours per status label, in the order the proxy lists them.
    pub async fn aging_thresholds(&self) -> Result<Vec<(String, f64)>, ClientError> {
        let raw: serde_json::Map<String, serde_json::Value> =
            self.get_json("/aging-thresholds", &[]).await?;

        Ok(raw
            .into_iter()
            .filter_map(|(label, hours)| match hours.as_f64() {
                Some(hours) => Some((label, hours)),
                None => {
                    tracing::warn!(%label, value = %hours, "ignoring non-numeric aging threshold");
                    None
                }
            })
            .collect())
    }

    pub async fn boards(&self) -> Result<Vec<Board>, ClientError> {
        let list: BoardList = self.get_json(&format!("{PROXY_PREFIX}/boards"), &[]).await?;
        Ok(list.boards)
    }

    pub async fn sprints(&self, board: &str) -> Result<SprintList, ClientError> {
        self.get_json(
            &format!("{PROXY_PREFIX}/board-sprints"),
            &[("board", board.to_string())],
        )
        .await
    }

    pub async fn search_issues(
        &self,
        board: Option<&str>,
        sprint: Option<u64>,
    ) -> Result<Vec<IssueSummary>, ClientError> {
        let results: SearchResults = self
            .get_json(
                &format!("{PROXY_PREFIX}/search"),
                &[
                    ("jql", issue_jql(board, sprint)),
                    ("maxResults", SEARCH_PAGE_SIZE.to_string()),
                    ("fields", SEARCH_FIELDS.to_string()),
                    ("expand", "changelog".to_string()),
                ],
            )
            .await?;

        if let Some(total) = results.total {
            if total > results.issues.len() as u64 {
                tracing::warn!(
                    total,
                    returned = results.issues.len(),
                    "search truncated to the first page"
                );
            }
        }
        Ok(results.issues)
    }

    pub async fn resolution_metrics(
        &self,
        board: Option<&str>,
        sprint: Option<u64>,
    ) -> Result<ResolutionMetrics, ClientError> {
        let mut query = vec![("jql", resolution_jql(sprint))];
        if let Some(board) = board {
            query.push(("board", board.to_string()));
        }
        self.get_json(&format!("{PROXY_PREFIX}/resolution-metrics"), &query)
            .await
    }
}

#[async_trait]
impl HistorySource for ProxyClient {
    async fn issue_history(&self, key: &str) -> Result<IssueHistory, ClientError> {
        if key.is_empty() || key.contains(['/', '?', '#']) {
            return Err(ClientError::InvalidConfig(format!("invalid issue key {key:?}")));
        }
        self.get_json(&format!("{PROXY_PREFIX}/issue-history/{key}"), &[])
            .await
    }
}

/// Prefers the proxy's `{"error": ...}` body over the bare status text.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ProxyClient {
        ProxyClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn builds_issue_jql() {
        assert_eq!(issue_jql(None, None), "ORDER BY created DESC");
        assert_eq!(issue_jql(Some("OPS"), None), "project = OPS ORDER BY created DESC");
        assert_eq!(
            issue_jql(Some("OPS"), Some(42)),
            "project = OPS AND sprint = 42 ORDER BY created DESC"
        );
        assert_eq!(
            resolution_jql(Some(42)),
            "sprint = 42 AND resolution is not EMPTY ORDER BY created DESC"
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = ProxyClient::new("localhost:5000", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn fetches_issue_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxy/issue-history/OPS-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "key": "OPS-1",
                "current_status": "In Progress",
                "status_changes": [
                    {"date": "2026-01-05T09:00:00.000+0000", "from": "To Do", "to": "In Progress"}
                ],
                "ping_pong_score": 2
            })))
            .mount(&server)
            .await;

        let history = client(&server).issue_history("OPS-1").await.unwrap();
        assert_eq!(history.current_status.as_deref(), Some("In Progress"));
        assert_eq!(history.status_changes.len(), 1);
        assert_eq!(history.ping_pong_score, Some(2));
    }

    #[tokio::test]
    async fn surfaces_proxy_error_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxy/issue-history/OPS-404"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": "Failed to fetch issue history: 404"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).issue_history("OPS-404").await.unwrap_err();
        match err {
            ClientError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Failed to fetch issue history: 404");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn searches_with_board_and_sprint_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxy/search"))
            .and(query_param("jql", "project = OPS AND sprint = 7 ORDER BY created DESC"))
            .and(query_param("expand", "changelog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [
                    {"key": "OPS-2", "fields": {"summary": "Flaky deploy", "status": {"name": "In QA"}}}
                ],
                "total": 1
            })))
            .mount(&server)
            .await;

        let issues = client(&server).search_issues(Some("OPS"), Some(7)).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].status(), Some("In QA"));
    }

    #[tokio::test]
    async fn loads_thresholds_boards_and_sprints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aging-thresholds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"In Review": 48})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy/boards"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "boards": [{"id": 3, "name": "Ops board", "type": "scrum", "location": {"projectKey": "OPS"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/proxy/board-sprints"))
            .and(query_param("board", "OPS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sprints": [{"id": 7, "name": "Sprint 7", "state": "active"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let thresholds = client.aging_thresholds().await.unwrap();
        assert_eq!(thresholds, vec![("In Review".to_string(), 48.0)]);

        let boards = client.boards().await.unwrap();
        assert_eq!(boards[0].location.project_key.as_deref(), Some("OPS"));

        let sprints = client.sprints("OPS").await.unwrap();
        assert_eq!(sprints.sprints[0].id, 7);
    }

    #[tokio::test]
    async fn thresholds_keep_proxy_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aging-thresholds"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"Waiting for Review": 24, "Blocked": 12, "Review": 48, "Note": "n/a"}"#,
            ))
            .mount(&server)
            .await;

        let overrides = client(&server).aging_thresholds().await.unwrap();
        let labels: Vec<&str> = overrides.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(labels, vec!["Waiting for Review", "Blocked", "Review"]);

        let mut thresholds = crate::risk::RiskThresholds::default();
        thresholds.merge(overrides);
        assert_eq!(thresholds.resolve("Waiting for Review (external)"), 24.0);
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxy/resolution-metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client(&server).resolution_metrics(Some("OPS"), None).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }
}
