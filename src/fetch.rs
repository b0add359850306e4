//! Sources of raw student graph data.
//!
//! [`RawDataFetcher`] is the collaborator the cache calls on a miss. It yields
//! the `studentData` row for one student; transport problems and domain errors
//! reported by the source are kept apart in [`FetchError`].

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::FetchError;

/// Parameterized read returning the subject node and its collected outgoing
/// relationships as a single row.
pub const STUDENT_RELATIONSHIPS_QUERY: &str = r#"
MATCH (s:Student {id: $studentId})
OPTIONAL MATCH (s)-[r]->(n)
RETURN s, collect({relationship: type(r), properties: properties(r), target: n}) as relationships
"#;

#[async_trait]
pub trait RawDataFetcher: Send + Sync {
    async fn fetch_student(&self, student_id: &str) -> Result<Value, FetchError>;
}

/// Body of `GET /students/{id}` and of each database-emulator entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentResponse {
    #[serde(default)]
    student_data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl StudentResponse {
    fn into_result(self, status: u16) -> Result<Value, FetchError> {
        let ok = (200..300).contains(&status);
        match (ok, self.student_data) {
            (true, Some(data)) if !data.is_null() => Ok(data),
            (true, _) => Err(FetchError::not_found()),
            (false, _) => Err(FetchError::Upstream {
                status,
                message: self
                    .error
                    .unwrap_or_else(|| "Failed to fetch student data".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5173/api".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Fetches rows from the student API over HTTP.
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::Network(format!("invalid base URL {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Network(format!(
                "invalid base URL {}: cannot hold a path",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// `<base>/students/<id>` with the id escaped as a single path segment.
    pub fn student_url(&self, student_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("students").push(student_id);
        }
        url
    }
}

#[async_trait]
impl RawDataFetcher for HttpFetcher {
    async fn fetch_student(&self, student_id: &str) -> Result<Value, FetchError> {
        let url = self.student_url(student_id);
        debug!(%url, "fetching student data");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body: StudentResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        body.into_result(status)
    }
}

/// Offline source backed by a database-emulator JSON file mapping each
/// student id to the response the API would give for it.
#[derive(Debug, Default)]
pub struct EmulatorFetcher {
    responses: HashMap<String, Value>,
}

impl EmulatorFetcher {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let responses: HashMap<String, Value> = serde_json::from_str(&text)?;
        info!(students = responses.len(), path = %path.display(), "loaded database emulator");
        Ok(Self { responses })
    }

    pub fn from_responses(responses: HashMap<String, Value>) -> Self {
        Self { responses }
    }
}

#[async_trait]
impl RawDataFetcher for EmulatorFetcher {
    async fn fetch_student(&self, student_id: &str) -> Result<Value, FetchError> {
        let entry = self
            .responses
            .get(student_id)
            .ok_or_else(FetchError::not_found)?;
        let response: StudentResponse = serde_json::from_value(entry.clone())
            .map_err(|e| FetchError::Network(e.to_string()))?;
        match response.error {
            Some(message) => Err(FetchError::Upstream {
                status: 404,
                message,
            }),
            None => response.into_result(200),
        }
    }
}

/// A graph database that can run [`STUDENT_RELATIONSHIPS_QUERY`].
#[async_trait]
pub trait GraphQuery: Send + Sync {
    async fn run(
        &self,
        query: &str,
        params: &HashMap<String, Value>,
    ) -> Result<Vec<Value>, FetchError>;
}

/// Adapts a [`GraphQuery`] into a fetcher. Zero rows means the student does
/// not exist.
pub struct GraphFetcher<G> {
    graph: G,
}

impl<G: GraphQuery> GraphFetcher<G> {
    pub fn new(graph: G) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl<G: GraphQuery> RawDataFetcher for GraphFetcher<G> {
    async fn fetch_student(&self, student_id: &str) -> Result<Value, FetchError> {
        let params = HashMap::from([(
            "studentId".to_string(),
            Value::String(student_id.to_string()),
        )]);
        let rows = self.graph.run(STUDENT_RELATIONSHIPS_QUERY, &params).await?;
        rows.into_iter().next().ok_or_else(FetchError::not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn student_url_joins_base() {
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            base_url: "http://example.test/api/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            fetcher.student_url("S1").as_str(),
            "http://example.test/api/students/S1"
        );
    }

    #[test]
    fn student_url_escapes_reserved_characters() {
        let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
        assert_eq!(
            fetcher.student_url("a/b?c#d").as_str(),
            "http://localhost:5173/api/students/a%2Fb%3Fc%23d"
        );
    }

    #[test]
    fn base_url_must_parse() {
        let err = HttpFetcher::new(HttpFetcherConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(err, Err(FetchError::Network(_))));
    }

    #[test]
    fn responses_map_status_to_errors() {
        let ok = StudentResponse {
            student_data: Some(json!({"s": {}})),
            error: None,
        };
        assert!(ok.into_result(200).is_ok());

        let missing = StudentResponse {
            student_data: Some(Value::Null),
            error: None,
        };
        assert_eq!(missing.into_result(200), Err(FetchError::not_found()));

        let failed = StudentResponse {
            student_data: None,
            error: Some("Failed to query students".to_string()),
        };
        let err = failed.into_result(500).unwrap_err();
        assert_eq!(err.to_string(), "Failed to query students");

        let bare = StudentResponse {
            student_data: None,
            error: None,
        };
        assert_eq!(
            bare.into_result(502).unwrap_err().to_string(),
            "Failed to fetch student data"
        );
    }

    #[tokio::test]
    async fn emulator_serves_known_students() {
        let fetcher = EmulatorFetcher::from_responses(HashMap::from([
            ("S1".to_string(), json!({"studentData": {"s": {"properties": {"id": "S1"}}, "relationships": []}})),
            ("S2".to_string(), json!({"error": "Failed to fetch data: timeout", "studentData": null})),
        ]));

        let row = fetcher.fetch_student("S1").await.unwrap();
        assert_eq!(row["s"]["properties"]["id"], "S1");

        let err = fetcher.fetch_student("S2").await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch data: timeout");

        let err = fetcher.fetch_student("S404").await.unwrap_err();
        assert_eq!(err, FetchError::not_found());
    }

    #[tokio::test]
    async fn emulator_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db_emulator.json");
        std::fs::write(
            &path,
            r#"{"S1": {"studentData": {"s": {"properties": {}}, "relationships": []}}}"#,
        )
        .unwrap();
        let fetcher = EmulatorFetcher::from_path(&path).unwrap();
        assert!(fetcher.fetch_student("S1").await.is_ok());
    }

    struct RowsGraph(Vec<Value>);

    #[async_trait]
    impl GraphQuery for RowsGraph {
        async fn run(
            &self,
            query: &str,
            params: &HashMap<String, Value>,
        ) -> Result<Vec<Value>, FetchError> {
            assert!(query.contains("OPTIONAL MATCH"));
            assert!(params.contains_key("studentId"));
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn graph_fetcher_treats_no_rows_as_not_found() {
        let empty = GraphFetcher::new(RowsGraph(Vec::new()));
        assert_eq!(
            empty.fetch_student("S1").await.unwrap_err(),
            FetchError::not_found()
        );

        let found = GraphFetcher::new(RowsGraph(vec![json!({"s": {}, "relationships": []})]));
        assert!(found.fetch_student("S1").await.is_ok());
    }
}
