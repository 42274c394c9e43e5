//! GraphQL page fetcher
//!
//! This module issues one paginated search request per call and classifies
//! every way it can go wrong:
//! - Building the HTTP client with the configured user agent and timeout
//! - Encoding the search query, page size, and cursor as GraphQL variables
//! - Decoding quota telemetry, page info, and repository nodes
//! - Mapping transport, HTTP, and payload problems onto [`FetchFailure`]

use crate::config::{Credential, UpstreamConfig, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Search query sent upstream; only the fields the normalizer consumes are selected
pub const SEARCH_QUERY: &str = r#"
query($q: String!, $first: Int!, $after: String) {
  rateLimit {
    limit
    cost
    remaining
    resetAt
  }
  search(query: $q, type: REPOSITORY, first: $first, after: $after) {
    repositoryCount
    pageInfo {
      hasNextPage
      endCursor
    }
    nodes {
      ... on Repository {
        id
        databaseId
        name
        owner { login }
        url
        description
        updatedAt
        stargazerCount
        primaryLanguage { name }
      }
    }
  }
}
"#;

/// Longest slice of an error body kept in a failure message
const ERROR_EXCERPT_CHARS: usize = 200;

/// Why a page request did not produce a page
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Transport failure: connect, timeout, reset, unreadable body
    #[error("network error: {0}")]
    Network(String),

    /// Upstream overloaded or rate limiting (5xx, 429, 403 with quota exhausted)
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Response arrived but could not be used: undecodable or carrying GraphQL errors
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request rejected for a reason retrying cannot fix
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },
}

impl FetchFailure {
    /// True for failures retried with escalating backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// True for failures that end the harvest
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Client { .. })
    }
}

/// Quota telemetry reported alongside every page
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaTelemetry {
    pub limit: Option<u32>,
    pub cost: Option<u32>,
    pub remaining: Option<u32>,
    /// Kept raw so an unparsable value can be told apart from a missing one
    pub reset_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOwner {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLanguage {
    pub name: Option<String>,
}

/// Typed view of one repository node
///
/// Nodes arrive as untyped JSON and are decoded one at a time by the
/// normalizer, so a single off-type field only costs that node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    pub id: Option<String>,
    pub database_id: Option<i64>,
    pub name: Option<String>,
    pub owner: Option<RawOwner>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub stargazer_count: Option<i64>,
    pub primary_language: Option<RawLanguage>,
    pub updated_at: Option<String>,
}

/// One decoded page of search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub quota: QuotaTelemetry,
    /// Total number of matches the upstream reports for the query
    pub total_count: Option<u64>,
    /// Undecoded nodes in upstream order; `None` marks a node the upstream could not resolve
    pub entries: Vec<Option<serde_json::Value>>,
    pub next_cursor: Option<String>,
    pub has_next: bool,
}

/// Source of search pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the page after `cursor` (or the first page when `None`)
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage, FetchFailure>;
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: SearchVariables<'a>,
}

#[derive(Serialize)]
struct SearchVariables<'a> {
    q: &'a str,
    first: u32,
    after: Option<&'a str>,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    rate_limit: Option<QuotaTelemetry>,
    search: Option<SearchConnection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    repository_count: Option<u64>,
    #[serde(default)]
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Option<serde_json::Value>>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// Builds an HTTP client for the upstream API
///
/// # Example
///
/// ```no_run
/// use repo_harvest::config::UpstreamConfig;
/// use repo_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&UpstreamConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &UpstreamConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Classifies a non-success HTTP response
///
/// | Condition | Failure |
/// |-----------|---------|
/// | 5xx | Server |
/// | 429 | Server |
/// | 403 with `retry-after` or `x-ratelimit-remaining: 0` | Server |
/// | any other 4xx/3xx | Client |
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> FetchFailure {
    let message = excerpt(body);
    let code = status.as_u16();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return FetchFailure::Server {
            status: code,
            message,
        };
    }

    if status == StatusCode::FORBIDDEN && is_quota_exhausted(headers) {
        return FetchFailure::Server {
            status: code,
            message,
        };
    }

    FetchFailure::Client {
        status: code,
        message,
    }
}

fn is_quota_exhausted(headers: &HeaderMap) -> bool {
    if headers.contains_key("retry-after") {
        return true;
    }

    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_EXCERPT_CHARS).collect()
}

/// Decodes a successful response body into a page
///
/// A body that does not decode, carries a non-empty `errors` list, or lacks
/// `data.search` is a protocol failure.
pub fn parse_page(body: &str) -> Result<SearchPage, FetchFailure> {
    let response: GraphqlResponse = serde_json::from_str(body)
        .map_err(|e| FetchFailure::Protocol(format!("undecodable response: {}", e)))?;

    if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
        let rendered = serde_json::to_string(&errors).unwrap_or_default();
        return Err(FetchFailure::Protocol(format!(
            "upstream returned {} error(s): {}",
            errors.len(),
            excerpt(&rendered)
        )));
    }

    let data = response
        .data
        .ok_or_else(|| FetchFailure::Protocol("response has no data".to_string()))?;
    let search = data
        .search
        .ok_or_else(|| FetchFailure::Protocol("response has no search results".to_string()))?;

    Ok(SearchPage {
        quota: data.rate_limit.unwrap_or_default(),
        total_count: search.repository_count,
        entries: search.nodes,
        next_cursor: search.page_info.end_cursor,
        has_next: search.page_info.has_next_page,
    })
}

/// Page fetcher backed by the upstream GraphQL endpoint
pub struct GraphqlFetcher {
    client: Client,
    endpoint: String,
    credential: Credential,
    search_query: String,
}

impl GraphqlFetcher {
    /// Creates a fetcher for the given search predicate
    pub fn new(
        config: &UpstreamConfig,
        credential: Credential,
        search_query: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            endpoint: config.endpoint.clone(),
            credential,
            search_query: search_query.into(),
        })
    }
}

#[async_trait]
impl PageFetcher for GraphqlFetcher {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage, FetchFailure> {
        let request = GraphqlRequest {
            query: SEARCH_QUERY,
            variables: SearchVariables {
                q: &self.search_query,
                first: page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
                after: cursor,
            },
        };

        tracing::debug!(
            "Requesting page (cursor: {}, size: {})",
            cursor.unwrap_or("<start>"),
            request.variables.first
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, self.credential.bearer())
            .header(ACCEPT, "application/vnd.github.v4+json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchFailure::Network("request timeout".to_string())
                } else if e.is_connect() {
                    FetchFailure::Network(format!("connection failed: {}", e))
                } else {
                    FetchFailure::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::Network(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &headers, &body));
        }

        parse_page(&body)
    }
}
