//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the GraphQL endpoint and drive the
//! real fetcher, storage, and harvest loop end-to-end.

use repo_harvest::config::{
    Config, Credential, HarvestConfig, QuotaConfig, RetryConfig, StorageConfig, UpstreamConfig,
};
use repo_harvest::crawler::{
    FetchFailure, GraphqlFetcher, Harvester, PageFetcher, StopReason, TokioSleeper,
};
use repo_harvest::storage::{RunStatus, SqliteStorage, Storage};
use repo_harvest::HarvestError;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-token";

/// Creates a test configuration pointing at the mock server
fn create_test_config(server: &MockServer, db_path: &str, target_count: u64) -> Config {
    Config {
        harvest: HarvestConfig {
            target_count,
            page_size: 100,
            checkpoint_key: "it-cursor".to_string(),
            search_query: "stars:>0".to_string(),
        },
        upstream: UpstreamConfig {
            endpoint: format!("{}/graphql", server.uri()),
            timeout_secs: 5,
            ..UpstreamConfig::default()
        },
        storage: StorageConfig {
            database_path: db_path.to_string(),
        },
        // Millisecond delays keep retries fast
        retry: RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 10,
            max_jitter_ms: 1,
            protocol_pause_ms: 1,
        },
        quota: QuotaConfig::default(),
    }
}

fn node(id: i64) -> Value {
    json!({
        "id": format!("R_{}", id),
        "databaseId": id,
        "name": format!("repo-{}", id),
        "owner": {"login": "octo"},
        "url": format!("https://github.com/octo/repo-{}", id),
        "description": if id % 2 == 0 { Value::Null } else { json!("A repository") },
        "stargazerCount": 1000 - id,
        "primaryLanguage": {"name": if id % 3 == 0 { "Go" } else { "Rust" }},
        "updatedAt": "2024-05-30T08:00:00Z"
    })
}

fn page_body(ids: std::ops::Range<i64>, cursor: &str, has_next: bool) -> Value {
    json!({
        "data": {
            "rateLimit": {"limit": 5000, "cost": 1, "remaining": 4900, "resetAt": "2099-01-01T00:00:00Z"},
            "search": {
                "repositoryCount": 150,
                "pageInfo": {"hasNextPage": has_next, "endCursor": cursor},
                "nodes": ids.map(node).collect::<Vec<_>>()
            }
        }
    })
}

fn after(cursor: Option<&str>) -> Value {
    json!({"variables": {"after": cursor}})
}

struct TestHarness {
    _dir: TempDir,
    db_path: String,
}

impl TestHarness {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir
            .path()
            .join("catalog.db")
            .to_string_lossy()
            .into_owned();
        Self { _dir: dir, db_path }
    }

    fn harvester(&self, config: Config) -> Harvester<SqliteStorage> {
        let storage = SqliteStorage::new(std::path::Path::new(&self.db_path))
            .expect("Failed to open storage");
        let fetcher = GraphqlFetcher::new(
            &config.upstream,
            Credential::new(TOKEN).expect("token"),
            config.harvest.search_query.clone(),
        )
        .expect("Failed to build fetcher");
        Harvester::new(config, storage, Box::new(fetcher), Box::new(TokioSleeper))
    }
}

#[tokio::test]
async fn test_full_harvest_two_pages() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "bearer test-token"))
        .and(body_partial_json(after(None)))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1..101, "c1", true)))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "bearer test-token"))
        .and(body_partial_json(after(Some("c1"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(101..151, "c2", false)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &harness.db_path, 1000);
    let mut harvester = harness.harvester(config);

    let outcome = harvester.run().await.expect("Harvest should succeed");

    assert_eq!(outcome.reason, StopReason::Exhausted);
    assert_eq!(outcome.records_fetched, 150);
    assert_eq!(outcome.commits, 2);
    assert_eq!(outcome.retries, 0);

    let storage = harvester.storage();
    assert_eq!(storage.count_entries().unwrap(), 150);
    assert_eq!(storage.count_snapshots().unwrap(), 150);
    assert_eq!(
        storage.read_checkpoint("it-cursor").unwrap(),
        Some("c2".to_string())
    );

    let entry = storage.get_entry(3).unwrap().expect("entry 3 stored");
    assert_eq!(entry.full_name, "octo/repo-3");
    assert_eq!(entry.language.as_deref(), Some("Go"));
    assert_eq!(entry.popularity, 997);
    assert_eq!(entry.description.as_deref(), Some("A repository"));
    assert_eq!(storage.get_entry(4).unwrap().unwrap().description, None);

    let languages = storage.get_language_breakdown(5).unwrap();
    assert_eq!(languages[0].0, "Rust");

    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_fetched, 150);
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();

    {
        let mut storage =
            SqliteStorage::new(std::path::Path::new(&harness.db_path)).expect("open storage");
        storage.write_checkpoint("it-cursor", "c1").unwrap();
    }

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(after(Some("c1"))))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(101..151, "c2", false)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &harness.db_path, 1000);
    let mut harvester = harness.harvester(config);

    let outcome = harvester.run().await.expect("Harvest should succeed");

    assert_eq!(outcome.records_fetched, 50);
    assert_eq!(harvester.storage().count_entries().unwrap(), 50);
    assert!(harvester.storage().get_entry(1).unwrap().is_none());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1..21, "c1", false)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &harness.db_path, 1000);
    let mut harvester = harness.harvester(config);

    let outcome = harvester.run().await.expect("Harvest should succeed");

    assert_eq!(outcome.retries, 2);
    assert_eq!(outcome.records_fetched, 20);
}

#[tokio::test]
async fn test_graphql_errors_are_retried() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "Something went wrong while executing your query"}]
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1..11, "c1", false)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &harness.db_path, 1000);
    let mut harvester = harness.harvester(config);

    let outcome = harvester.run().await.expect("Harvest should succeed");

    assert_eq!(outcome.retries, 1);
    assert_eq!(outcome.records_fetched, 10);
}

#[tokio::test]
async fn test_off_type_node_is_dropped_and_page_ingested() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();

    let mut body = page_body(1..21, "c1", false);
    if let Some(nodes) = body["data"]["search"]["nodes"].as_array_mut() {
        nodes.insert(
            10,
            json!({"id": "R_bad", "databaseId": "999", "name": "bad", "stargazerCount": 1.5}),
        );
    }

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &harness.db_path, 1000);
    let mut harvester = harness.harvester(config);

    let outcome = harvester.run().await.expect("Harvest should succeed");

    assert_eq!(outcome.records_fetched, 20);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.retries, 0);
    assert_eq!(harvester.storage().count_entries().unwrap(), 20);
    assert_eq!(
        harvester.storage().read_checkpoint("it-cursor").unwrap(),
        Some("c1".to_string())
    );
}

#[tokio::test]
async fn test_unauthorized_is_fatal() {
    let server = MockServer::start().await;
    let harness = TestHarness::new();

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"message":"Bad credentials"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, &harness.db_path, 1000);
    let mut harvester = harness.harvester(config);

    let result = harvester.run().await;

    match result {
        Err(HarvestError::Upstream(FetchFailure::Client { status, message })) => {
            assert_eq!(status, 401);
            assert!(message.contains("Bad credentials"));
        }
        other => panic!("expected fatal client failure, got {:?}", other),
    }

    let storage = harvester.storage();
    assert_eq!(storage.read_checkpoint("it-cursor").unwrap(), None);
    assert_eq!(
        storage.get_latest_run().unwrap().unwrap().status,
        RunStatus::Failed
    );
}

#[tokio::test]
async fn test_fetcher_clamps_page_size_and_sends_query() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({
            "variables": {"q": "language:rust", "first": 10, "after": "abc"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1..4, "c1", true)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server, ":memory:", 10);
    let fetcher = GraphqlFetcher::new(
        &config.upstream,
        Credential::new(TOKEN).unwrap(),
        "language:rust",
    )
    .unwrap();

    let page = fetcher.fetch_page(Some("abc"), 3).await.unwrap();

    assert_eq!(page.entries.len(), 3);
    assert_eq!(page.quota.remaining, Some(4900));
    assert_eq!(page.next_cursor.as_deref(), Some("c1"));
    assert!(page.has_next);
}

#[tokio::test]
async fn test_rate_limited_forbidden_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_string("API rate limit exceeded"),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&server, ":memory:", 10);
    let fetcher =
        GraphqlFetcher::new(&config.upstream, Credential::new(TOKEN).unwrap(), "stars:>0").unwrap();

    let failure = fetcher.fetch_page(None, 100).await.unwrap_err();

    assert!(failure.is_transient());
    assert!(matches!(failure, FetchFailure::Server { status: 403, .. }));
}
