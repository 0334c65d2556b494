//! Retry behavior of the shared HTTP client against flaky mock APIs.
//!
//! Server errors and refused connections are retried with backoff; anything else is
//! answered on the first attempt.

use ciscope_core::client::{Auth, GraphQlClient, HttpClient, RestClient};
use ciscope_core::config::{HttpConfig, RetryConfig};
use ciscope_core::IngestError;
use serde_json::{json, Map};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEAMS_QUERY: &str = "query($login: String!, $cursor: String) { organization(login: $login) { teams(first: 100, after: $cursor) { pageInfo { endCursor hasNextPage } nodes { slug } } } }";

fn http() -> HttpClient {
    let config = HttpConfig {
        timeout_secs: 5,
        retry: RetryConfig {
            enabled: true,
            initial_interval_ms: 10,
            max_interval_ms: 20,
            max_elapsed_secs: 1,
        },
    };
    HttpClient::new(Auth::Token("test-token".into()), &config).expect("client")
}

fn graphql(uri: &str) -> GraphQlClient {
    GraphQlClient::github(http(), &format!("{}/graphql", uri), "acme").expect("client")
}

fn rest(uri: &str) -> RestClient {
    RestClient::new(http(), format!("{}/", uri))
}

fn teams_page() -> serde_json::Value {
    json!({
        "data": { "organization": { "teams": {
            "pageInfo": { "hasNextPage": false, "endCursor": "c1" },
            "nodes": [{ "slug": "core" }]
        } } }
    })
}

#[tokio::test]
async fn test_graphql_retries_server_error_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(teams_page()))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let fetched = graphql(&server.uri())
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap();
    assert_eq!(fetched.data["nodes"], json!([{ "slug": "core" }]));
    assert!(fetched.errors.is_empty());
}

#[tokio::test]
async fn test_rest_retries_server_error_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let fetched = rest(&server.uri()).fetch("repos/acme/api/hooks").await.unwrap();
    assert_eq!(fetched.data, json!([{ "id": 1 }]));
    assert!(fetched.errors.is_empty());
}

#[tokio::test]
async fn test_graphql_persistent_server_error_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2..)
        .mount(&server)
        .await;

    let err = graphql(&server.uri())
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap_err();
    match err {
        IngestError::HttpStatus { status, .. } => assert_eq!(status, 503),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_rest_persistent_server_error_is_counted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/actions/secrets"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2..)
        .mount(&server)
        .await;

    let fetched = rest(&server.uri())
        .fetch("orgs/acme/actions/secrets")
        .await
        .unwrap();
    assert!(fetched.data.is_null());
    assert_eq!(fetched.errors.count_for_status(503), 1);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/environments"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .expect(1)
        .mount(&server)
        .await;

    let err = graphql(&server.uri())
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::HttpStatus { status: 401, .. }));

    let fetched = rest(&server.uri())
        .fetch("repos/acme/api/environments")
        .await
        .unwrap();
    assert_eq!(fetched.errors.count_for_status(404), 1);
}

#[tokio::test]
async fn test_refused_connection_becomes_transport_error() {
    // bind then release a port so nothing listens on it
    let uri = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };

    let err = rest(&uri).fetch("orgs/acme/actions/secrets").await.unwrap_err();
    assert!(matches!(err, IngestError::Transport { .. }));
}
