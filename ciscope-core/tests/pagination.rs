//! Paged fetcher integration tests against mock GitHub and CircleCI APIs.
//!
//! Covers the pagination termination rules and the fatal/tolerated error split.

use ciscope_core::client::{Auth, GraphQlClient, HttpClient, RestClient};
use ciscope_core::config::{HttpConfig, RetryConfig};
use ciscope_core::IngestError;
use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEAMS_QUERY: &str = "query($login: String!, $cursor: String) { organization(login: $login) { teams(first: 100, after: $cursor) { pageInfo { endCursor hasNextPage } nodes { slug } } } }";

fn http() -> HttpClient {
    let config = HttpConfig {
        timeout_secs: 5,
        retry: RetryConfig::disabled(),
    };
    HttpClient::new(Auth::Token("test-token".into()), &config).expect("client")
}

fn graphql(server: &MockServer) -> GraphQlClient {
    GraphQlClient::github(http(), &format!("{}/graphql", server.uri()), "acme").expect("client")
}

fn rest(server: &MockServer) -> RestClient {
    RestClient::new(http(), format!("{}/", server.uri()))
}

fn teams_page(slugs: &[&str], has_next_page: Value, end_cursor: Value) -> Value {
    let nodes: Vec<Value> = slugs.iter().map(|s| json!({ "slug": s })).collect();
    json!({
        "data": {
            "organization": {
                "teams": {
                    "pageInfo": { "hasNextPage": has_next_page, "endCursor": end_cursor },
                    "nodes": nodes
                }
            }
        }
    })
}

fn items(count: usize) -> Vec<Value> {
    (0..count).map(|i| json!({ "id": i })).collect()
}

#[tokio::test]
async fn test_graphql_follows_cursor_until_last_page() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "cursor": "c1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(teams_page(
            &["three"],
            json!(false),
            json!("c2"),
        )))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "token test-token"))
        .and(body_partial_json(json!({ "variables": { "login": "acme" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(teams_page(
            &["one", "two"],
            json!(true),
            json!("c1"),
        )))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let fetched = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap();

    let slugs: Vec<&str> = fetched.data["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["slug"].as_str())
        .collect();
    assert_eq!(slugs, vec!["one", "two", "three"]);
    assert_eq!(fetched.data["pageInfo"]["hasNextPage"], json!(false));
    assert!(fetched.errors.is_empty());
}

#[tokio::test]
async fn test_graphql_missing_has_next_page_stops() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "organization": { "teams": { "nodes": [{ "slug": "one" }] } } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap();
    assert_eq!(fetched.data["nodes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_graphql_cursor_missing_with_next_page_stops() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(teams_page(
            &["one"],
            json!(true),
            Value::Null,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap();
    assert_eq!(fetched.data["nodes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_graphql_fatal_error_aborts() {
    let server = MockServer::start().await;
    let mut page = teams_page(&["one"], json!(false), Value::Null);
    page["errors"] = json!([{
        "type": "FORBIDDEN",
        "message": "Resource protected by organization SAML enforcement. You must grant your Personal Access token access to this organization."
    }]);
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page))
        .mount(&server)
        .await;

    let err = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap_err();
    match err {
        IngestError::FatalGraphQl {
            platform,
            error_type,
            ..
        } => {
            assert_eq!(platform, "GitHub");
            assert_eq!(error_type, "FORBIDDEN");
        }
        other => panic!("expected a fatal GraphQL error, got {other}"),
    }
}

#[tokio::test]
async fn test_graphql_tolerated_errors_are_counted() {
    let server = MockServer::start().await;
    let mut page = teams_page(&["one"], json!(false), Value::Null);
    page["errors"] = json!([
        { "type": "NOT_FOUND", "message": "Could not resolve to a node" },
        { "type": "NOT_FOUND", "message": "Could not resolve to a node" },
        { "message": "Something else" }
    ]);
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page))
        .mount(&server)
        .await;

    let fetched = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap();
    assert_eq!(fetched.errors.total(), 3);
    assert_eq!(fetched.errors.count_for_message("Could not resolve to a node"), 2);
    assert_eq!(fetched.errors.count_for_message("Something else"), 1);
    assert_eq!(fetched.data["nodes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_graphql_bad_gateway_carries_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap_err();
    match err {
        IngestError::HttpStatus {
            status, message, ..
        } => {
            assert_eq!(status, 502);
            assert!(message.contains("lowering"));
        }
        other => panic!("expected an HTTP status error, got {other}"),
    }
}

#[tokio::test]
async fn test_graphql_unparsable_body_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = graphql(&server)
        .fetch(TEAMS_QUERY, "organization.teams", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Parse { .. }));
}

#[tokio::test]
async fn test_rest_array_stops_on_short_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items(100))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items(3))))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = rest(&server).fetch("repos/acme/api/hooks").await.unwrap();
    assert_eq!(fetched.data.as_array().unwrap().len(), 103);
}

#[tokio::test]
async fn test_rest_object_stops_at_total_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/actions/secrets"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 150,
            "secrets": items(100)
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/actions/secrets"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 150,
            "secrets": items(50)
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/actions/secrets"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 150,
            "secrets": []
        })))
        .expect(0)
        .mount(&server)
        .await;

    let fetched = rest(&server)
        .fetch("orgs/acme/actions/secrets")
        .await
        .unwrap();
    assert_eq!(fetched.data["secrets"].as_array().unwrap().len(), 150);
    assert_eq!(fetched.data["total_count"], json!(150));
}

#[tokio::test]
async fn test_rest_error_status_is_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/environments"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetched = rest(&server)
        .fetch("repos/acme/api/environments")
        .await
        .unwrap();
    assert!(fetched.data.is_null());
    assert_eq!(fetched.errors.count_for_status(404), 1);
}

#[tokio::test]
async fn test_rest_shape_change_keeps_earlier_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items(100))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/hooks"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "hooks": items(1)
        })))
        .mount(&server)
        .await;

    let fetched = rest(&server).fetch("repos/acme/api/hooks").await.unwrap();
    assert_eq!(fetched.data.as_array().unwrap().len(), 100);
}

#[tokio::test]
async fn test_token_paging_follows_next_page_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/project/gh/acme/api/envvar"))
        .and(query_param("page-token", "next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "name": "B", "value": "xxxx5678" }],
            "next_page_token": null
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/project/gh/acme/api/envvar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "name": "A", "value": "xxxx1234" }],
            "next_page_token": "next"
        })))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let fetched = rest(&server)
        .fetch_token_paged("project/gh/acme/api/envvar", true)
        .await
        .unwrap();
    assert_eq!(fetched.data["items"].as_array().unwrap().len(), 2);
}
