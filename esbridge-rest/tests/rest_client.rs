//! Transport tests against a mock HTTP server.

use esbridge_rest::{NodeAddress, RestClient, RestConfig, RestRequest, Transport, TransportError};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn start_server() -> (tokio::runtime::Runtime, MockServer) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let server = runtime.block_on(MockServer::start());
    (runtime, server)
}

fn node_of(server: &MockServer) -> NodeAddress {
    NodeAddress::parse(&server.uri(), 9200).unwrap()
}

#[test]
fn test_get_returns_status_and_body() {
    let (runtime, server) = start_server();
    runtime.block_on(
        Mock::given(method("GET"))
            .and(path("/twitter/_search"))
            .and(query_param("q", "user:kimchy"))
            .and(query_param("size", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "took": 2 })))
            .expect(1)
            .mount(&server),
    );

    let client = RestClient::with_defaults().unwrap();
    let response = client
        .execute(
            &node_of(&server),
            RestRequest::get("/twitter/_search")
                .raw_query("q=user:kimchy")
                .query("size", "5"),
        )
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().unwrap();
    assert_eq!(body["took"], 2);
}

#[test]
fn test_error_status_captures_body() {
    let (runtime, server) = start_server();
    runtime.block_on(
        Mock::given(method("DELETE"))
            .and(path("/missing"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string(r#"{"error":"index_not_found_exception"}"#),
            )
            .mount(&server),
    );

    let client = RestClient::with_defaults().unwrap();
    let err = client
        .execute(&node_of(&server), RestRequest::delete("/missing"))
        .unwrap_err();

    match err {
        TransportError::Status {
            method,
            path,
            status,
            body,
        } => {
            assert_eq!(method, "DELETE");
            assert_eq!(path, "/missing");
            assert_eq!(status, 404);
            assert!(body.contains("index_not_found_exception"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_ndjson_body_and_default_headers() {
    let (runtime, server) = start_server();
    runtime.block_on(
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .and(header("x-opaque-id", "job-42"))
            .and(body_string("{\"index\":{}}\n{\"a\":1}\n"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "errors": false })))
            .expect(1)
            .mount(&server),
    );

    let config = RestConfig::builder()
        .basic_auth("user", "pass")
        .default_header("X-Opaque-Id", "job-42")
        .build();
    let client = RestClient::new(config).unwrap();
    let response = client
        .execute(
            &node_of(&server),
            RestRequest::post("/_bulk").ndjson("{\"index\":{}}\n{\"a\":1}\n"),
        )
        .unwrap();

    assert!(response.status().is_success());
}

#[test]
fn test_pools_are_per_node_and_released_on_close() {
    let (runtime, first) = start_server();
    let second = runtime.block_on(MockServer::start());
    for server in [&first, &second] {
        runtime.block_on(
            Mock::given(method("GET"))
                .and(path("/"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
                .mount(server),
        );
    }

    let client = RestClient::with_defaults().unwrap();
    client.execute(&node_of(&first), RestRequest::get("/")).unwrap();
    client.execute(&node_of(&first), RestRequest::get("/")).unwrap();
    client.execute(&node_of(&second), RestRequest::get("/")).unwrap();
    assert_eq!(client.pooled_nodes().len(), 2);

    client.close();
    assert!(client.pooled_nodes().is_empty());
    assert!(matches!(
        client.execute(&node_of(&first), RestRequest::get("/")),
        Err(TransportError::Closed)
    ));
}

#[test]
fn test_unreachable_node_is_a_retryable_failure() {
    let config = RestConfig::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(2))
        .build();
    let client = RestClient::new(config).unwrap();

    let err = client
        .execute(&NodeAddress::new("127.0.0.1", 1), RestRequest::get("/"))
        .unwrap_err();

    assert!(err.is_retryable(), "unexpected error: {err:?}");
}
