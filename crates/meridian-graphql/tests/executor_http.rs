//! End-to-end tests for HTTP query execution and response validation.

use std::time::Duration;

use meridian_graphql::{GraphQLClient, Operation};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn graphql_url(server: &MockServer) -> String {
    format!("{}/graphql", server.uri())
}

#[tokio::test]
async fn test_success_response_with_content_length() {
    let server = MockServer::start().await;
    // A body that is exactly 20 bytes, so Content-Length is 20.
    let body = r#"{"data":{"x":12345}}"#;
    assert_eq!(body.len(), 20);

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert_eq!(result.data, Some(json!({"x": 12345})));
    assert!(result.errors.is_none());
    assert!(!result.network_error);
    assert_eq!(result.size, 20);
}

#[tokio::test]
async fn test_server_error_becomes_network_error_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.network_error);
    assert_eq!(
        result.errors.unwrap()[0].message,
        "Internal Server Error"
    );
    assert!(result.data.is_none());
}

#[tokio::test]
async fn test_graphql_errors_clear_data() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"x": 1},
            "errors": [{"message": "field error"}]
        })))
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(!result.network_error);
    assert!(result.data.is_none());
    assert_eq!(result.errors.unwrap()[0].message, "field error");
}

#[tokio::test]
async fn test_4xx_body_is_parsed_by_default() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{"message": "syntax error"}]
        })))
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    let result = client
        .execute_mutation(&Operation::query("{"))
        .result
        .await;

    assert!(!result.network_error);
    assert_eq!(result.errors.unwrap()[0].message, "syntax error");
}

#[tokio::test]
async fn test_strict_mode_rejects_wrong_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"data":{"x":1}}"#, "text/plain"),
        )
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .strict_validation()
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.network_error);
    assert_eq!(result.errors.unwrap()[0].message, "OK");
}

#[tokio::test]
async fn test_strict_mode_accepts_graphql_response_json() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"data":{"x":1}}"#,
            "application/graphql-response+json",
        ))
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .strict_validation()
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.is_success());
    assert_eq!(result.data, Some(json!({"x": 1})));
}

#[tokio::test]
async fn test_strict_mode_requires_graphql_content_type_for_4xx() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errors": [{"message": "unknown document"}]
        })))
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .strict_validation()
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::document_id("missing"))
        .result
        .await;

    // application/json is not enough for a 4xx in strict mode.
    assert!(result.network_error);
    assert_eq!(result.errors.unwrap()[0].message, "Not Found");
}

#[tokio::test]
async fn test_malformed_json_becomes_network_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("not json", "application/json"))
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.network_error);
}

#[tokio::test]
async fn test_form_body_mode_sends_multipart_fields() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("name=\"query\""))
        .and(body_string_contains("name=\"variables\""))
        .and(body_string_contains("name=\"operationName\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .form_body()
        .build()
        .unwrap();
    let result = client
        .execute_mutation(
            &Operation::query("query Q($a: Int) { x(a: $a) }")
                .variable("a", 1)
                .operation_name("Q"),
        )
        .result
        .await;

    assert!(result.is_success());
    let requests = server.received_requests().await.unwrap();
    let content_type = requests[0]
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
}

#[tokio::test]
async fn test_document_id_as_query_parameter() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(query_param("documentId", "doc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .document_id_as_query()
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::document_id("doc-1"))
        .result
        .await;

    assert!(result.is_success());
    // The id moved to the URL and is no longer in the body.
    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(!body.contains("documentId"));
}

#[tokio::test]
async fn test_request_transform_is_applied() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("x-transformed", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .request_transform(|mut request| {
            Box::pin(async move {
                request
                    .headers_mut()
                    .insert("x-transformed", http::HeaderValue::from_static("1"));
                Ok(request)
            })
        })
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.is_success());
}

#[tokio::test]
async fn test_request_transform_failure_becomes_network_error() {
    let server = MockServer::start().await;

    let client = GraphQLClient::new(graphql_url(&server))
        .request_transform(|_request| {
            Box::pin(async move { Err("token refresh failed".into()) })
        })
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.network_error);
    assert!(result.errors.unwrap()[0]
        .message
        .contains("request transform failed"));
    assert_eq!(client.pending_requests(), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_error_logger_fires_on_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let logged = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = logged.clone();
    let client = GraphQLClient::new(graphql_url(&server))
        .log_http_error(move |_operation, payload| {
            assert_eq!(payload.status, 502);
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.network_error);
    assert_eq!(logged.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pending_counter_tracks_in_flight_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"ok": true}}))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    assert_eq!(client.pending_requests(), 0);

    let execution = client.execute_mutation(&Operation::query("{ x }"));
    assert_eq!(client.pending_requests(), 1);

    let result = execution.result.await;
    assert!(result.is_success());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_abort_cancels_in_flight_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"ok": true}}))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server)).build().unwrap();
    let execution = client.execute_mutation(&Operation::query("{ x }"));

    assert!(execution.abort.abort());
    // A second abort is harmless.
    assert!(!execution.abort.abort());

    let result = execution.result.await;
    assert!(result.network_error);
    assert!(result.errors.unwrap()[0].message.contains("aborted"));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_default_headers_and_bearer_auth() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer my-token"))
        .and(header("x-client", "meridian"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphQLClient::new(graphql_url(&server))
        .bearer_auth("my-token")
        .header("x-client", "meridian")
        .unwrap()
        .build()
        .unwrap();
    let result = client
        .execute_mutation(&Operation::query("{ x }"))
        .result
        .await;

    assert!(result.is_success());
}
