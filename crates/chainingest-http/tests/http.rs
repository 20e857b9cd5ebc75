use std::time::Duration;

use chainingest_core::policy::RetryConfig;
use chainingest_core::request::{index_by_id, JsonRpcRequest};
use chainingest_core::transport::RpcTransport;
use chainingest_core::TransportError;
use chainingest_http::{HttpClientConfig, HttpRpcClient};
use mockito::{Matcher, Server};
use serde_json::json;

fn client(url: &str, max_retries: u32) -> HttpRpcClient {
    HttpRpcClient::new(
        url,
        HttpClientConfig {
            retry: RetryConfig {
                max_retries,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
            },
            request_timeout: Duration::from_secs(5),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_send_single_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({ "method": "eth_blockNumber", "id": 1 })))
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#)
        .create_async()
        .await;

    let transport = client(&server.url(), 0);
    let resp = transport
        .send(JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
        .await
        .unwrap();

    assert_eq!(resp.into_result().unwrap(), json!("0x10"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let transport = client(&server.url(), 2);
    let err = transport
        .send(JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Http(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rpc_error_is_returned_without_retry() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":6969,"message":"block unavailable"}}"#)
        .expect(1)
        .create_async()
        .await;

    let transport = client(&server.url(), 3);
    let resp = transport
        .send(JsonRpcRequest::new(1, "eth_getBlockByNumber", vec![json!("0x1"), json!(false)]))
        .await
        .unwrap();

    assert_eq!(resp.into_result().unwrap_err().code, 6969);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_too_many_requests_maps_to_rate_limited() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .expect(1)
        .create_async()
        .await;

    let transport = client(&server.url(), 0);
    let err = transport
        .send(JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::RateLimited { .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_batch_is_one_post_and_correlates_by_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(r#"^\[.*"id":10.*"id":20.*"id":30.*\]$"#.into()))
        .with_body(
            r#"[{"jsonrpc":"2.0","id":30,"result":"c"},
                {"jsonrpc":"2.0","id":10,"result":"a"},
                {"jsonrpc":"2.0","id":20,"result":"b"}]"#,
        )
        .expect(1)
        .create_async()
        .await;

    let transport = client(&server.url(), 0);
    let reqs = [10u64, 20, 30]
        .iter()
        .map(|&id| JsonRpcRequest::new(id, "eth_getBlockByNumber", vec![]))
        .collect();
    let responses = index_by_id(transport.send_batch(reqs).await.unwrap());

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[&10].result, Some(json!("a")));
    assert_eq!(responses[&30].result, Some(json!("c")));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_batch_makes_no_request() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/").expect(0).create_async().await;

    let transport = client(&server.url(), 0);
    assert!(transport.send_batch(vec![]).await.unwrap().is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_malformed_body_is_a_deserialization_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_body("not json")
        .create_async()
        .await;

    let transport = client(&server.url(), 2);
    let err = transport
        .send(JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Deserialization(_)));
}
