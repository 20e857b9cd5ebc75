//! JSON-RPC helpers shared by the chain families.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use chainingest_core::request::{index_by_id, parse_hex_u64, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use chainingest_core::{RepositoryError, RpcTransport, TransportError};

/// Send one request; the response may still carry a node-side error.
pub(crate) async fn send(
    transport: &dyn RpcTransport,
    req: JsonRpcRequest,
) -> Result<JsonRpcResponse, RepositoryError> {
    transport.send(req).await.map_err(classify)
}

/// Send `reqs` as one batch and index the answers by id.
///
/// An empty batch is answered locally.
pub(crate) async fn batch(
    transport: &dyn RpcTransport,
    reqs: Vec<JsonRpcRequest>,
) -> Result<HashMap<u64, JsonRpcResponse>, RepositoryError> {
    if reqs.is_empty() {
        return Ok(HashMap::new());
    }
    let responses = transport.send_batch(reqs).await.map_err(classify)?;
    Ok(index_by_id(responses))
}

/// An unparseable body is the node breaking the protocol, not a transport fault.
fn classify(err: TransportError) -> RepositoryError {
    match err {
        TransportError::Deserialization(e) => RepositoryError::protocol(format!("unparseable response: {e}")),
        other => RepositoryError::Transport(other),
    }
}

/// Remove the answer to request `id`; a missing answer is a protocol error.
pub(crate) fn take(
    responses: &mut HashMap<u64, JsonRpcResponse>,
    id: u64,
    method: &str,
) -> Result<JsonRpcResponse, RepositoryError> {
    responses
        .remove(&id)
        .ok_or_else(|| RepositoryError::protocol(format!("{method}: no response for request id {id}")))
}

/// Result value of a response, or the node's error as a transport error.
pub(crate) fn result(resp: JsonRpcResponse) -> Result<Value, RepositoryError> {
    resp.into_result()
        .map_err(|e: JsonRpcError| RepositoryError::Transport(TransportError::Rpc(e)))
}

/// Deserialize `value`, turning a shape mismatch into a protocol error.
pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(value).map_err(|e| RepositoryError::protocol(format!("malformed {what}: {e}")))
}

/// Parse a hex quantity or fail with a protocol error naming the field.
pub(crate) fn hex(s: &str, field: &str) -> Result<u64, RepositoryError> {
    parse_hex_u64(s).ok_or_else(|| RepositoryError::protocol(format!("invalid hex in {field}: {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Answers every call with a body that is not JSON.
    struct GarbledTransport;

    fn garbled() -> TransportError {
        serde_json::from_str::<Value>("<html>bad gateway</html>")
            .unwrap_err()
            .into()
    }

    #[async_trait]
    impl RpcTransport for GarbledTransport {
        async fn send(&self, _req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            Err(garbled())
        }

        async fn send_batch(&self, _reqs: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, TransportError> {
            Err(garbled())
        }

        fn url(&self) -> &str {
            "mock://garbled"
        }
    }

    #[tokio::test]
    async fn unparseable_bodies_are_protocol_errors() {
        let err = send(&GarbledTransport, JsonRpcRequest::new(1, "eth_blockNumber", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Protocol(_)), "{err:?}");
        assert!(!err.is_retryable());

        let err = batch(&GarbledTransport, vec![JsonRpcRequest::new(1, "eth_blockNumber", vec![])])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Protocol(_)), "{err:?}");
    }

    #[test]
    fn other_transport_errors_pass_through() {
        let err = classify(TransportError::Timeout { ms: 10 });
        assert!(matches!(err, RepositoryError::Transport(TransportError::Timeout { .. })));
    }
}
