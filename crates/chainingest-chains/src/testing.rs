//! Scripted transport for repository tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use chainingest_core::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use chainingest_core::{RpcTransport, TransportError};

type Handler = Box<dyn Fn(&JsonRpcRequest) -> JsonRpcResponse + Send + Sync>;

/// Answers every request through `handler` and records each network call.
pub(crate) struct MockTransport {
    handler: Handler,
    calls: Mutex<Vec<Vec<JsonRpcRequest>>>,
    reverse_batches: bool,
}

impl MockTransport {
    pub(crate) fn new(handler: impl Fn(&JsonRpcRequest) -> JsonRpcResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            reverse_batches: false,
        }
    }

    /// Answer batches in reverse order, like a provider that reorders.
    pub(crate) fn reversed(mut self) -> Self {
        self.reverse_batches = true;
        self
    }

    /// Number of round trips (a batch counts once).
    pub(crate) fn network_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub(crate) fn requests(&self) -> Vec<JsonRpcRequest> {
        self.calls.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = (self.handler)(&req);
        self.calls.lock().unwrap().push(vec![req]);
        Ok(resp)
    }

    async fn send_batch(&self, reqs: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let mut responses: Vec<_> = reqs.iter().map(|r| (self.handler)(r)).collect();
        if self.reverse_batches {
            responses.reverse();
        }
        self.calls.lock().unwrap().push(reqs);
        Ok(responses)
    }

    fn url(&self) -> &str {
        "mock://"
    }
}

/// An endpoint that refuses every connection.
#[derive(Default)]
pub(crate) struct DownTransport {
    attempts: AtomicUsize,
}

impl DownTransport {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for DownTransport {
    async fn send(&self, _req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Http("connection refused".into()))
    }

    async fn send_batch(&self, _reqs: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Http("connection refused".into()))
    }

    fn url(&self) -> &str {
        "mock://down"
    }
}

pub(crate) fn id_of(req: &JsonRpcRequest) -> u64 {
    req.id.as_u64().unwrap_or_default()
}

pub(crate) fn rpc_error(code: i64, message: &str) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.into(),
        data: None,
        name: None,
        cause: None,
    }
}
