//! JSON-RPC 2.0 transport with request batching.
//!
//! A batch is one HTTP POST carrying an array of request frames; the node
//! answers with an array of response frames in arbitrary order. Responses are
//! matched back to their requests by id and returned in request order. The
//! transport is a trait so the follower can be driven by an in-process fake.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error response: {0}")]
    Rpc(String),
    #[error("malformed RPC frame: {0}")]
    Framing(String),
}

/// One call in a batch: method name plus params object.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: &'static str,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self { method, params }
    }
}

/// Executes a group of calls in one network round-trip.
#[async_trait]
pub trait BatchRpc: Send + Sync {
    /// Results come back in request order, each already unwrapped from its
    /// response frame. Any error frame fails the whole batch.
    async fn execute(&self, calls: &[RpcRequest]) -> Result<Vec<Value>, RpcError>;
}

/// Issue a single call and deserialize its result.
pub async fn call<T: DeserializeOwned>(
    rpc: &dyn BatchRpc,
    method: &'static str,
    params: Value,
) -> Result<T, RpcError> {
    let mut results = rpc.execute(&[RpcRequest::new(method, params)]).await?;
    let result = results
        .pop()
        .ok_or_else(|| RpcError::Framing("empty batch result".into()))?;
    serde_json::from_value(result).map_err(|e| RpcError::Framing(e.to_string()))
}

/// HTTP implementation of [BatchRpc].
pub struct HttpRpc {
    client: reqwest::Client,
    url: String,
}

impl HttpRpc {
    /// The timeout applies to every request on the endpoint.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        // no_proxy: system proxy lookup is unwanted for a node endpoint.
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BatchRpc for HttpRpc {
    async fn execute(&self, calls: &[RpcRequest]) -> Result<Vec<Value>, RpcError> {
        let body: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(id, call)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id as u64,
                    "method": call.method,
                    "params": call.params,
                })
            })
            .collect();
        let resp = self.client.post(&self.url).json(&body).send().await?;
        let resp = resp.error_for_status()?;
        let frames: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| RpcError::Framing(e.to_string()))?;
        collate(calls.len(), frames)
    }
}

/// Match response frames back to request ids 0..n, in request order.
fn collate(n: usize, frames: Vec<Value>) -> Result<Vec<Value>, RpcError> {
    if frames.len() != n {
        return Err(RpcError::Framing(format!(
            "batch of {} got {} responses",
            n,
            frames.len()
        )));
    }
    let mut out: Vec<Option<Value>> = Vec::new();
    out.resize_with(n, || None);
    for frame in frames {
        let id = frame
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Framing("response frame without integer id".into()))?
            as usize;
        if id >= n {
            return Err(RpcError::Framing(format!("unknown response id {id}")));
        }
        if let Some(err) = frame.get("error") {
            return Err(RpcError::Rpc(err.to_string()));
        }
        let result = frame
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Framing(format!("response {id} missing result")))?;
        if out[id].replace(result).is_some() {
            return Err(RpcError::Framing(format!("duplicate response id {id}")));
        }
    }
    // All slots filled: lengths match and ids were unique and in range.
    Ok(out.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u64, result: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    #[test]
    fn collate_reorders_by_id() {
        let frames = vec![frame(2, json!("c")), frame(0, json!("a")), frame(1, json!("b"))];
        let out = collate(3, frames).unwrap();
        assert_eq!(out, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn collate_rejects_count_mismatch() {
        let err = collate(2, vec![frame(0, json!(null))]).unwrap_err();
        assert!(matches!(err, RpcError::Framing(_)), "{err}");
    }

    #[test]
    fn collate_rejects_unknown_id() {
        let err = collate(1, vec![frame(5, json!(null))]).unwrap_err();
        assert!(matches!(err, RpcError::Framing(_)), "{err}");
    }

    #[test]
    fn collate_rejects_duplicate_id() {
        let frames = vec![frame(0, json!(1)), frame(0, json!(2))];
        let err = collate(2, frames).unwrap_err();
        assert!(matches!(err, RpcError::Framing(_)), "{err}");
    }

    #[test]
    fn collate_surfaces_error_member() {
        let frames = vec![json!({"jsonrpc": "2.0", "id": 0, "error": {"code": -32000, "message": "height out of range"}})];
        let err = collate(1, frames).unwrap_err();
        match err {
            RpcError::Rpc(msg) => assert!(msg.contains("height out of range")),
            other => panic!("expected Rpc error, got {other}"),
        }
    }

    #[test]
    fn collate_requires_result() {
        let frames = vec![json!({"jsonrpc": "2.0", "id": 0})];
        let err = collate(1, frames).unwrap_err();
        assert!(matches!(err, RpcError::Framing(_)), "{err}");
    }
}
