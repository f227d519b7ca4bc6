pub mod admin;
pub mod dht;
pub mod utils;

use crate::utils::{RpcErr, RpcNamespace, RpcRequest, rpc_response};
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use koorde_p2p::LocalNode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Everything the RPC handlers need to serve a request. Cloned per
/// request; the node handle is a cheap `Arc` clone.
#[derive(Debug, Clone)]
pub struct RpcApiContext {
    pub node: LocalNode,
    /// Overall budget for one client operation, covering every lookup hop
    /// and the final forward.
    pub request_budget: Duration,
}

/// Single or batched JSON-RPC request, per the 2.0 spec.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RpcRequestWrapper {
    Single(RpcRequest),
    Multiple(Vec<RpcRequest>),
}

/// Serves the client API until the process exits.
pub async fn start_api(
    http_addr: &str,
    node: LocalNode,
    request_budget: Duration,
) -> Result<(), RpcErr> {
    let context = RpcApiContext {
        node,
        request_budget,
    };
    let router = Router::new()
        .route("/", post(handle_http_request))
        .with_state(context);
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|err| RpcErr::Internal(err.to_string()))?;
    info!(addr = %http_addr, "Starting HTTP-RPC server");
    axum::serve(listener, router)
        .await
        .map_err(|err| RpcErr::Internal(err.to_string()))
}

pub async fn handle_http_request(
    State(context): State<RpcApiContext>,
    body: String,
) -> Result<Json<Value>, StatusCode> {
    let response = match serde_json::from_str::<RpcRequestWrapper>(&body) {
        Ok(RpcRequestWrapper::Single(request)) => {
            let result = map_http_requests(&request, context).await;
            rpc_response(request.id, result)
        }
        Ok(RpcRequestWrapper::Multiple(requests)) => {
            let mut responses = Vec::new();
            for request in requests {
                let result = map_http_requests(&request, context.clone()).await;
                responses.push(rpc_response(request.id, result));
            }
            serde_json::to_value(responses).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        }
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };
    Ok(Json(response))
}

/// Routes one parsed request to its namespace handler.
pub async fn map_http_requests(
    request: &RpcRequest,
    context: RpcApiContext,
) -> Result<Value, RpcErr> {
    debug!(method = %request.method, "Handling RPC request");
    match request.namespace()? {
        RpcNamespace::Dht => dht::map_dht_requests(request, context).await,
        RpcNamespace::Admin => admin::map_admin_requests(request, context).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koorde_common::{Node, Space};
    use koorde_storage::Store;
    use std::time::Duration;

    fn context() -> RpcApiContext {
        let space = Space::new(8, 2, 2).unwrap();
        let node = LocalNode::new(
            Node::new(space.id_from_u64(0x01), "127.0.0.1:0"),
            space,
            Store::new(),
            Duration::from_millis(200),
        );
        node.create();
        RpcApiContext {
            node,
            request_budget: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn serves_single_and_batched_requests() {
        let context = context();
        let single = serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "dht_put",
            "params": [{"key": "a", "value": "1"}]
        })
        .to_string();
        let Json(response) = handle_http_request(State(context.clone()), single)
            .await
            .unwrap();
        assert_eq!(response["result"], Value::Null);
        assert_eq!(response["id"], 1);

        let batch = serde_json::json!([
            {"jsonrpc": "2.0", "id": 2, "method": "dht_get", "params": [{"key": "a"}]},
            {"jsonrpc": "2.0", "id": 3, "method": "dht_get", "params": [{"key": "missing"}]},
        ])
        .to_string();
        let Json(responses) = handle_http_request(State(context), batch).await.unwrap();
        assert_eq!(responses[0]["result"]["value"], "1");
        assert_eq!(responses[1]["error"]["code"], -32001);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let context = context();
        let outcome = handle_http_request(State(context), "not json".to_string()).await;
        assert_eq!(outcome.unwrap_err(), StatusCode::BAD_REQUEST);
    }
}
