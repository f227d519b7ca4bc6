//! `dht_*` methods: the client-facing key-value surface.

use crate::{
    RpcApiContext,
    utils::{RpcErr, RpcRequest},
};
use koorde_p2p::utils::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct NodeDto {
    pub id: String,
    pub addr: String,
}

impl From<&koorde_common::Node> for NodeDto {
    fn from(node: &koorde_common::Node) -> Self {
        Self {
            id: node.id.to_hex(),
            addr: node.addr.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct KeyRequest {
    key: String,
}

#[derive(Debug, Deserialize)]
struct LookupRequest {
    id: String,
}

fn first_param(request: &RpcRequest) -> Result<&Value, RpcErr> {
    request
        .params
        .as_ref()
        .and_then(|params| params.first())
        .ok_or_else(|| RpcErr::MissingParam("params[0]".to_string()))
}

pub async fn map_dht_requests(
    request: &RpcRequest,
    context: RpcApiContext,
) -> Result<Value, RpcErr> {
    match request.method.as_str() {
        "dht_put" => put(request, context).await,
        "dht_get" => get(request, context).await,
        "dht_delete" => delete(request, context).await,
        "dht_lookup" => lookup(request, context).await,
        unknown => Err(RpcErr::MethodNotFound(unknown.to_string())),
    }
}

async fn put(request: &RpcRequest, context: RpcApiContext) -> Result<Value, RpcErr> {
    let params: PutRequest = serde_json::from_value(first_param(request)?.clone())?;
    let ctx = Context::with_budget(context.request_budget);
    context.node.put(&params.key, &params.value, &ctx).await?;
    Ok(Value::Null)
}

async fn get(request: &RpcRequest, context: RpcApiContext) -> Result<Value, RpcErr> {
    let params: KeyRequest = serde_json::from_value(first_param(request)?.clone())?;
    let ctx = Context::with_budget(context.request_budget);
    let resource = context.node.get(&params.key, &ctx).await?;
    Ok(serde_json::json!({ "value": resource.value }))
}

async fn delete(request: &RpcRequest, context: RpcApiContext) -> Result<Value, RpcErr> {
    let params: KeyRequest = serde_json::from_value(first_param(request)?.clone())?;
    let ctx = Context::with_budget(context.request_budget);
    context.node.delete(&params.key, &ctx).await?;
    Ok(Value::Null)
}

async fn lookup(request: &RpcRequest, context: RpcApiContext) -> Result<Value, RpcErr> {
    let params: LookupRequest = serde_json::from_value(first_param(request)?.clone())?;
    let id = context
        .node
        .space()
        .id_from_hex(&params.id)
        .map_err(|err| RpcErr::BadParams(err.to_string()))?;
    let ctx = Context::with_budget(context.request_budget);
    let node = context.node.lookup(id, &ctx).await?;
    Ok(serde_json::json!({ "node": NodeDto::from(&node) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RpcRequestId;
    use koorde_common::{Node, Space};
    use koorde_storage::Store;
    use std::time::Duration;

    fn context() -> RpcApiContext {
        let space = Space::new(8, 2, 2).unwrap();
        let node = koorde_p2p::LocalNode::new(
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

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id: RpcRequestId::Number(1),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(vec![params]),
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let context = context();
        let put = request("dht_put", serde_json::json!({"key": "a", "value": "1"}));
        map_dht_requests(&put, context.clone()).await.unwrap();

        let get = request("dht_get", serde_json::json!({"key": "a"}));
        let got = map_dht_requests(&get, context.clone()).await.unwrap();
        assert_eq!(got, serde_json::json!({"value": "1"}));

        let delete = request("dht_delete", serde_json::json!({"key": "a"}));
        map_dht_requests(&delete, context.clone()).await.unwrap();
        let missing = map_dht_requests(&get, context).await.unwrap_err();
        assert!(matches!(missing, RpcErr::NotFound));
    }

    #[tokio::test]
    async fn lookup_resolves_on_a_single_node_ring() {
        let context = context();
        let lookup = request("dht_lookup", serde_json::json!({"id": "05"}));
        let resolved = map_dht_requests(&lookup, context.clone()).await.unwrap();
        assert_eq!(resolved["node"]["id"], "01");

        let bad = request("dht_lookup", serde_json::json!({"id": "zz"}));
        assert!(map_dht_requests(&bad, context).await.is_err());
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let context = context();
        let put = request("dht_put", serde_json::json!({"key": "", "value": "1"}));
        let err = map_dht_requests(&put, context).await.unwrap_err();
        assert!(matches!(err, RpcErr::BadParams(_)));
    }
}
