//! `admin_*` methods: node inspection.

use crate::{
    RpcApiContext,
    dht::NodeDto,
    utils::{RpcErr, RpcRequest},
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct RoutingTableDto {
    #[serde(rename = "self")]
    node: NodeDto,
    predecessor: Option<NodeDto>,
    successors: Vec<Option<NodeDto>>,
    debruijn: Vec<Option<NodeDto>>,
}

#[derive(Debug, Serialize)]
struct ResourceDto {
    key: String,
    raw_key: String,
    value: String,
}

pub async fn map_admin_requests(
    request: &RpcRequest,
    context: RpcApiContext,
) -> Result<Value, RpcErr> {
    match request.method.as_str() {
        "admin_nodeInfo" => node_info(context),
        "admin_routingTable" => routing_table(context),
        "admin_store" => store(context),
        unknown => Err(RpcErr::MethodNotFound(unknown.to_string())),
    }
}

fn node_info(context: RpcApiContext) -> Result<Value, RpcErr> {
    let space = context.node.space();
    Ok(serde_json::json!({
        "node": NodeDto::from(context.node.node()),
        "idBits": space.bits(),
        "degree": space.degree(),
        "successorListSize": space.successor_list_len(),
    }))
}

fn routing_table(context: RpcApiContext) -> Result<Value, RpcErr> {
    let table = context.node.table();
    let successors = (0..context.node.space().successor_list_len())
        .map(|i| table.get_successor(i).as_ref().map(NodeDto::from))
        .collect();
    let debruijn = table
        .debruijn_window()
        .iter()
        .map(|slot| slot.as_ref().map(NodeDto::from))
        .collect();
    let dto = RoutingTableDto {
        node: NodeDto::from(table.node()),
        predecessor: table.get_predecessor().as_ref().map(NodeDto::from),
        successors,
        debruijn,
    };
    serde_json::to_value(dto).map_err(RpcErr::from)
}

fn store(context: RpcApiContext) -> Result<Value, RpcErr> {
    let resources: Vec<ResourceDto> = context
        .node
        .store()
        .all()
        .map_err(|err| RpcErr::Internal(err.to_string()))?
        .into_iter()
        .map(|r| ResourceDto {
            key: r.key.to_hex(),
            raw_key: r.raw_key,
            value: r.value,
        })
        .collect();
    serde_json::to_value(resources).map_err(RpcErr::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::RpcRequestId;
    use koorde_common::{Node, Resource, Space};
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

    fn request(method: &str) -> RpcRequest {
        RpcRequest {
            id: RpcRequestId::Number(1),
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: None,
        }
    }

    #[tokio::test]
    async fn routing_table_reports_single_node_ring() {
        let context = context();
        let value = map_admin_requests(&request("admin_routingTable"), context)
            .await
            .unwrap();
        assert_eq!(value["self"]["id"], "01");
        assert_eq!(value["predecessor"]["id"], "01");
        assert_eq!(value["successors"][0]["id"], "01");
        assert_eq!(value["successors"][1], Value::Null);
        assert_eq!(value["debruijn"][0]["id"], "01");
    }

    #[tokio::test]
    async fn store_dump_lists_resources() {
        let context = context();
        let space = context.node.space().clone();
        context
            .node
            .store()
            .put(Resource::new(space.id_from_u64(0x10), "a", "1"))
            .unwrap();
        let value = map_admin_requests(&request("admin_store"), context)
            .await
            .unwrap();
        assert_eq!(value[0]["key"], "10");
        assert_eq!(value[0]["raw_key"], "a");
        assert_eq!(value[0]["value"], "1");
    }
}
