//! Client side of an MCP session over any [`Transport`].
//!
//! Requests are correlated to responses by id through a pending map of
//! oneshot senders. Closing the transport fails every request still in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rmcp::model::{CallToolResult, JsonObject, Tool};
use serde_json::{json, Value as J};
use tokio::sync::oneshot;

use crate::core::error::GatewayError;
use crate::core::mcp::{
    method, InitializeParams, InitializeResult, Message, RequestId, RpcErr, ServerInfo,
    PROTOCOL_VERSION,
};
use crate::infra::runtime::channel::{Transport, TransportError};

type Reply = Result<J, RpcErr>;
type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>>;

pub struct McpClient {
    transport: Arc<dyn Transport>,
    pending: Pending,
    next_id: AtomicU64,
    server: ServerInfo,
}

impl McpClient {
    /// Wire handlers onto `transport`, start it and run the initialize
    /// handshake.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        client_info: ServerInfo,
    ) -> Result<Self, GatewayError> {
        let pending: Pending = Arc::default();

        let inbox = pending.clone();
        transport.set_on_message(Arc::new(move |msg| match msg {
            Message::Response(resp) => {
                let waiter = inbox
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&resp.id);
                let reply = match resp.error {
                    Some(e) => Err(e),
                    None => Ok(resp.result.unwrap_or(J::Null)),
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => tracing::warn!(id = resp.id, "response for unknown request"),
                }
            }
            other => tracing::trace!(message = ?other, "ignoring server-initiated message"),
        }));

        let orphans = pending.clone();
        transport.set_on_close(Box::new(move || {
            // Dropping the senders wakes every waiter with a closed error.
            orphans.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }));

        transport.start().await?;

        let mut client = Self {
            transport,
            pending,
            next_id: AtomicU64::new(1),
            server: ServerInfo::new("", ""),
        };

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            capabilities: json!({}),
            client_info,
        };
        let init: InitializeResult =
            serde_json::from_value(client.request(method::INITIALIZE, serde_json::to_value(params)?).await?)?;
        tracing::debug!(server = %init.server_info.name, version = %init.server_info.version, "mcp session initialized");
        client.server = init.server_info;
        client
            .transport
            .send(Message::notification(method::INITIALIZED, json!({})))
            .await?;
        Ok(client)
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    async fn request(&self, method: &str, params: J) -> Result<J, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        if let Err(e) = self.transport.send(Message::request(id, method, params)).await {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(GatewayError::Rpc { code: e.code, message: e.message }),
            Err(_) => Err(TransportError::Closed.into()),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, GatewayError> {
        let mut result = self.request(method::LIST_TOOLS, json!({})).await?;
        let tools = result.get_mut("tools").map(J::take).unwrap_or(J::Array(Vec::new()));
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, GatewayError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request(method::CALL_TOOL, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn close(&self) -> Result<(), GatewayError> {
        self.transport.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mcp::{code, err, ok};
    use crate::infra::runtime::channel::{channel_pair, Endpoint};

    /// Minimal hand-rolled server: answers initialize, echoes everything else
    /// or holds it unanswered.
    fn scripted_server(server: Endpoint, answer_calls: bool) -> Arc<Endpoint> {
        let server = Arc::new(server);
        let weak = Arc::downgrade(&server);
        server.set_on_message(Arc::new(move |m| {
            let Message::Request(req) = m else { return };
            let Some(ep) = weak.upgrade() else { return };
            let reply = match req.method.as_str() {
                method::INITIALIZE => ok(
                    req.id,
                    json!({"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name":"s","version":"1"}, "capabilities": {}}),
                ),
                method::LIST_TOOLS => ok(
                    req.id,
                    json!({"tools": [{"name":"t","description":"d","inputSchema":{"type":"object"}}]}),
                ),
                method::CALL_TOOL if answer_calls => ok(
                    req.id,
                    json!({"content":[{"type":"text","text":req.params["arguments"]["v"]}], "isError": false}),
                ),
                method::CALL_TOOL => return,
                _ => err(req.id, code::METHOD_NOT_FOUND, "nope", None),
            };
            tokio::spawn(async move {
                let _ = ep.send(reply).await;
            });
        }));
        server
    }

    #[tokio::test]
    async fn handshake_list_and_call() {
        let (server, client_ep) = channel_pair();
        let _server = scripted_server(server, true);
        let client = McpClient::connect(Arc::new(client_ep), ServerInfo::new("c", "1"))
            .await
            .unwrap();
        assert_eq!(client.server_info().name, "s");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "t");

        let mut args = JsonObject::new();
        args.insert("v".into(), json!("hello"));
        let out = client.call_tool("t", args).await.unwrap();
        assert_eq!(crate::core::content::joined_text(&out), "hello");
    }

    #[tokio::test]
    async fn close_fails_in_flight_requests() {
        let (server, client_ep) = channel_pair();
        let _server = scripted_server(server, false);
        let client = Arc::new(
            McpClient::connect(Arc::new(client_ep), ServerInfo::new("c", "1"))
                .await
                .unwrap(),
        );

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call_tool("t", JsonObject::new()).await });
        while client.pending.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        client.close().await.unwrap();

        let res = call.await.unwrap();
        assert!(matches!(res, Err(GatewayError::Transport(_))));
    }

    #[tokio::test]
    async fn requests_after_close_fail_fast() {
        let (server, client_ep) = channel_pair();
        let _server = scripted_server(server, true);
        let client = McpClient::connect(Arc::new(client_ep), ServerInfo::new("c", "1"))
            .await
            .unwrap();
        client.close().await.unwrap();
        let res = client.list_tools().await;
        assert!(matches!(res, Err(GatewayError::Transport(TransportError::Closed))));
    }
}
