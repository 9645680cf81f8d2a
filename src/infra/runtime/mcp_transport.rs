//! Server side of an MCP session: fronts a [`ToolProvider`] on a transport.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use rmcp::model::JsonObject;
use serde_json::{json, Value as J};
use tokio::task::JoinSet;

use crate::core::error::GatewayError;
use crate::core::mcp::{self, code, method, InitializeResult, Message, RpcReq, PROTOCOL_VERSION};
use crate::core::tool::ToolProvider;
use crate::infra::runtime::channel::Transport;

/// Request tasks of one provider session. Dropping the last handle aborts
/// whatever is still running.
#[derive(Clone, Default)]
pub struct ProviderTasks(Arc<Mutex<JoinSet<()>>>);

impl ProviderTasks {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished requests so a long session does not accumulate them.
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    /// Abort every request still in flight.
    pub fn abort_all(&self) {
        let mut set = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.is_empty() {
            tracing::debug!(in_flight = set.len(), "aborting provider requests");
        }
        set.abort_all();
    }

    pub fn in_flight(&self) -> usize {
        let mut set = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set.len()
    }
}

/// Attach `provider` to `transport` and start it. Requests are answered on
/// spawned tasks so the synchronous delivery path never blocks on a tool.
/// The returned [`ProviderTasks`] owns those tasks.
///
/// The handler holds the transport weakly; the caller keeps it alive for as
/// long as the session should answer.
pub async fn connect_provider<T: Transport>(
    provider: Arc<dyn ToolProvider>,
    transport: Arc<T>,
) -> Result<ProviderTasks, GatewayError> {
    let weak = Arc::downgrade(&transport);
    let server_name = provider.info().name;
    let tasks = ProviderTasks::default();
    let spawner = tasks.clone();
    transport.set_on_message(Arc::new(move |msg| match msg {
        Message::Request(req) => {
            let provider = provider.clone();
            let weak = weak.clone();
            spawner.spawn(async move {
                let id = req.id;
                let reply = handle_request(provider.as_ref(), req).await;
                match weak.upgrade() {
                    Some(ep) => {
                        if let Err(e) = ep.send(reply).await {
                            tracing::debug!(id, error = %e, "reply not delivered");
                        }
                    }
                    None => tracing::debug!(id, "transport gone before reply"),
                }
            });
        }
        Message::Notification(note) if note.method == method::INITIALIZED => {
            tracing::trace!("client initialized");
        }
        other => tracing::trace!(message = ?other, "ignoring message"),
    }));
    transport.set_on_close(Box::new(move || {
        tracing::debug!(server = %server_name, "provider transport closed");
    }));
    transport.start().await?;
    Ok(tasks)
}

async fn handle_request(provider: &dyn ToolProvider, req: RpcReq) -> Message {
    let id = req.id;
    match req.method.as_str() {
        method::INITIALIZE => {
            if let Err(e) = provider.ready().await {
                tracing::warn!(server = %provider.info().name, error = %e.message, "provider not ready");
                return Message::Response(mcp::RpcResp {
                    jsonrpc: mcp::JSONRPC_VERSION,
                    id,
                    result: None,
                    error: Some(e.into()),
                });
            }
            let init = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_owned(),
                server_info: provider.info(),
                capabilities: json!({ "tools": {} }),
            };
            match serde_json::to_value(init) {
                Ok(v) => mcp::ok(id, v),
                Err(e) => mcp::err(id, code::INTERNAL_ERROR, e.to_string(), None),
            }
        }
        method::LIST_TOOLS => mcp::ok(id, json!({ "tools": provider.tools() })),
        method::CALL_TOOL => {
            let Some(name) = req.params.get("name").and_then(J::as_str) else {
                return mcp::err(id, code::INVALID_PARAMS, "missing tool name", None);
            };
            let arguments = match req.params.get("arguments") {
                Some(J::Object(map)) => map.clone(),
                None | Some(J::Null) => JsonObject::new(),
                Some(_) => {
                    return mcp::err(id, code::INVALID_PARAMS, "arguments must be an object", None)
                }
            };
            tracing::debug!(tool = name, "tools/call invoked");
            match provider.call(name, arguments).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(v) => mcp::ok(id, v),
                    Err(e) => mcp::err(id, code::INTERNAL_ERROR, e.to_string(), None),
                },
                Err(e) => {
                    tracing::warn!(tool = name, error = %e.message, "tools/call error response");
                    Message::Response(mcp::RpcResp {
                        jsonrpc: mcp::JSONRPC_VERSION,
                        id,
                        result: None,
                        error: Some(e.into()),
                    })
                }
            }
        }
        other => mcp::err(id, code::METHOD_NOT_FOUND, format!("unknown method: {other}"), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mcp::ServerInfo;
    use crate::infra::runtime::channel::{channel_pair, Endpoint};
    use async_trait::async_trait;
    use rmcp::model::{CallToolResult, Content, Tool};
    use rmcp::ErrorData;
    use tokio::sync::mpsc;

    struct Fixed;

    #[async_trait]
    impl ToolProvider for Fixed {
        fn info(&self) -> ServerInfo {
            ServerInfo::new("fixed", "1.0.0")
        }
        fn tools(&self) -> Vec<Tool> {
            vec![Tool::new("fixed.answer", "always 42", JsonObject::new())]
        }
        async fn call(&self, name: &str, args: JsonObject) -> Result<CallToolResult, ErrorData> {
            if args.contains_key("fail") {
                return Err(ErrorData::internal_error(format!("{name} refused"), None));
            }
            Ok(CallToolResult::success(vec![Content::text("42")]))
        }
    }

    async fn attached() -> (Arc<Endpoint>, Endpoint, mpsc::UnboundedReceiver<Message>) {
        let (server, client) = channel_pair();
        let server = Arc::new(server);
        connect_provider(Arc::new(Fixed), server.clone()).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        client.set_on_message(Arc::new(move |m| {
            let _ = tx.send(m);
        }));
        (server, client, rx)
    }

    fn response(m: Message) -> mcp::RpcResp {
        match m {
            Message::Response(r) => r,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn answers_initialize_with_server_info() {
        let (_server, client, mut rx) = attached().await;
        client.send(Message::request(1, method::INITIALIZE, json!({}))).await.unwrap();
        let r = response(rx.recv().await.unwrap());
        assert_eq!(r.id, 1);
        assert_eq!(r.result.unwrap()["serverInfo"]["name"], "fixed");
    }

    #[tokio::test]
    async fn lists_tools_with_input_schema() {
        let (_server, client, mut rx) = attached().await;
        client.send(Message::request(2, method::LIST_TOOLS, json!({}))).await.unwrap();
        let result = response(rx.recv().await.unwrap()).result.unwrap();
        assert_eq!(result["tools"][0]["name"], "fixed.answer");
        assert!(result["tools"][0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn calls_tool_and_returns_content() {
        let (_server, client, mut rx) = attached().await;
        let params = json!({"name": "fixed.answer", "arguments": {}});
        client.send(Message::request(3, method::CALL_TOOL, params)).await.unwrap();
        let result = response(rx.recv().await.unwrap()).result.unwrap();
        assert_eq!(result["content"][0]["text"], "42");
    }

    #[tokio::test]
    async fn provider_error_becomes_protocol_error() {
        let (_server, client, mut rx) = attached().await;
        let params = json!({"name": "fixed.answer", "arguments": {"fail": true}});
        client.send(Message::request(4, method::CALL_TOOL, params)).await.unwrap();
        let err = response(rx.recv().await.unwrap()).error.unwrap();
        assert_eq!(err.code, code::INTERNAL_ERROR);
        assert!(err.message.contains("refused"));
    }

    #[tokio::test]
    async fn non_object_arguments_are_invalid_params() {
        let (_server, client, mut rx) = attached().await;
        let params = json!({"name": "fixed.answer", "arguments": [1, 2]});
        client.send(Message::request(5, method::CALL_TOOL, params)).await.unwrap();
        let err = response(rx.recv().await.unwrap()).error.unwrap();
        assert_eq!(err.code, code::INVALID_PARAMS);
    }

    struct Offline;

    #[async_trait]
    impl ToolProvider for Offline {
        fn info(&self) -> ServerInfo {
            ServerInfo::new("offline", "1.0.0")
        }
        fn tools(&self) -> Vec<Tool> {
            Vec::new()
        }
        async fn call(&self, _name: &str, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
            unreachable!()
        }
        async fn ready(&self) -> Result<(), ErrorData> {
            Err(ErrorData::internal_error("backend unreachable", None))
        }
    }

    #[tokio::test]
    async fn initialize_fails_when_provider_not_ready() {
        let (server, client) = channel_pair();
        let server = Arc::new(server);
        connect_provider(Arc::new(Offline), server.clone()).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_on_message(Arc::new(move |m| {
            let _ = tx.send(m);
        }));
        client.send(Message::request(7, method::INITIALIZE, json!({}))).await.unwrap();
        let err = response(rx.recv().await.unwrap()).error.unwrap();
        assert_eq!(err.code, code::INTERNAL_ERROR);
        assert!(err.message.contains("unreachable"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (_server, client, mut rx) = attached().await;
        client.send(Message::request(6, "nope", json!({}))).await.unwrap();
        let err = response(rx.recv().await.unwrap()).error.unwrap();
        assert_eq!(err.code, code::METHOD_NOT_FOUND);
    }

    struct Sleepy {
        finished: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl ToolProvider for Sleepy {
        fn info(&self) -> ServerInfo {
            ServerInfo::new("sleepy", "1.0.0")
        }
        fn tools(&self) -> Vec<Tool> {
            vec![Tool::new("sleepy.nap", "naps", JsonObject::new())]
        }
        async fn call(&self, _name: &str, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            self.finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(CallToolResult::success(vec![Content::text("rested")]))
        }
    }

    #[tokio::test]
    async fn abort_all_stops_in_flight_calls() {
        let finished = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (server, client) = channel_pair();
        let server = Arc::new(server);
        let tasks = connect_provider(Arc::new(Sleepy { finished: finished.clone() }), server.clone())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_on_message(Arc::new(move |m| {
            let _ = tx.send(m);
        }));

        let params = json!({"name": "sleepy.nap", "arguments": {}});
        client.send(Message::request(8, method::CALL_TOOL, params)).await.unwrap();
        assert_eq!(tasks.in_flight(), 1);
        tasks.abort_all();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(tasks.in_flight(), 0);
    }
}
