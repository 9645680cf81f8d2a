//! One query, start to finish: decide, dispatch tool calls, stream the answer.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::try_join_all;
use futures_util::StreamExt;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::clients::completion::CompletionApi;
use crate::core::content::{content_blocks, joined_text};
use crate::core::error::GatewayError;
use crate::core::tool::ToolProvider;
use crate::domain::{ChatMessage, ChatRequest, ChatResponse, ToolCall};
use crate::infra::config::OrchestratorConfig;
use crate::infra::logging::log_metric;
use crate::infra::runtime::limits::with_deadline;
use crate::infra::runtime::session::McpClient;
use crate::tools::bridge::{build_bridge, ToolBridge};

/// What the caller receives for one query. The channel closing after the
/// last `Chunk` marks a complete answer.
#[derive(Debug)]
pub enum QueryEvent {
    Chunk(String),
    Failed(GatewayError),
}

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    model: String,
    completion: Arc<dyn CompletionApi>,
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        model: impl Into<String>,
        completion: Arc<dyn CompletionApi>,
        providers: Vec<Arc<dyn ToolProvider>>,
    ) -> Self {
        Self { cfg, model: model.into(), completion, providers }
    }

    /// Run `query` on a background task and hand back its event stream.
    pub fn spawn_query(self: &Arc<Self>, query: String) -> mpsc::Receiver<QueryEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();
        tokio::spawn(async move {
            match this.run(&query, &tx).await {
                Ok(()) => {}
                Err(GatewayError::Disconnected) => tracing::info!("caller went away; query abandoned"),
                Err(e) => {
                    let _ = tx.send(QueryEvent::Failed(e)).await;
                }
            }
        });
        rx
    }

    /// Drive one query, forwarding text to `tx`. The bridge is built for this
    /// query only and shut down before returning, whatever the outcome.
    pub async fn run(&self, query: &str, tx: &mpsc::Sender<QueryEvent>) -> Result<(), GatewayError> {
        if query.trim().is_empty() {
            return Err(GatewayError::Validation("query is required".into()));
        }
        let start = Instant::now();
        let bridge = build_bridge(&self.providers).await?;
        let res = self.converse(&bridge, query, tx).await;
        bridge.shutdown().await;

        match &res {
            Ok(()) => log_metric("query", "query_latency_ms", start.elapsed().as_millis() as f64),
            Err(e) => {
                tracing::warn!(error = %e, "query failed");
                log_metric("query", "query_error_total", 1.0);
            }
        }
        res
    }

    async fn converse(
        &self,
        bridge: &ToolBridge,
        query: &str,
        tx: &mpsc::Sender<QueryEvent>,
    ) -> Result<(), GatewayError> {
        let mut conversation = vec![ChatMessage::system(&self.cfg.system_prompt), ChatMessage::user(query)];
        let decision = self.decide(bridge, &conversation).await?;

        for choice in decision.choices {
            // Keyed on the calls, not `finish_reason`: Ollama reports `stop` next to tool calls.
            if choice.tool_calls().is_empty() {
                forward(tx, choice.message.content.unwrap_or_default()).await?;
                continue;
            }

            let mut content = choice.message.content;
            let mut calls = choice.message.tool_calls.unwrap_or_default();
            let mut round = 1;
            let answered = loop {
                self.dispatch(bridge, &mut conversation, content, calls).await?;
                if round >= self.cfg.max_tool_rounds {
                    break false;
                }
                round += 1;
                let next = self.decide(bridge, &conversation).await?;
                let Some(follow) = next.choices.into_iter().next() else {
                    break false;
                };
                if follow.tool_calls().is_empty() {
                    forward(tx, follow.message.content.unwrap_or_default()).await?;
                    break true;
                }
                content = follow.message.content;
                calls = follow.message.tool_calls.unwrap_or_default();
            };
            if !answered {
                self.synthesize(&conversation, tx).await?;
            }
        }
        Ok(())
    }

    async fn decide(&self, bridge: &ToolBridge, conversation: &[ChatMessage]) -> Result<ChatResponse, GatewayError> {
        let request = ChatRequest::decision(&self.model, conversation.to_vec(), bridge.definitions());
        let response = self.completion.complete(request).await?;
        tracing::debug!(
            choices = response.choices.len(),
            tool_calls = response.choices.iter().map(|c| c.tool_calls().len()).sum::<usize>(),
            "decision received"
        );
        Ok(response)
    }

    /// Resolve and run every call of one decision concurrently, then append
    /// the assistant turn and one tool message per call in request order.
    async fn dispatch(
        &self,
        bridge: &ToolBridge,
        conversation: &mut Vec<ChatMessage>,
        content: Option<String>,
        calls: Vec<ToolCall>,
    ) -> Result<(), GatewayError> {
        let mut planned = Vec::with_capacity(calls.len());
        for call in &calls {
            let name = &call.function.name;
            let client = bridge.route(name).ok_or_else(|| GatewayError::UnknownTool(name.clone()))?;
            let arguments = parse_arguments(name, &call.function.arguments)?;
            planned.push((call, client, arguments));
        }

        log_metric("dispatch", "tool_calls_per_decision", planned.len() as f64);
        let results = try_join_all(
            planned
                .into_iter()
                .map(|(call, client, arguments)| self.invoke(client, &call.function.name, arguments)),
        )
        .await?;

        let content = content.filter(|c| !c.is_empty());
        let replies: Vec<ChatMessage> = calls
            .iter()
            .zip(&results)
            .map(|(call, result)| ChatMessage::tool_result(&call.id, content_blocks(result)))
            .collect();
        conversation.push(ChatMessage::Assistant { content, tool_calls: calls });
        conversation.extend(replies);
        Ok(())
    }

    async fn invoke(
        &self,
        client: &McpClient,
        tool: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, GatewayError> {
        let start = Instant::now();
        let what = format!("tool {tool}");
        let result = with_deadline(&what, self.cfg.tool_timeout_ms, async {
            client.call_tool(tool, arguments).await.map_err(|e| match e {
                GatewayError::Rpc { message, .. } => GatewayError::ToolExecution { tool: tool.to_owned(), message },
                other => other,
            })
        })
        .await?;
        log_metric("dispatch", "tool_call_latency_ms", start.elapsed().as_millis() as f64);

        if result.is_error == Some(true) {
            return Err(GatewayError::ToolExecution { tool: tool.to_owned(), message: joined_text(&result) });
        }
        tracing::debug!(tool, "tool call completed");
        Ok(result)
    }

    async fn synthesize(&self, conversation: &[ChatMessage], tx: &mpsc::Sender<QueryEvent>) -> Result<(), GatewayError> {
        let request = ChatRequest::synthesis(&self.model, conversation.to_vec(), self.cfg.max_output_tokens);
        // Waiting for the response head counts against the idle deadline too.
        let mut stream =
            with_deadline("completion stream", self.cfg.stream_idle_timeout_ms, self.completion.stream(request))
                .await?;
        let mut fragments = 0usize;
        loop {
            let next = with_deadline("completion stream", self.cfg.stream_idle_timeout_ms, async {
                Ok(stream.next().await)
            })
            .await?;
            match next {
                Some(Ok(text)) => {
                    fragments += 1;
                    forward(tx, text).await?;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        log_metric("synthesis", "stream_fragments", fragments as f64);
        Ok(())
    }
}

async fn forward(tx: &mpsc::Sender<QueryEvent>, text: String) -> Result<(), GatewayError> {
    if text.is_empty() {
        return Ok(());
    }
    tx.send(QueryEvent::Chunk(text)).await.map_err(|_| GatewayError::Disconnected)
}

/// Arguments arrive as serialized JSON. Blank means no arguments; anything
/// else must be an object.
pub fn parse_arguments(tool: &str, raw: &str) -> Result<JsonObject, GatewayError> {
    if raw.trim().is_empty() {
        return Ok(JsonObject::new());
    }
    let invalid = |message: String| GatewayError::InvalidArguments { tool: tool.to_owned(), message };
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(JsonValue::Null) => Ok(JsonObject::new()),
        Ok(other) => Err(invalid(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(invalid(e.to_string())),
    }
}
