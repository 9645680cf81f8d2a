//! Per-query tool bridge: one channel pair and MCP session per provider,
//! aggregated into completion-API function definitions and a routing table.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use rmcp::model::Tool;

use crate::core::error::GatewayError;
use crate::core::mcp::ServerInfo;
use crate::core::tool::ToolProvider;
use crate::domain::FunctionTool;
use crate::infra::runtime::channel::{channel_pair, Endpoint, Transport};
use crate::infra::runtime::mcp_transport::{connect_provider, ProviderTasks};
use crate::infra::runtime::session::McpClient;

struct Attachment {
    provider: String,
    client: Arc<McpClient>,
    // The provider's handler holds this weakly; the bridge keeps it alive.
    server: Arc<Endpoint>,
    tasks: ProviderTasks,
}

#[derive(Default)]
pub struct ToolBridge {
    definitions: Vec<FunctionTool>,
    routes: HashMap<String, Arc<McpClient>>,
    attachments: Vec<Attachment>,
}

fn client_info() -> ServerInfo {
    ServerInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Attach every provider in list order. Any provider failing to connect or
/// list its tools fails the whole build; sessions opened so far are closed.
pub async fn build_bridge(providers: &[Arc<dyn ToolProvider>]) -> Result<ToolBridge, GatewayError> {
    let mut bridge = ToolBridge::default();
    for provider in providers {
        let name = provider.info().name;
        match attach(provider.clone()).await {
            Ok((attachment, tools)) => bridge.register(attachment, tools),
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "provider attach failed");
                bridge.shutdown().await;
                return Err(GatewayError::Bridge { provider: name, source: Box::new(e) });
            }
        }
    }
    tracing::debug!(
        providers = bridge.attachments.len(),
        tools = bridge.definitions.len(),
        "tool bridge ready"
    );
    Ok(bridge)
}

async fn attach(provider: Arc<dyn ToolProvider>) -> Result<(Attachment, Vec<Tool>), GatewayError> {
    let name = provider.info().name;
    let (server, client) = channel_pair();
    let server = Arc::new(server);
    let tasks = connect_provider(provider, server.clone()).await?;
    let client = match McpClient::connect(Arc::new(client), client_info()).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tasks.abort_all();
            let _ = server.close().await;
            return Err(e);
        }
    };
    let attachment = Attachment { provider: name, client: client.clone(), server, tasks };
    match client.list_tools().await {
        Ok(tools) => Ok((attachment, tools)),
        Err(e) => {
            let _ = client.close().await;
            attachment.tasks.abort_all();
            let _ = attachment.server.close().await;
            Err(e)
        }
    }
}

impl ToolBridge {
    fn register(&mut self, attachment: Attachment, tools: Vec<Tool>) {
        for tool in &tools {
            let def = FunctionTool::from(tool);
            let previous = self.routes.insert(def.name().to_owned(), attachment.client.clone());
            if let Some(prev) = previous {
                tracing::warn!(
                    tool = def.name(),
                    previous = %prev.server_info().name,
                    replacement = %attachment.provider,
                    "tool name collision; last registration wins"
                );
                if let Some(slot) = self.definitions.iter_mut().find(|d| d.name() == def.name()) {
                    *slot = def;
                    continue;
                }
            }
            self.definitions.push(def);
        }
        self.attachments.push(attachment);
    }

    /// Function definitions in first-registration order.
    pub fn definitions(&self) -> &[FunctionTool] {
        &self.definitions
    }

    pub fn route(&self, tool: &str) -> Option<&Arc<McpClient>> {
        self.routes.get(tool)
    }

    /// Close every session concurrently and wait for all of them. Provider
    /// requests still running are aborted. One failing close does not stop
    /// the others.
    pub async fn shutdown(&self) {
        let closes = self.attachments.iter().map(|a| async move {
            a.tasks.abort_all();
            if let Err(e) = a.client.close().await {
                tracing::warn!(provider = %a.provider, error = %e, "client close failed");
            }
            if let Err(e) = a.server.close().await {
                tracing::warn!(provider = %a.provider, error = %e, "server close failed");
            }
        });
        join_all(closes).await;
        tracing::debug!(providers = self.attachments.len(), "tool bridge shut down");
    }
}
