use async_trait::async_trait;
use rmcp::model::{CallToolResult, JsonObject, Tool};
use rmcp::ErrorData;

use crate::core::mcp::ServerInfo;

/// A bundle of callable tools. Providers own no transport state; the bridge
/// fronts each one with a fresh channel pair per query.
#[async_trait]
pub trait ToolProvider: Send + Sync + 'static {
    fn info(&self) -> ServerInfo;

    /// Descriptors for every tool this provider answers. Names must be
    /// unique within the provider.
    fn tools(&self) -> Vec<Tool>;

    async fn call(&self, name: &str, arguments: JsonObject) -> Result<CallToolResult, ErrorData>;

    /// Checked while answering `initialize`; an error refuses the session.
    async fn ready(&self) -> Result<(), ErrorData> {
        Ok(())
    }
}

/// Build a JSON object schema from a `serde_json::json!` literal.
pub fn object_schema(value: serde_json::Value) -> JsonObject {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}
