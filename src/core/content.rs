//! Tool result content as it travels to the completion API.

use rmcp::model::CallToolResult;
use serde_json::Value as JsonValue;

/// Typed content blocks (`[{type: text, text: ...}]`) for a tool-role message.
pub fn content_blocks(result: &CallToolResult) -> JsonValue {
    serde_json::to_value(&result.content).unwrap_or_else(|_| JsonValue::Array(Vec::new()))
}

/// Concatenated text of every text block, for logs and error messages.
pub fn joined_text(result: &CallToolResult) -> String {
    match content_blocks(result) {
        JsonValue::Array(blocks) => blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
