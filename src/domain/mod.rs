//! Completion API vocabulary (OpenAI-compatible chat completions).

use rmcp::model::Tool;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        /// Typed content blocks, e.g. `[{"type":"text","text":"..."}]`.
        content: JsonValue,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User { content: content.into() }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: JsonValue) -> Self {
        ChatMessage::Tool { tool_call_id: tool_call_id.into(), content }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Serialized JSON text. Some servers send an inline object instead;
    /// that is re-serialized on the way in.
    #[serde(default, deserialize_with = "string_or_json")]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_owned()
}

fn string_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => s,
        JsonValue::Null => String::new(),
        other => other.to_string(),
    })
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall { name: name.into(), arguments: arguments.into() },
        }
    }
}

/// A function definition in the shape the completion API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: JsonValue,
}

impl From<&Tool> for FunctionTool {
    fn from(tool: &Tool) -> Self {
        FunctionTool {
            kind: function_kind(),
            function: FunctionDef {
                name: tool.name.to_string(),
                description: tool.description.as_ref().map(|d| d.to_string()),
                parameters: JsonValue::Object(tool.input_schema.as_ref().clone()),
            },
        }
    }
}

impl FunctionTool {
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatRequest {
    /// Non-streamed request exposing `tools` (omitted when empty).
    pub fn decision(model: &str, messages: Vec<ChatMessage>, tools: &[FunctionTool]) -> Self {
        Self {
            model: model.to_owned(),
            messages,
            tools: (!tools.is_empty()).then(|| tools.to_vec()),
            max_completion_tokens: None,
            stream: None,
        }
    }

    /// Streamed request with an output cap and no tools.
    pub fn synthesis(model: &str, messages: Vec<ChatMessage>, max_output_tokens: u32) -> Self {
        Self {
            model: model.to_owned(),
            messages,
            tools: None,
            max_completion_tokens: Some(max_output_tokens),
            stream: Some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: AssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Choice {
    pub fn text(index: u32, content: impl Into<String>) -> Self {
        Self {
            index,
            message: AssistantMessage { content: Some(content.into()), tool_calls: None },
            finish_reason: Some("stop".into()),
        }
    }

    pub fn calls(index: u32, calls: Vec<ToolCall>) -> Self {
        Self {
            index,
            message: AssistantMessage { content: None, tool_calls: Some(calls) },
            finish_reason: Some("tool_calls".into()),
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls.as_deref().unwrap_or_default()
    }
}

/// One server-sent chunk of a streamed completion.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}
