use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use rmcp::ErrorData;
use serde_json::json;

use crate::clients::jma::JmaRemote;
use crate::core::mcp::ServerInfo;
use crate::core::tool::{object_schema, ToolProvider};

pub const TOOL_NAME: &str = "get-weather";

#[derive(Clone)]
pub struct WeatherProvider {
    jma: JmaRemote,
}

impl WeatherProvider {
    pub fn new(jma: JmaRemote) -> Self {
        Self { jma }
    }
}

#[async_trait]
impl ToolProvider for WeatherProvider {
    fn info(&self) -> ServerInfo {
        ServerInfo::new("天気予報サーバー", env!("CARGO_PKG_VERSION"))
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new(
            TOOL_NAME,
            "指定した都道府県の天気予報を返す",
            object_schema(json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "都道府県名の漢字、例「東京」、「北海道」"
                    }
                },
                "required": ["name"]
            })),
        )]
    }

    async fn call(&self, name: &str, arguments: JsonObject) -> Result<CallToolResult, ErrorData> {
        if name != TOOL_NAME {
            return Err(ErrorData::invalid_params(format!("unknown tool: {name}"), None));
        }
        let area = arguments
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ErrorData::invalid_params("missing required argument: name", None))?;

        let texts = self.jma.forecast_for(area).await.map_err(|e| {
            tracing::warn!(area, error = %e, "weather lookup failed");
            ErrorData::internal_error(format!("weather lookup failed: {e}"), None)
        })?;
        let text = if texts.is_empty() {
            format!("「{area}」に一致する地域が見つかりませんでした")
        } else {
            texts.join("---")
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}
