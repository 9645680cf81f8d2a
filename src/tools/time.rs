use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Weekday};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use rmcp::ErrorData;
use serde_json::json;

use crate::core::mcp::ServerInfo;
use crate::core::tool::{object_schema, ToolProvider};

pub const TOOL_NAME: &str = "get-current-time";

#[derive(Clone, Default)]
pub struct TimeProvider;

fn weekday_ja(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "月曜日",
        Weekday::Tue => "火曜日",
        Weekday::Wed => "水曜日",
        Weekday::Thu => "木曜日",
        Weekday::Fri => "金曜日",
        Weekday::Sat => "土曜日",
        Weekday::Sun => "日曜日",
    }
}

/// `2025年1月6日月曜日 14:03:05`
pub fn format_japanese<Tz: TimeZone>(at: &DateTime<Tz>) -> String {
    format!(
        "{}年{}月{}日{} {:02}:{:02}:{:02}",
        at.year(),
        at.month(),
        at.day(),
        weekday_ja(at.weekday()),
        at.hour(),
        at.minute(),
        at.second()
    )
}

#[async_trait]
impl ToolProvider for TimeProvider {
    fn info(&self) -> ServerInfo {
        ServerInfo::new("時間表示サーバー", env!("CARGO_PKG_VERSION"))
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new(
            TOOL_NAME,
            "現在の時刻を返す",
            object_schema(json!({ "type": "object", "properties": {} })),
        )]
    }

    async fn call(&self, name: &str, _arguments: JsonObject) -> Result<CallToolResult, ErrorData> {
        if name != TOOL_NAME {
            return Err(ErrorData::invalid_params(format!("unknown tool: {name}"), None));
        }
        let now = format_japanese(&Local::now());
        tracing::debug!(tool = TOOL_NAME, now = %now, "time lookup");
        Ok(CallToolResult::success(vec![Content::text(now)]))
    }
}
