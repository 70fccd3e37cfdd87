//! Tool: image_list. Most recently discovered images.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::ToolContext;

const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "image_list".to_string(),
        description: Some("List the most recently stored images, newest first".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 20, "maximum": MAX_LIMIT }
            }
        }),
    }
}

pub async fn execute(args: Value, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let params: ListParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let records = ctx.session.recent(params.limit.min(MAX_LIMIT)).await?;
    Ok(ToolCallResult::json(&json!({
        "total": records.len(),
        "images": records,
    })))
}
