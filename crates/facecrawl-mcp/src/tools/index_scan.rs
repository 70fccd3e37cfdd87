//! Tool: index_scan. Run face detection over unscanned images.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::ToolContext;

#[derive(Debug, Deserialize)]
struct ScanParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "index_scan".to_string(),
        description: Some("Detect faces in stored images that have not been scanned yet".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 100, "description": "Maximum images to scan" }
            }
        }),
    }
}

pub async fn execute(args: Value, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let params: ScanParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let report = ctx.session.scan(params.limit).await?;
    Ok(ToolCallResult::json(&report))
}
