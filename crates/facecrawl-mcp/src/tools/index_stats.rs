//! Tool: index_stats. Catalog and face index statistics.

use serde_json::{json, Value};

use crate::types::{McpResult, ToolCallResult, ToolDefinition};

use super::ToolContext;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "index_stats".to_string(),
        description: Some("Image, scan, and face counts plus the most recent scans".to_string()),
        input_schema: json!({ "type": "object", "properties": {} }),
    }
}

pub async fn execute(_args: Value, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let stats = ctx.session.stats().await?;
    Ok(ToolCallResult::json(&stats))
}
