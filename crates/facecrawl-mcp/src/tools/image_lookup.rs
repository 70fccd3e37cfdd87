//! Tool: image_lookup. Fetch one image record by content hash.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::ToolContext;

#[derive(Debug, Deserialize)]
struct LookupParams {
    content_hash: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "image_lookup".to_string(),
        description: Some("Get the stored record and file path for one image".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {
                "content_hash": { "type": "string", "description": "SHA-256 hex of the image bytes" }
            },
            "required": ["content_hash"]
        }),
    }
}

pub async fn execute(args: Value, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let params: LookupParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let hash = params.content_hash.trim().to_ascii_lowercase();
    let record = ctx.session.lookup(&hash).await?;
    let path = ctx.session.image_dir().join(record.file_name());

    Ok(ToolCallResult::json(&json!({
        "record": record,
        "path": path.display().to_string(),
        "on_disk": path.exists(),
    })))
}
