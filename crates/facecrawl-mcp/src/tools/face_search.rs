//! Tool: face_search. Rank indexed images by face size.

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::ToolContext;

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_search".to_string(),
        description: Some(
            "Find indexed images whose face area is close to the largest face in the query image. \
             A geometric proxy, not identity matching."
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_base64": { "type": "string", "description": "Query image bytes, base64" },
                "path": { "type": "string", "description": "Or a local file path" },
                "limit": { "type": "integer", "default": 50 }
            }
        }),
    }
}

pub async fn execute(args: Value, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let params: SearchParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let bytes = match (&params.image_base64, &params.path) {
        (Some(data), _) => base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| McpError::InvalidParams(format!("Invalid base64 image: {e}")))?,
        (None, Some(path)) => tokio::fs::read(path)
            .await
            .map_err(|e| McpError::InvalidParams(format!("Cannot read {path}: {e}")))?,
        (None, None) => {
            return Err(McpError::InvalidParams(
                "Either 'image_base64' or 'path' is required".to_string(),
            ));
        }
    };

    let result = ctx.session.search(bytes, params.limit).await?;
    Ok(ToolCallResult::json(&result))
}
