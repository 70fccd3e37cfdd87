//! Tool: crawl_site. Crawl one website for images.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use facecrawl::CrawlRequest;

use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::ToolContext;

#[derive(Debug, Deserialize)]
struct CrawlParams {
    url: String,
    #[serde(default = "default_max_pages")]
    max_pages: usize,
    #[serde(default = "default_max_images")]
    max_images: usize,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

fn default_max_pages() -> usize {
    10
}

fn default_max_images() -> usize {
    200
}

fn default_delay_ms() -> u64 {
    500
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "crawl_site".to_string(),
        description: Some(
            "Breadth-first crawl of one website, downloading each distinct image once".to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Start URL (http or https). The crawl stays on this host." },
                "max_pages": { "type": "integer", "default": 10, "minimum": 1 },
                "max_images": { "type": "integer", "default": 200, "minimum": 1 },
                "delay_ms": { "type": "integer", "default": 500, "description": "Pause between page fetches" }
            },
            "required": ["url"]
        }),
    }
}

pub async fn execute(args: Value, ctx: &ToolContext) -> McpResult<ToolCallResult> {
    let params: CrawlParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    if params.max_pages == 0 || params.max_images == 0 {
        return Err(McpError::InvalidParams(
            "'max_pages' and 'max_images' must be at least 1".to_string(),
        ));
    }

    let request = CrawlRequest {
        start_url: params.url,
        max_pages: params.max_pages,
        max_images: params.max_images,
        politeness_delay: Duration::from_millis(params.delay_ms),
    };

    let summary = ctx.session.crawl(&request, ctx.cancel.clone()).await?;
    Ok(ToolCallResult::json(&summary))
}
