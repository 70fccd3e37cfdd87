//! Tool registration and dispatch.

use serde_json::Value;

use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::{
    crawl_site, face_search, image_list, image_lookup, index_scan, index_stats, ToolContext,
};

pub struct ToolRegistry;

impl ToolRegistry {
    pub fn list_tools() -> Vec<ToolDefinition> {
        vec![
            crawl_site::definition(),
            index_scan::definition(),
            face_search::definition(),
            index_stats::definition(),
            image_lookup::definition(),
            image_list::definition(),
        ]
    }

    pub async fn call(
        name: &str,
        arguments: Option<Value>,
        ctx: &ToolContext,
    ) -> McpResult<ToolCallResult> {
        let args = arguments.unwrap_or(Value::Object(serde_json::Map::new()));

        match name {
            "crawl_site" => crawl_site::execute(args, ctx).await,
            "index_scan" => index_scan::execute(args, ctx).await,
            "face_search" => face_search::execute(args, ctx).await,
            "index_stats" => index_stats::execute(args, ctx).await,
            "image_lookup" => image_lookup::execute(args, ctx).await,
            "image_list" => image_list::execute(args, ctx).await,
            _ => Err(McpError::ToolNotFound(name.to_string())),
        }
    }
}
