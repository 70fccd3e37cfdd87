//! MCP tool implementations.

pub mod crawl_site;
pub mod face_search;
pub mod image_list;
pub mod image_lookup;
pub mod index_scan;
pub mod index_stats;
pub mod registry;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::session::ScoutSession;

pub use registry::ToolRegistry;

/// Everything a tool call can touch.
#[derive(Clone)]
pub struct ToolContext {
    pub session: Arc<ScoutSession>,
    /// Cancelled when the client sends `notifications/cancelled` for this call.
    pub cancel: CancellationToken,
}
