//! facecrawl MCP server: crawl, index, and face-search tools over JSON-RPC.

pub mod config;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{resolve_data_dir, resolve_model_path};
pub use protocol::ProtocolHandler;
pub use session::ScoutSession;
pub use transport::StdioTransport;
