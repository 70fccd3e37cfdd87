//! Error types and JSON-RPC error codes for the MCP server.

use facecrawl::ScoutError;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP and facecrawl-specific error codes.
pub mod mcp_error_codes {
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const TOOL_NOT_FOUND: i32 = -32803;
    pub const IMAGE_NOT_FOUND: i32 = -32850;
    pub const NO_FACE_FOUND: i32 = -32851;
    pub const SCOUT_ERROR: i32 = -32852;
    pub const MODEL_NOT_AVAILABLE: i32 = -32853;
}

/// All errors that can occur in the MCP server.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("No face found in query image")]
    NoFaceFound,

    #[error("Face detection model not available: {0}")]
    ModelNotAvailable(String),

    #[error("{0}")]
    Scout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) | McpError::Io(_) => INTERNAL_ERROR,
            McpError::RequestCancelled => REQUEST_CANCELLED,
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::ImageNotFound(_) => IMAGE_NOT_FOUND,
            McpError::NoFaceFound => NO_FACE_FOUND,
            McpError::ModelNotAvailable(_) => MODEL_NOT_AVAILABLE,
            McpError::Scout(_) => SCOUT_ERROR,
            McpError::Json(_) => PARSE_ERROR,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        }
    }
}

impl From<ScoutError> for McpError {
    fn from(e: ScoutError) -> Self {
        match e {
            ScoutError::NoFaceFound => McpError::NoFaceFound,
            ScoutError::InvalidInput(msg) => McpError::InvalidParams(msg),
            ScoutError::ModelNotAvailable(msg) => McpError::ModelNotAvailable(msg),
            ScoutError::ImageNotFound(hash) => McpError::ImageNotFound(hash),
            other => McpError::Scout(other.to_string()),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
