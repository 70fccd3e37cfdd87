//! Message framing for newline-delimited JSON.

use crate::types::{JsonRpcError, JsonRpcMessage, McpError, McpResult, RequestId};

/// Parse a single line of text as a JSON-RPC message.
pub fn parse_message(line: &str) -> McpResult<JsonRpcMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(McpError::ParseError("Empty message".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| McpError::ParseError(e.to_string()))
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message(value: &serde_json::Value) -> McpResult<String> {
    let mut json = serde_json::to_string(value).map_err(McpError::Json)?;
    json.push('\n');
    Ok(json)
}

/// Error response for a line that could not be parsed. The id is unknown.
pub fn parse_error_response(error: &McpError) -> McpResult<serde_json::Value> {
    let response: JsonRpcError = error.to_json_rpc_error(RequestId::Null);
    serde_json::to_value(response).map_err(|e| McpError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::error_codes;

    #[test]
    fn test_parse_request_and_notification() {
        let req = parse_message(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(_)));

        let notif =
            parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(notif, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_message("{not json").unwrap_err();
        assert_eq!(err.code(), error_codes::PARSE_ERROR);
        assert!(parse_message("   ").is_err());
    }

    #[test]
    fn test_frame_ends_with_newline() {
        let framed = frame_message(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(framed, "{\"a\":1}\n");
    }

    #[test]
    fn test_parse_error_response_has_null_id() {
        let value = parse_error_response(&McpError::ParseError("bad".into())).unwrap();
        assert!(value["id"].is_null());
        assert_eq!(value["error"]["code"], error_codes::PARSE_ERROR);
    }
}
