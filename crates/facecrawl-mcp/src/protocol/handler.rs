//! Request dispatcher: receives JSON-RPC messages and routes them.
//!
//! Each request gets its own cancellation token, registered under the
//! request id for as long as the request runs. `notifications/cancelled`
//! trips the matching token, which a running crawl observes between pages
//! and between image dispatches.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::session::ScoutSession;
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::*;

use super::negotiation::NegotiatedCapabilities;
use super::validator::validate_request;

/// Dispatches incoming JSON-RPC messages. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProtocolHandler {
    session: Arc<ScoutSession>,
    capabilities: Arc<Mutex<NegotiatedCapabilities>>,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ProtocolHandler {
    pub fn new(session: Arc<ScoutSession>) -> Self {
        Self {
            session,
            capabilities: Arc::new(Mutex::new(NegotiatedCapabilities::default())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn session(&self) -> &Arc<ScoutSession> {
        &self.session
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif).await;
                None
            }
            _ => {
                tracing::warn!("Received unexpected message type from client");
                None
            }
        }
    }

    /// Cancel every running request. Used on shutdown and stdin EOF.
    pub async fn cancel_all(&self) {
        let in_flight = self.in_flight.lock().await;
        for token in in_flight.values() {
            token.cancel();
        }
    }

    /// Number of requests currently running.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        if let Err(e) = validate_request(&request) {
            return serde_json::to_value(e.to_json_rpc_error(request.id)).unwrap_or_default();
        }

        let id = request.id.clone();
        let key = id.key();
        let cancel = CancellationToken::new();
        self.in_flight.lock().await.insert(key.clone(), cancel.clone());

        let result = self.dispatch_request(&request, cancel).await;

        self.in_flight.lock().await.remove(&key);

        match result {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)).unwrap_or_default(),
            Err(e) => serde_json::to_value(e.to_json_rpc_error(id)).unwrap_or_default(),
        }
    }

    async fn dispatch_request(
        &self,
        request: &JsonRpcRequest,
        cancel: CancellationToken,
    ) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params.clone()).await,
            "shutdown" => self.handle_shutdown().await,

            "tools/list" => self.handle_tools_list().await,
            "tools/call" => self.handle_tools_call(request.params.clone(), cancel).await,

            "ping" => Ok(Value::Object(serde_json::Map::new())),

            _ => Err(McpError::MethodNotFound(request.method.clone())),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                self.capabilities.lock().await.mark_initialized();
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                self.handle_cancel(notification.params).await;
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    async fn handle_cancel(&self, params: Option<Value>) {
        let Some(params) = params
            .map(serde_json::from_value::<CancelRequestParams>)
            .and_then(Result::ok)
        else {
            tracing::warn!("Cancellation notification without a valid requestId");
            return;
        };

        let key = serde_json::to_string(&params.request_id).unwrap_or_default();
        match self.in_flight.lock().await.get(&key) {
            Some(token) => {
                tracing::info!(
                    "Cancelling request {key}{}",
                    params
                        .reason
                        .as_deref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                );
                token.cancel();
            }
            None => tracing::debug!("Cancellation for unknown or finished request {key}"),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let init_params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Initialize params required".to_string()))?;

        let mut caps = self.capabilities.lock().await;
        let result = caps.negotiate(init_params)?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_shutdown(&self) -> McpResult<Value> {
        tracing::info!("Shutdown requested");
        self.cancel_all().await;
        Ok(Value::Object(serde_json::Map::new()))
    }

    async fn handle_tools_list(&self) -> McpResult<Value> {
        let result = ToolListResult {
            tools: ToolRegistry::list_tools(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> McpResult<Value> {
        let call_params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Tool call params required".to_string()))?;

        let ctx = ToolContext {
            session: self.session.clone(),
            cancel,
        };
        let result = ToolRegistry::call(&call_params.name, call_params.arguments, &ctx).await?;

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }
}
