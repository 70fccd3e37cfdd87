//! Protocol-level integration tests for facecrawl-mcp.
//!
//! Drives the handler the way an MCP client would: handshake, tool calls
//! against a mock website, error codes, cancellation, and the stdio loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use facecrawl::{content_hash, CrawlRequest, FaceBox, FaceDetector, ScoutError, ScoutResult};
use facecrawl_mcp::protocol::ProtocolHandler;
use facecrawl_mcp::session::ScoutSession;
use facecrawl_mcp::transport::StdioTransport;
use facecrawl_mcp::types::*;

// ─────────────────────── helpers ───────────────────────

/// Detector that answers from a fixed table keyed on image bytes.
struct TableDetector {
    faces: HashMap<Vec<u8>, Vec<FaceBox>>,
}

impl FaceDetector for TableDetector {
    fn detect(&self, image_bytes: &[u8]) -> ScoutResult<Vec<FaceBox>> {
        self.faces
            .get(image_bytes)
            .cloned()
            .ok_or_else(|| ScoutError::Detection("unknown image".to_string()))
    }
}

fn square(side: u32) -> FaceBox {
    FaceBox::new(0, 0, side, side).unwrap()
}

/// Session over a temp dir with no model on disk.
fn bare_session(dir: &tempfile::TempDir) -> ScoutSession {
    ScoutSession::open(dir.path(), &dir.path().join("missing.onnx")).unwrap()
}

fn handler_for(session: ScoutSession) -> ProtocolHandler {
    ProtocolHandler::new(Arc::new(session))
}

fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    mcp_request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

fn init_request(version: &str) -> Value {
    mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": version,
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

async fn send(handler: &ProtocolHandler, msg: Value) -> Option<Value> {
    let parsed: JsonRpcMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed).await
}

async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg).await.expect("expected response")
}

/// Parse the JSON payload of a successful tool call.
fn tool_json(response: &Value) -> Value {
    assert!(
        response.get("error").is_none(),
        "unexpected error: {response}"
    );
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .expect("text content");
    serde_json::from_str(text).unwrap()
}

fn error_code(response: &Value) -> i64 {
    response["error"]["code"]
        .as_i64()
        .unwrap_or_else(|| panic!("expected error response, got {response}"))
}

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn png(len: usize, seed: u8) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.resize(len, seed);
    bytes
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, route: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(bytes),
        )
        .mount(server)
        .await;
}

/// Mock site with two distinct portraits and one duplicate of the first.
async fn portrait_site() -> (MockServer, Vec<u8>, Vec<u8>) {
    let server = MockServer::start().await;
    let alice = png(8000, 1);
    let bob = png(9000, 2);
    mount_page(
        &server,
        "/",
        r#"<html><head><title>Team</title></head><body>
           <img src="/alice.png"><img src="/bob.png"><a href="/more">more</a>
           </body></html>"#,
    )
    .await;
    mount_page(
        &server,
        "/more",
        r#"<html><head><title>Team</title></head><body><img src="/alice-copy.png"></body></html>"#,
    )
    .await;
    mount_image(&server, "/alice.png", alice.clone()).await;
    mount_image(&server, "/bob.png", bob.clone()).await;
    mount_image(&server, "/alice-copy.png", alice.clone()).await;
    (server, alice, bob)
}

fn crawl_args(server: &MockServer) -> Value {
    json!({ "url": format!("{}/", server.uri()), "max_pages": 5, "max_images": 50, "delay_ms": 0 })
}

// ─────────────────────── handshake and framing ───────────────────────

#[tokio::test]
async fn test_initialize_with_future_version_still_negotiates() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, init_request("2099-01-01")).await;
    assert_eq!(resp["result"]["protocolVersion"], MCP_VERSION);
    assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);
    assert!(resp["result"]["capabilities"]["tools"].is_object());

    let notif = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    assert!(send(&handler, notif).await.is_none());
}

#[tokio::test]
async fn test_initialize_without_params_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" })).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);
}

#[tokio::test]
async fn test_wrong_jsonrpc_version_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, json!({ "jsonrpc": "1.0", "id": 3, "method": "ping" })).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_REQUEST as i64);
    assert_eq!(resp["id"], 3);
}

#[tokio::test]
async fn test_ping_and_unknown_method() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let pong = send_unwrap(&handler, mcp_request(1, "ping", json!({}))).await;
    assert_eq!(pong["result"], json!({}));

    let resp = send_unwrap(&handler, mcp_request(2, "resources/list", json!({}))).await;
    assert_eq!(error_code(&resp), error_codes::METHOD_NOT_FOUND as i64);
}

#[tokio::test]
async fn test_tools_list_has_all_tools() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, mcp_request(1, "tools/list", json!({}))).await;
    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 6);
    for expected in [
        "crawl_site",
        "index_scan",
        "face_search",
        "index_stats",
        "image_lookup",
        "image_list",
    ] {
        assert!(names.contains(&expected), "missing {expected}");
    }
}

#[tokio::test]
async fn test_unknown_tool() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, tool_call(1, "vision_capture", json!({}))).await;
    assert_eq!(error_code(&resp), mcp_error_codes::TOOL_NOT_FOUND as i64);
}

// ─────────────────────── tool argument validation ───────────────────────

#[tokio::test]
async fn test_crawl_rejects_bad_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, tool_call(1, "crawl_site", json!({ "url": "ftp://example.com/" }))).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);

    let resp = send_unwrap(&handler, tool_call(2, "crawl_site", json!({}))).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);

    let resp = send_unwrap(
        &handler,
        tool_call(3, "crawl_site", json!({ "url": "https://example.com/", "max_pages": 0 })),
    )
    .await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);
}

#[tokio::test]
async fn test_detection_tools_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, tool_call(1, "index_scan", json!({}))).await;
    assert_eq!(error_code(&resp), mcp_error_codes::MODEL_NOT_AVAILABLE as i64);

    let encoded = base64::engine::general_purpose::STANDARD.encode(png(100, 9));
    let resp = send_unwrap(&handler, tool_call(2, "face_search", json!({ "image_base64": encoded }))).await;
    assert_eq!(error_code(&resp), mcp_error_codes::MODEL_NOT_AVAILABLE as i64);
}

#[tokio::test]
async fn test_face_search_input_errors() {
    let dir = tempfile::tempdir().unwrap();
    let session = bare_session(&dir).with_detector(Arc::new(TableDetector {
        faces: HashMap::new(),
    }));
    let handler = handler_for(session);

    let resp = send_unwrap(&handler, tool_call(1, "face_search", json!({ "image_base64": "!!!not base64" }))).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);

    let resp = send_unwrap(&handler, tool_call(2, "face_search", json!({}))).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);

    let resp = send_unwrap(&handler, tool_call(3, "face_search", json!({ "image_base64": "" }))).await;
    assert_eq!(error_code(&resp), error_codes::INVALID_PARAMS as i64);
}

#[tokio::test]
async fn test_lookup_missing_hash() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let resp = send_unwrap(&handler, tool_call(1, "image_lookup", json!({ "content_hash": "ab".repeat(32) }))).await;
    assert_eq!(error_code(&resp), mcp_error_codes::IMAGE_NOT_FOUND as i64);
}

// ─────────────────────── end to end ───────────────────────

#[tokio::test]
async fn test_crawl_then_list_and_lookup() {
    let (server, alice, _bob) = portrait_site().await;
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let summary = tool_json(&send_unwrap(&handler, tool_call(1, "crawl_site", crawl_args(&server))).await);
    assert_eq!(summary["pages_visited"], 2);
    assert_eq!(summary["images_found"], 3);
    assert_eq!(summary["images_downloaded"], 2);
    assert_eq!(summary["skipped"]["duplicate"], 1);
    assert_eq!(summary["cancelled"], false);

    let listing = tool_json(&send_unwrap(&handler, tool_call(2, "image_list", json!({}))).await);
    assert_eq!(listing["total"], 2);

    let hash = content_hash(&alice);
    let lookup = tool_json(&send_unwrap(&handler, tool_call(3, "image_lookup", json!({ "content_hash": hash }))).await);
    assert_eq!(lookup["on_disk"], true);
    assert_eq!(lookup["record"]["page_title"], "Team");
    // Either copy of the portrait may win the race to be stored.
    assert!(lookup["record"]["image_url"].as_str().unwrap().contains("/alice"));

    let stats = tool_json(&send_unwrap(&handler, tool_call(4, "index_stats", json!({}))).await);
    assert_eq!(stats["catalog"]["records"], 2);
    assert_eq!(stats["index"]["unscanned"], 2);
    assert_eq!(stats["detector_loaded"], false);
}

#[tokio::test(flavor = "current_thread")]
async fn test_session_reads_and_scan_failures() {
    let (server, alice, _bob) = portrait_site().await;
    let mut faces = HashMap::new();
    faces.insert(alice.clone(), vec![square(10)]);

    let dir = tempfile::tempdir().unwrap();
    let session = bare_session(&dir).with_detector(Arc::new(TableDetector { faces }));

    let request = CrawlRequest {
        start_url: format!("{}/", server.uri()),
        max_pages: 5,
        max_images: 50,
        politeness_delay: Duration::ZERO,
    };
    let summary = session
        .crawl(&request, tokio_util::sync::CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.images_downloaded, 2);

    assert_eq!(session.recent(10).await.unwrap().len(), 2);
    let record = session.lookup(&content_hash(&alice)).await.unwrap();
    assert_eq!(record.content_hash, content_hash(&alice));
    assert!(session.lookup(&"cd".repeat(32)).await.is_err());

    // Bob's portrait is unknown to the detector and fails every pass.
    for _ in 0..3 {
        session.scan(10).await.unwrap();
    }
    let stats = session.stats().await.unwrap();
    assert_eq!(stats.catalog.records, 2);
    assert_eq!(stats.index.scanned, 1);
    assert_eq!(stats.index.unscanned, 1);
    assert_eq!(stats.index.abandoned, 1);

    let report = session.scan(10).await.unwrap();
    assert_eq!(report.processed, 0);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_crawl_scan_search() {
    let (server, alice, bob) = portrait_site().await;
    let query = b"query portrait".to_vec();
    let blank = b"no faces here".to_vec();

    let mut faces = HashMap::new();
    faces.insert(alice.clone(), vec![square(10)]);
    faces.insert(bob.clone(), vec![square(30), square(4)]);
    faces.insert(query.clone(), vec![square(3), square(11)]);
    faces.insert(blank.clone(), vec![]);

    let dir = tempfile::tempdir().unwrap();
    let session = bare_session(&dir).with_detector(Arc::new(TableDetector { faces }));
    let handler = handler_for(session);

    tool_json(&send_unwrap(&handler, tool_call(1, "crawl_site", crawl_args(&server))).await);

    let report = tool_json(&send_unwrap(&handler, tool_call(2, "index_scan", json!({}))).await);
    assert_eq!(report["processed"], 2);
    assert_eq!(report["faces_found"], 3);

    // A second pass finds nothing left to do.
    let again = tool_json(&send_unwrap(&handler, tool_call(3, "index_scan", json!({}))).await);
    assert_eq!(again["processed"], 0);

    let encoded = base64::engine::general_purpose::STANDARD.encode(&query);
    let result = tool_json(&send_unwrap(&handler, tool_call(4, "face_search", json!({ "image_base64": encoded }))).await);
    assert_eq!(result["query_area"], 121);
    assert_eq!(result["faces_in_query"], 2);
    let matches = result["matches"].as_array().unwrap();
    // 100 is in band; 900 and 16 are not.
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["content_hash"], content_hash(&alice));
    assert_eq!(matches[0]["area"], 100);

    let encoded = base64::engine::general_purpose::STANDARD.encode(&blank);
    let resp = send_unwrap(&handler, tool_call(5, "face_search", json!({ "image_base64": encoded }))).await;
    assert_eq!(error_code(&resp), mcp_error_codes::NO_FACE_FOUND as i64);
}

// ─────────────────────── cancellation ───────────────────────

#[tokio::test]
async fn test_cancel_notification_stops_running_crawl() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/next">next</a>"#).await;
    mount_page(&server, "/next", "<p>never reached in time</p>").await;

    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let args = json!({ "url": format!("{}/", server.uri()), "max_pages": 5, "delay_ms": 60_000 });
    let running = {
        let handler = handler.clone();
        tokio::spawn(async move { send(&handler, tool_call(42, "crawl_site", args)).await })
    };

    let mut waited = 0;
    while handler.in_flight_count().await == 0 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(handler.in_flight_count().await, 1);

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 42, "reason": "user abort" }
    });
    assert!(send(&handler, cancel).await.is_none());

    let resp = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("crawl should stop promptly")
        .unwrap()
        .expect("response");
    let summary = tool_json(&resp);
    assert_eq!(summary["cancelled"], true);
    assert_eq!(summary["pages_visited"], 1);
    assert_eq!(handler.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_cancel_for_unknown_request_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let handler = handler_for(bare_session(&dir));

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": "nope" }
    });
    assert!(send(&handler, cancel).await.is_none());

    let pong = send_unwrap(&handler, mcp_request(1, "ping", json!({}))).await;
    assert!(pong.get("result").is_some());
}

// ─────────────────────── stdio loop ───────────────────────

#[tokio::test]
async fn test_stdio_serve_answers_every_request() {
    let dir = tempfile::tempdir().unwrap();
    let transport = StdioTransport::new(handler_for(bare_session(&dir)));

    let input = [
        init_request("2024-11-05").to_string(),
        "{this is not json".to_string(),
        String::new(),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string(),
        mcp_request(1, "tools/list", json!({})).to_string(),
        mcp_request(2, "ping", json!({})).to_string(),
    ]
    .join("\n")
        + "\n";

    let (server_out, mut client_in) = tokio::io::duplex(1 << 20);
    transport.serve(input.as_bytes(), server_out).await.unwrap();

    let mut output = String::new();
    client_in.read_to_string(&mut output).await.unwrap();

    let responses: Vec<Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(responses.len(), 4);

    let by_id = |id: Value| {
        responses
            .iter()
            .find(|r| r["id"] == id)
            .unwrap_or_else(|| panic!("no response for id {id}"))
    };
    assert!(by_id(json!(0))["result"]["serverInfo"].is_object());
    assert_eq!(by_id(Value::Null)["error"]["code"], error_codes::PARSE_ERROR);
    assert_eq!(by_id(json!(1))["result"]["tools"].as_array().unwrap().len(), 6);
    assert_eq!(by_id(json!(2))["result"], json!({}));
}
