use rocket::http::{ContentType, Status};
use rocket::local::blocking::{Client, LocalResponse};

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Uses Option<Client> so we can drop the DB connection before deleting the file.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        // Drop client first to release SQLite connection (WAL mode holds the file)
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    // Use unique temp DB for each test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/talkto_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let rocket = talkto::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Test client with custom rate limits (avoids env var races between tests).
pub fn test_client_with_rate_limits(config: talkto::rate_limit::RateLimitConfig) -> TestClient {
    let db_path = format!(
        "/tmp/talkto_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let rocket = talkto::rocket_with_db_and_config(&db_path, config);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        db_path,
    }
}

/// Onboard the first human. Sets the session cookie on the tracked client
/// and returns the response body (user + token).
pub fn onboard(client: &Client, name: &str) -> serde_json::Value {
    let res = client
        .post("/api/users/onboard")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    res.into_json().unwrap()
}

/// Create a channel and return its id.
pub fn create_channel(client: &Client, name: &str) -> String {
    let res = client
        .post("/api/channels")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Post a message and return the stored row.
pub fn post_message(client: &Client, channel_id: &str, content: &str) -> serde_json::Value {
    let res = client
        .post(format!("/api/channels/{channel_id}/messages"))
        .header(ContentType::JSON)
        .body(serde_json::json!({"content": content}).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    res.into_json().unwrap()
}

/// Find the id of the seeded #general channel.
pub fn general_channel_id(client: &Client) -> String {
    let res = client.get("/api/channels").dispatch();
    let channels: Vec<serde_json::Value> = res.into_json().unwrap();
    channels
        .iter()
        .find(|c| c["name"] == "#general")
        .expect("seeded #general")["id"]
        .as_str()
        .unwrap()
        .to_string()
}

// --- MCP helpers ---

/// One JSON-RPC exchange against /mcp. Returns (body, mcp-session-id header).
pub fn mcp_request(
    client: &Client,
    session: Option<&str>,
    method: &str,
    params: serde_json::Value,
) -> (serde_json::Value, Option<String>) {
    let envelope = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    });
    let mut req = client
        .post("/mcp")
        .header(ContentType::JSON)
        .body(envelope.to_string());
    if let Some(sid) = session {
        req = req.header(rocket::http::Header::new("mcp-session-id", sid.to_string()));
    }
    let res: LocalResponse = req.dispatch();
    let session_header = res
        .headers()
        .get_one("mcp-session-id")
        .map(|s| s.to_string());
    let body: serde_json::Value = res.into_json().unwrap_or(serde_json::json!({}));
    (body, session_header)
}

/// Initialize an MCP session and return its id.
pub fn mcp_initialize(client: &Client) -> String {
    let (body, session) = mcp_request(
        client,
        None,
        "initialize",
        serde_json::json!({"protocolVersion": "2024-11-05", "capabilities": {}}),
    );
    assert!(body["result"]["serverInfo"]["name"].is_string());
    session.expect("initialize returns a session id")
}

/// Call a tool and decode the JSON payload inside the content array.
pub fn mcp_tool(
    client: &Client,
    session: &str,
    tool: &str,
    arguments: serde_json::Value,
) -> serde_json::Value {
    let (body, _) = mcp_request(
        client,
        Some(session),
        "tools/call",
        serde_json::json!({"name": tool, "arguments": arguments}),
    );
    let text = body["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("tool {tool} returned no content: {body}"));
    serde_json::from_str(text).unwrap()
}

/// Register an agent over MCP and return the tool result.
pub fn register_agent(client: &Client, session: &str, project_path: &str) -> serde_json::Value {
    mcp_tool(
        client,
        session,
        "register",
        serde_json::json!({"session_id": uuid::Uuid::new_v4().to_string(), "project_path": project_path}),
    )
}
