// MCP tool server: JSON-RPC 2.0 over POST /mcp, per the streamable HTTP
// transport. Each MCP session gets its own tool-server state keyed by the
// `mcp-session-id` header. A shared instance breaks the moment a second
// client initializes, so state is per-session by construction.

pub mod names;
pub mod tools;

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rocket::http::{ContentType, Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{State, post};

use crate::auth::AuthContext;
use crate::config::Config;
use crate::db::{DEFAULT_WORKSPACE_ID, Db};
use crate::events::EventBus;
use crate::invoke::InvocationEngine;
use crate::liveness::GhostMap;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "talkto";
/// Sessions not touched for this long are discarded on the next access.
const SESSION_IDLE_SECS: u64 = 3600;

/// Per-session tool-server state. Private to one `mcp-session-id`.
pub struct McpSession {
    pub registered_agent_id: Option<String>,
    pub workspace_id: String,
    last_used: Instant,
}

#[derive(Default)]
pub struct McpSessionManager {
    sessions: Mutex<HashMap<String, McpSession>>,
}

impl McpSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh session, pruning idle ones while we hold the lock.
    pub fn create(&self, workspace_id: String) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.last_used.elapsed() < Duration::from_secs(SESSION_IDLE_SECS));
        sessions.insert(
            id.clone(),
            McpSession {
                registered_agent_id: None,
                workspace_id,
                last_used: Instant::now(),
            },
        );
        id
    }

    /// Touch a session and return `(registered_agent_id, workspace_id)`.
    pub fn touch(&self, session_id: &str) -> Option<(Option<String>, String)> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.get_mut(session_id)?;
        session.last_used = Instant::now();
        Some((
            session.registered_agent_id.clone(),
            session.workspace_id.clone(),
        ))
    }

    pub fn set_registered(&self, session_id: &str, agent_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(session_id) {
            session.registered_agent_id = Some(agent_id.to_string());
        }
    }
}

// --- Transport plumbing ---

pub struct McpHeaders {
    pub session_id: Option<String>,
    pub wants_sse: bool,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for McpHeaders {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let session_id = req
            .headers()
            .get_one("mcp-session-id")
            .map(|s| s.to_string());
        let wants_sse = req
            .headers()
            .get_one("Accept")
            .map(|a| a.contains("text/event-stream"))
            .unwrap_or(false);
        Outcome::Success(McpHeaders {
            session_id,
            wants_sse,
        })
    }
}

/// JSON-RPC response rendered as plain JSON or as a single SSE event,
/// depending on what the client's Accept header asked for. Always echoes the
/// session id so clients can pick it up after `initialize`.
pub struct McpResponse {
    payload: Option<serde_json::Value>,
    session_id: Option<String>,
    sse: bool,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for McpResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let mut builder = match self.payload {
            Some(value) if self.sse => {
                let body = format!("event: message\ndata: {value}\n\n");
                let mut b = Response::build();
                b.header(ContentType::new("text", "event-stream"));
                b.sized_body(body.len(), Cursor::new(body));
                b
            }
            Some(value) => Response::build_from(Json(value).respond_to(req)?),
            None => {
                // Notification: acknowledged, no body.
                let mut b = Response::build();
                b.status(Status::Accepted);
                b
            }
        };
        if let Some(sid) = self.session_id {
            builder.header(Header::new("mcp-session-id", sid));
        }
        builder.ok()
    }
}

fn success(id: serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn rpc_error(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}

#[post("/mcp", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn mcp_endpoint(
    headers: McpHeaders,
    auth: Option<AuthContext>,
    db: &State<Db>,
    config: &State<Config>,
    events: &State<EventBus>,
    engine: &State<Arc<InvocationEngine>>,
    ghosts: &State<GhostMap>,
    manager: &State<McpSessionManager>,
    body: Json<serde_json::Value>,
) -> McpResponse {
    let message = body.into_inner();
    let id = message.get("id").cloned();
    let method = message
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or_default();
    let params = message
        .get("params")
        .cloned()
        .unwrap_or(serde_json::json!({}));

    // initialize allocates the session; everything else must echo it.
    if method == "initialize" {
        let workspace_id = auth
            .map(|a| a.workspace_id)
            .unwrap_or_else(|| DEFAULT_WORKSPACE_ID.to_string());
        let session_id = manager.create(workspace_id);
        let result = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        return McpResponse {
            payload: Some(success(id.unwrap_or(serde_json::Value::Null), result)),
            session_id: Some(session_id),
            sse: headers.wants_sse,
        };
    }

    let Some(session_id) = headers.session_id else {
        return McpResponse {
            payload: Some(rpc_error(
                id.unwrap_or(serde_json::Value::Null),
                -32000,
                "Missing mcp-session-id header",
            )),
            session_id: None,
            sse: headers.wants_sse,
        };
    };
    let Some((registered_agent_id, workspace_id)) = manager.touch(&session_id) else {
        return McpResponse {
            payload: Some(rpc_error(
                id.unwrap_or(serde_json::Value::Null),
                -32000,
                "Unknown or expired mcp-session-id",
            )),
            session_id: None,
            sse: headers.wants_sse,
        };
    };

    let payload = match method {
        "notifications/initialized" => None,
        "ping" => Some(success(
            id.unwrap_or(serde_json::Value::Null),
            serde_json::json!({}),
        )),
        "tools/list" => Some(success(
            id.unwrap_or(serde_json::Value::Null),
            serde_json::json!({"tools": tools::tool_listing()}),
        )),
        "tools/call" => {
            let name = params
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default();
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or(serde_json::json!({}));
            let ctx = tools::ToolCtx {
                db: db.inner(),
                events: events.inner(),
                engine: engine.inner(),
                config: config.inner(),
                ghosts: ghosts.inner(),
                manager: manager.inner(),
                session_id: &session_id,
                workspace_id: &workspace_id,
                registered_agent_id,
            };
            let result = tools::call(&ctx, name, &arguments);
            // Tool results ride inside a content array; semantic failures are
            // `{error}` objects in the text, never protocol errors.
            let wrapped = serde_json::json!({
                "content": [{"type": "text", "text": result.to_string()}],
            });
            Some(success(id.unwrap_or(serde_json::Value::Null), wrapped))
        }
        other => Some(rpc_error(
            id.unwrap_or(serde_json::Value::Null),
            -32601,
            &format!("Method not found: {other}"),
        )),
    };

    McpResponse {
        payload,
        session_id: Some(session_id),
        sse: headers.wants_sse,
    }
}
