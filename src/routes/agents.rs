use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rusqlite::{Connection, params};

use super::{ApiError, ApiResult};
use crate::auth::{AuthContext, RequireUser};
use crate::db::{AGENT_COLS, Db, agent_from_row, resolve_channel};
use crate::events::{ChatEvent, EventBus};
use crate::invoke::InvocationEngine;
use crate::liveness::GhostMap;
use crate::models::{Agent, AgentView, DmBody, Message};

const MAX_CONTENT_LEN: usize = 32_000;

fn agent_by_name(conn: &Connection, workspace_id: &str, name: &str) -> ApiResult<Agent> {
    let sql = format!(
        "SELECT {AGENT_COLS} FROM agents a WHERE a.agent_name = ?1 AND a.workspace_id = ?2"
    );
    conn.query_row(&sql, params![name, workspace_id], agent_from_row)
        .map_err(|_| ApiError::NotFound("Agent not found".to_string()))
}

#[get("/api/agents")]
pub fn list_agents(
    auth: AuthContext,
    db: &State<Db>,
    ghosts: &State<GhostMap>,
) -> ApiResult<Json<Vec<AgentView>>> {
    let conn = db.conn();
    let sql = format!(
        "SELECT {AGENT_COLS} FROM agents a WHERE a.workspace_id = ?1 ORDER BY a.agent_name"
    );
    let mut stmt = conn.prepare(&sql).map_err(ApiError::from)?;
    let agents = stmt
        .query_map(params![&auth.workspace_id], agent_from_row)
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .map(|agent| AgentView {
            is_ghost: ghosts.is_ghost(&agent.id),
            agent,
        })
        .collect();
    Ok(Json(agents))
}

#[get("/api/agents/<name>")]
pub fn get_agent(
    auth: AuthContext,
    db: &State<Db>,
    ghosts: &State<GhostMap>,
    name: &str,
) -> ApiResult<Json<AgentView>> {
    let conn = db.conn();
    let agent = agent_by_name(&conn, &auth.workspace_id, name)?;
    Ok(Json(AgentView {
        is_ghost: ghosts.is_ghost(&agent.id),
        agent,
    }))
}

/// Direct message to an agent. Lazily creates the `#dm-<agent>` channel with
/// the caller and the agent as members, then runs the normal message path:
/// store, broadcast, invoke.
#[post("/api/agents/<name>/dm", format = "json", data = "<body>")]
pub fn dm_agent(
    user: RequireUser,
    db: &State<Db>,
    events: &State<EventBus>,
    engine: &State<Arc<InvocationEngine>>,
    name: &str,
    body: Json<DmBody>,
) -> ApiResult<(Status, Json<Message>)> {
    let content = body.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(ApiError::Validation(format!(
            "Content must be 1-{MAX_CONTENT_LEN} characters"
        )));
    }

    let conn = db.conn();
    let workspace_id = user.0.workspace_id.clone();
    let sender_id = user.0.user_id.clone().unwrap_or_default();
    let agent = agent_by_name(&conn, &workspace_id, name)?;

    let dm_name = format!("#dm-{}", agent.agent_name);
    let now = chrono::Utc::now().to_rfc3339();
    let channel = match resolve_channel(&conn, &workspace_id, &dm_name) {
        Some(channel) => channel,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO channels (id, name, channel_type, workspace_id, created_by, created_at)
                 VALUES (?1, ?2, 'dm', ?3, ?4, ?5)",
                params![&id, &dm_name, &workspace_id, &sender_id, &now],
            )
            .map_err(ApiError::from)?;
            resolve_channel(&conn, &workspace_id, &dm_name)
                .ok_or_else(|| ApiError::Internal("Failed to create DM channel".into()))?
        }
    };
    for member in [&sender_id, &agent.id] {
        conn.execute(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![&channel.id, member, &now],
        )
        .ok();
    }

    let sender_name: String = conn
        .query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![&sender_id],
            |r| r.get(0),
        )
        .map_err(ApiError::from)?;

    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO messages (id, channel_id, sender_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &channel.id, &sender_id, &content, &now],
    )
    .map_err(ApiError::from)?;

    let message = Message {
        id,
        channel_id: channel.id.clone(),
        sender_id,
        sender_name,
        content,
        mentions: None,
        parent_id: None,
        is_pinned: false,
        pinned_at: None,
        pinned_by: None,
        edited_at: None,
        created_at: now,
    };

    events.publish(ChatEvent::NewMessage {
        workspace_id: workspace_id.clone(),
        message: message.clone(),
    });
    engine.dispatch_for_message(&conn, &message, &channel, 0);

    Ok((Status::Created, Json(message)))
}
