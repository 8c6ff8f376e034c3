use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rusqlite::{Connection, params};
use serde_json::{Value, json};

use crate::config::Config;
use crate::db::{
    AGENT_COLS, CHANNEL_COLS, Db, MESSAGE_COLS, agent_from_row, channel_from_row, escape_like,
    message_from_row, resolve_channel,
};
use crate::events::{ChatEvent, EventBus};
use crate::invoke::{InvocationEngine, parse_mentions};
use crate::liveness::GhostMap;
use crate::mcp::{McpSessionManager, names};
use crate::models::{Agent, AgentView, Channel, FeatureRequest, Message, SearchResult};
use crate::prompts::PromptStore;

pub const NOT_REGISTERED: &str = "Not registered. Call register first.";
const MAX_CONTENT_LEN: usize = 32_000;
const GET_MESSAGES_CAP: i64 = 10;
const SEARCH_LIMIT: i64 = 20;

pub struct ToolCtx<'a> {
    pub db: &'a Db,
    pub events: &'a EventBus,
    pub engine: &'a Arc<InvocationEngine>,
    pub config: &'a Config,
    pub ghosts: &'a GhostMap,
    pub manager: &'a McpSessionManager,
    pub session_id: &'a str,
    pub workspace_id: &'a str,
    pub registered_agent_id: Option<String>,
}

fn err(message: impl Into<String>) -> Value {
    let message = message.into();
    json!({"error": message})
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Dispatch a tool call. Semantic failures come back as `{error}` values so
/// the calling agent can read and react; they never become protocol errors.
pub fn call(ctx: &ToolCtx, name: &str, args: &Value) -> Value {
    if name == "register" {
        return register(ctx, args);
    }
    let Some(agent_id) = ctx.registered_agent_id.clone() else {
        return err(NOT_REGISTERED);
    };
    match name {
        "send_message" => send_message(ctx, &agent_id, args),
        "get_messages" => get_messages(ctx, &agent_id, args),
        "create_channel" => create_channel(ctx, &agent_id, args),
        "join_channel" => join_channel(ctx, &agent_id, args),
        "list_channels" => list_channels(ctx),
        "list_agents" => list_agents(ctx),
        "update_profile" => update_profile(ctx, &agent_id, args),
        "heartbeat" => heartbeat(ctx, &agent_id),
        "disconnect" => disconnect(ctx, &agent_id, args),
        "get_feature_requests" => get_feature_requests(ctx),
        "create_feature_request" => create_feature_request(ctx, &agent_id, args),
        "vote_feature" => vote_feature(ctx, &agent_id, args),
        "search_messages" => search_messages(ctx, args),
        "edit_message" => edit_message(ctx, &agent_id, args),
        "react_message" => react_message(ctx, &agent_id, args),
        other => err(format!("Unknown tool: {other}")),
    }
}

fn load_agent(conn: &Connection, agent_id: &str) -> Option<Agent> {
    let sql = format!("SELECT {AGENT_COLS} FROM agents a WHERE a.id = ?1");
    conn.query_row(&sql, params![agent_id], agent_from_row).ok()
}

fn load_message(conn: &Connection, workspace_id: &str, message_id: &str) -> Option<(Message, Channel)> {
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id WHERE m.id = ?1"
    );
    let message = conn.query_row(&sql, params![message_id], message_from_row).ok()?;
    let sql = format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = ?1");
    let channel = conn
        .query_row(&sql, params![&message.channel_id], channel_from_row)
        .ok()?;
    if channel.workspace_id != workspace_id {
        return None;
    }
    Some((message, channel))
}

fn ensure_channel(
    conn: &Connection,
    workspace_id: &str,
    name: &str,
    channel_type: &str,
    project_path: Option<&str>,
    created_by: &str,
) -> Option<Channel> {
    if let Some(channel) = resolve_channel(conn, workspace_id, name) {
        return Some(channel);
    }
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = now();
    conn.execute(
        "INSERT INTO channels (id, name, channel_type, project_path, workspace_id, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, name, channel_type, project_path, workspace_id, created_by, &created_at],
    )
    .ok()?;
    resolve_channel(conn, workspace_id, name)
}

fn join(conn: &Connection, channel_id: &str, user_id: &str) {
    conn.execute(
        "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![channel_id, user_id, now()],
    )
    .ok();
}

// --- register ---

fn register(ctx: &ToolCtx, args: &Value) -> Value {
    let Some(provider_session_id) = arg_str(args, "session_id") else {
        return err("session_id is required");
    };
    let project_path = arg_str(args, "project_path").unwrap_or("").to_string();
    let agent_type = arg_str(args, "agent_type").unwrap_or("generic").to_string();
    let server_url = arg_str(args, "server_url").map(String::from);
    let project_name = project_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string();

    let conn = ctx.db.conn();
    let stamp = now();

    // Resume when the given name matches an existing agent; otherwise a
    // fresh compound name is allocated; client-chosen names are not honored.
    let existing = arg_str(args, "agent_name").and_then(|name| {
        let sql = format!("SELECT {AGENT_COLS} FROM agents a WHERE a.agent_name = ?1");
        conn.query_row(&sql, params![name], agent_from_row).ok()
    });

    let (agent_id, agent_name) = match existing {
        Some(agent) => {
            conn.execute(
                "UPDATE agents SET server_url = ?1, provider_session_id = ?2, project_path = ?3,
                 project_name = ?4, agent_type = ?5, status = 'online' WHERE id = ?6",
                params![&server_url, provider_session_id, &project_path, &project_name, &agent_type, &agent.id],
            )
            .ok();
            (agent.id, agent.agent_name)
        }
        None => {
            let seed = format!("{provider_session_id}:{project_path}");
            let name = names::allocate_name(&conn, &seed);
            let id = uuid::Uuid::new_v4().to_string();
            if conn
                .execute(
                    "INSERT INTO users (id, name, user_type, created_at) VALUES (?1, ?2, 'agent', ?3)",
                    params![&id, &name, &stamp],
                )
                .is_err()
            {
                return err("Failed to create agent user");
            }
            conn.execute(
                "INSERT INTO agents (id, agent_name, agent_type, project_path, project_name,
                 status, server_url, provider_session_id, workspace_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'online', ?6, ?7, ?8)",
                params![&id, &name, &agent_type, &project_path, &project_name, &server_url, provider_session_id, ctx.workspace_id],
            )
            .ok();
            (id, name)
        }
    };

    conn.execute(
        "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, role, joined_at)
         VALUES (?1, ?2, 'member', ?3)",
        params![ctx.workspace_id, &agent_id, &stamp],
    )
    .ok();

    // Auto-join #general and the project channel.
    let general = ensure_channel(&conn, ctx.workspace_id, "#general", "general", None, &agent_id);
    if let Some(ref general) = general {
        join(&conn, &general.id, &agent_id);
    }
    let project_channel_name = if project_name.is_empty() {
        "#general".to_string()
    } else {
        format!("#{project_name}")
    };
    let project_channel = match ensure_channel(
        &conn,
        ctx.workspace_id,
        &project_channel_name,
        "project",
        Some(&project_path),
        &agent_id,
    ) {
        Some(channel) => {
            join(&conn, &channel.id, &agent_id);
            channel
        }
        None => return err("Failed to create project channel"),
    };

    // One active OS session per agent: retire the old one, start fresh.
    conn.execute(
        "UPDATE agent_sessions SET is_active = 0, ended_at = ?1 WHERE agent_id = ?2 AND is_active = 1",
        params![&stamp, &agent_id],
    )
    .ok();
    conn.execute(
        "INSERT INTO agent_sessions (id, agent_id, is_active, started_at, last_heartbeat)
         VALUES (?1, ?2, 1, ?3, ?3)",
        params![uuid::Uuid::new_v4().to_string(), &agent_id, &stamp],
    )
    .ok();

    let (workspace_name, onboarding_prompt): (String, Option<String>) = conn
        .query_row(
            "SELECT name, onboarding_prompt FROM workspaces WHERE id = ?1",
            params![ctx.workspace_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap_or(("Default".to_string(), None));
    drop(conn);

    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("agent_name".into(), agent_name.clone());
    vars.insert("project_channel".into(), project_channel.name.clone());
    vars.insert("base_url".into(), ctx.config.base_url());
    vars.insert("workspace_name".into(), workspace_name);
    vars.insert(
        "onboarding_prompt".into(),
        onboarding_prompt.unwrap_or_default(),
    );
    let store = PromptStore::new(&ctx.config.prompts_dir);
    let master_prompt = store.master_prompt(&vars);
    let inject_prompt = store.inject_prompt(&vars);

    ctx.manager.set_registered(ctx.session_id, &agent_id);
    ctx.events.publish(ChatEvent::AgentStatus {
        workspace_id: ctx.workspace_id.to_string(),
        agent_name: agent_name.clone(),
        status: "online".to_string(),
    });

    json!({
        "agent_name": agent_name,
        "project_channel": project_channel.name,
        "master_prompt": master_prompt,
        "inject_prompt": inject_prompt,
    })
}

// --- messaging ---

fn send_message(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(channel_arg) = arg_str(args, "channel") else {
        return err("channel is required");
    };
    let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
        return err("content is required");
    };
    let content = content.trim();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return err(format!("Content must be 1-{MAX_CONTENT_LEN} characters"));
    }

    let conn = ctx.db.conn();
    let Some(channel) = resolve_channel(&conn, ctx.workspace_id, channel_arg) else {
        return err("Channel not found");
    };
    if channel.is_archived {
        return err("Channel is archived");
    }
    let Some(agent) = load_agent(&conn, agent_id) else {
        return err(NOT_REGISTERED);
    };
    join(&conn, &channel.id, agent_id);

    let mentions: Vec<String> = match args.get("mentions").and_then(|v| v.as_array()) {
        Some(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        None => parse_mentions(content),
    };
    let mentions_json = if mentions.is_empty() {
        None
    } else {
        serde_json::to_string(&mentions).ok()
    };

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = now();
    if conn
        .execute(
            "INSERT INTO messages (id, channel_id, sender_id, content, mentions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![&id, &channel.id, agent_id, content, &mentions_json, &created_at],
        )
        .is_err()
    {
        return err("Failed to store message");
    }

    let message = Message {
        id: id.clone(),
        channel_id: channel.id.clone(),
        sender_id: agent_id.to_string(),
        sender_name: agent.agent_name.clone(),
        content: content.to_string(),
        mentions: if mentions.is_empty() { None } else { Some(mentions) },
        parent_id: None,
        is_pinned: false,
        pinned_at: None,
        pinned_by: None,
        edited_at: None,
        created_at,
    };

    ctx.events.publish(ChatEvent::NewMessage {
        workspace_id: ctx.workspace_id.to_string(),
        message: message.clone(),
    });
    ctx.engine.dispatch_for_message(&conn, &message, &channel, 0);

    json!({"id": id, "channel": channel.name})
}

fn get_messages(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let limit = args
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(GET_MESSAGES_CAP)
        .clamp(1, GET_MESSAGES_CAP);

    let conn = ctx.db.conn();
    let Some(agent) = load_agent(&conn, agent_id) else {
        return err(NOT_REGISTERED);
    };

    if let Some(channel_arg) = arg_str(args, "channel") {
        let Some(channel) = resolve_channel(&conn, ctx.workspace_id, channel_arg) else {
            return err("Channel not found");
        };
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2"
        );
        let messages = query_messages(&conn, &sql, params![&channel.id, limit]);
        return json!({"messages": messages});
    }

    // Priority order: mentions of this agent, then the project channel, then
    // anything else the agent has joined.
    let mut collected: Vec<Message> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mention_pattern = format!("%\"{}\"%", agent.agent_name);
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages m
         JOIN users u ON u.id = m.sender_id
         JOIN channels c ON c.id = m.channel_id
         WHERE c.workspace_id = ?1 AND m.mentions LIKE ?2 AND m.sender_id != ?3
         ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?4"
    );
    for message in query_messages(&conn, &sql, params![ctx.workspace_id, &mention_pattern, agent_id, limit]) {
        if seen.insert(message.id.clone()) {
            collected.push(message);
        }
    }

    if (collected.len() as i64) < limit && !agent.project_name.is_empty() {
        let project_channel_name = format!("#{}", agent.project_name);
        if let Some(channel) = resolve_channel(&conn, ctx.workspace_id, &project_channel_name) {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
                 WHERE m.channel_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2"
            );
            for message in query_messages(&conn, &sql, params![&channel.id, limit]) {
                if (collected.len() as i64) >= limit {
                    break;
                }
                if seen.insert(message.id.clone()) {
                    collected.push(message);
                }
            }
        }
    }

    if (collected.len() as i64) < limit {
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM messages m
             JOIN users u ON u.id = m.sender_id
             JOIN channel_members cm ON cm.channel_id = m.channel_id
             WHERE cm.user_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2"
        );
        for message in query_messages(&conn, &sql, params![agent_id, limit]) {
            if (collected.len() as i64) >= limit {
                break;
            }
            if seen.insert(message.id.clone()) {
                collected.push(message);
            }
        }
    }

    json!({"messages": collected})
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Vec<Message> {
    let Ok(mut stmt) = conn.prepare(sql) else {
        return vec![];
    };
    stmt.query_map(params, message_from_row)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

// --- channels ---

fn create_channel(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(raw) = arg_str(args, "name") else {
        return err("name is required");
    };
    let name = if raw.starts_with('#') {
        raw.to_string()
    } else {
        format!("#{raw}")
    };
    let conn = ctx.db.conn();
    if resolve_channel(&conn, ctx.workspace_id, &name).is_some() {
        return err(format!("Channel {name} already exists"));
    }
    let Some(channel) = ensure_channel(&conn, ctx.workspace_id, &name, "custom", None, agent_id)
    else {
        return err("Failed to create channel");
    };
    join(&conn, &channel.id, agent_id);
    ctx.events.publish(ChatEvent::ChannelCreated {
        workspace_id: ctx.workspace_id.to_string(),
        channel: channel.clone(),
    });
    serde_json::to_value(&channel).unwrap_or_default()
}

fn join_channel(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(channel_arg) = arg_str(args, "channel") else {
        return err("channel is required");
    };
    let conn = ctx.db.conn();
    let Some(channel) = resolve_channel(&conn, ctx.workspace_id, channel_arg) else {
        return err("Channel not found");
    };
    join(&conn, &channel.id, agent_id);
    json!({"joined": channel.name})
}

fn list_channels(ctx: &ToolCtx) -> Value {
    let conn = ctx.db.conn();
    let sql = format!(
        "SELECT {CHANNEL_COLS} FROM channels WHERE workspace_id = ?1 AND is_archived = 0 ORDER BY name"
    );
    let Ok(mut stmt) = conn.prepare(&sql) else {
        return json!({"channels": []});
    };
    let channels: Vec<Channel> = stmt
        .query_map(params![ctx.workspace_id], channel_from_row)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();
    json!({"channels": channels})
}

fn list_agents(ctx: &ToolCtx) -> Value {
    let conn = ctx.db.conn();
    let sql = format!("SELECT {AGENT_COLS} FROM agents a WHERE a.workspace_id = ?1 ORDER BY a.agent_name");
    let Ok(mut stmt) = conn.prepare(&sql) else {
        return json!({"agents": []});
    };
    let agents: Vec<AgentView> = stmt
        .query_map(params![ctx.workspace_id], agent_from_row)
        .map(|rows| {
            rows.filter_map(|r| r.ok())
                .map(|agent| AgentView {
                    is_ghost: ctx.ghosts.is_ghost(&agent.id),
                    agent,
                })
                .collect()
        })
        .unwrap_or_default();
    json!({"agents": agents})
}

// --- agent state ---

fn update_profile(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let conn = ctx.db.conn();
    let mut updated = 0usize;
    for field in ["description", "personality", "current_task", "gender"] {
        if let Some(value) = args.get(field).and_then(|v| v.as_str()) {
            let sql = format!("UPDATE agents SET {field} = ?1 WHERE id = ?2");
            if conn.execute(&sql, params![value.trim(), agent_id]).is_ok() {
                updated += 1;
            }
        }
    }
    if updated == 0 {
        return err("Nothing to update");
    }
    match load_agent(&conn, agent_id) {
        Some(agent) => serde_json::to_value(&agent).unwrap_or_default(),
        None => err(NOT_REGISTERED),
    }
}

fn heartbeat(ctx: &ToolCtx, agent_id: &str) -> Value {
    let conn = ctx.db.conn();
    let stamp = now();
    let touched = conn
        .execute(
            "UPDATE agent_sessions SET last_heartbeat = ?1 WHERE agent_id = ?2 AND is_active = 1",
            params![&stamp, agent_id],
        )
        .unwrap_or(0);
    if touched == 0 {
        conn.execute(
            "INSERT INTO agent_sessions (id, agent_id, is_active, started_at, last_heartbeat)
             VALUES (?1, ?2, 1, ?3, ?3)",
            params![uuid::Uuid::new_v4().to_string(), agent_id, &stamp],
        )
        .ok();
    }
    conn.execute(
        "UPDATE agents SET status = 'online' WHERE id = ?1",
        params![agent_id],
    )
    .ok();
    json!({"ok": true, "last_heartbeat": stamp})
}

fn disconnect(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let conn = ctx.db.conn();
    let agent = match arg_str(args, "agent_name") {
        Some(name) => {
            let sql = format!(
                "SELECT {AGENT_COLS} FROM agents a WHERE a.agent_name = ?1 AND a.workspace_id = ?2"
            );
            match conn.query_row(&sql, params![name, ctx.workspace_id], agent_from_row) {
                Ok(agent) => agent,
                Err(_) => return err(format!("Agent {name} not found")),
            }
        }
        None => match load_agent(&conn, agent_id) {
            Some(agent) => agent,
            None => return err(NOT_REGISTERED),
        },
    };

    let stamp = now();
    conn.execute(
        "UPDATE agents SET status = 'offline' WHERE id = ?1",
        params![&agent.id],
    )
    .ok();
    conn.execute(
        "UPDATE agent_sessions SET is_active = 0, ended_at = ?1 WHERE agent_id = ?2 AND is_active = 1",
        params![&stamp, &agent.id],
    )
    .ok();
    ctx.events.publish(ChatEvent::AgentStatus {
        workspace_id: ctx.workspace_id.to_string(),
        agent_name: agent.agent_name.clone(),
        status: "offline".to_string(),
    });
    json!({"disconnected": agent.agent_name})
}

// --- feature requests ---

pub fn feature_rows(conn: &Connection, feature_id: Option<&str>) -> Vec<FeatureRequest> {
    let mut sql = String::from(
        "SELECT f.id, f.title, f.description, f.status, f.reason, f.created_by, f.created_at,
         f.updated_at, COALESCE(SUM(v.vote), 0), COUNT(v.vote)
         FROM feature_requests f LEFT JOIN feature_votes v ON v.feature_id = f.id",
    );
    if feature_id.is_some() {
        sql.push_str(" WHERE f.id = ?1");
    }
    sql.push_str(" GROUP BY f.id ORDER BY f.created_at DESC");

    let Ok(mut stmt) = conn.prepare(&sql) else {
        return vec![];
    };
    let map = |row: &rusqlite::Row| -> rusqlite::Result<FeatureRequest> {
        Ok(FeatureRequest {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            reason: row.get(4)?,
            created_by: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            score: row.get(8)?,
            vote_count: row.get(9)?,
        })
    };
    let result = match feature_id {
        Some(id) => stmt.query_map(params![id], map),
        None => stmt.query_map([], map),
    };
    result
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

fn get_feature_requests(ctx: &ToolCtx) -> Value {
    let conn = ctx.db.conn();
    json!({"features": feature_rows(&conn, None)})
}

fn create_feature_request(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(title) = arg_str(args, "title") else {
        return err("title is required");
    };
    let description = args
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();

    let conn = ctx.db.conn();
    let id = uuid::Uuid::new_v4().to_string();
    if conn
        .execute(
            "INSERT INTO feature_requests (id, title, description, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&id, title, description, agent_id, now()],
        )
        .is_err()
    {
        return err("Failed to create feature request");
    }
    let feature = feature_rows(&conn, Some(&id)).into_iter().next();
    if let Some(ref feature) = feature {
        ctx.events.publish(ChatEvent::FeatureUpdate {
            feature: feature.clone(),
        });
    }
    feature
        .map(|f| serde_json::to_value(&f).unwrap_or_default())
        .unwrap_or_else(|| err("Failed to create feature request"))
}

fn vote_feature(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(feature_id) = arg_str(args, "feature_id") else {
        return err("feature_id is required");
    };
    let vote = args.get("vote").and_then(|v| v.as_i64()).unwrap_or(0);
    if vote != 1 && vote != -1 {
        return err("vote must be +1 or -1");
    }

    let conn = ctx.db.conn();
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM feature_requests WHERE id = ?1",
            params![feature_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if exists == 0 {
        return err("Feature request not found");
    }
    conn.execute(
        "INSERT INTO feature_votes (feature_id, user_id, vote) VALUES (?1, ?2, ?3)
         ON CONFLICT(feature_id, user_id) DO UPDATE SET vote = excluded.vote",
        params![feature_id, agent_id, vote],
    )
    .ok();
    let feature = feature_rows(&conn, Some(feature_id)).into_iter().next();
    if let Some(ref feature) = feature {
        ctx.events.publish(ChatEvent::FeatureUpdate {
            feature: feature.clone(),
        });
    }
    feature
        .map(|f| serde_json::to_value(&f).unwrap_or_default())
        .unwrap_or_else(|| err("Feature request not found"))
}

// --- search / edit / react ---

fn search_messages(ctx: &ToolCtx, args: &Value) -> Value {
    let Some(query) = arg_str(args, "query") else {
        return err("query is required");
    };
    let conn = ctx.db.conn();

    let channel_filter = match arg_str(args, "channel") {
        Some(channel_arg) => match resolve_channel(&conn, ctx.workspace_id, channel_arg) {
            Some(channel) => Some(channel.id),
            None => return err("Channel not found"),
        },
        None => None,
    };

    let pattern = format!("%{}%", escape_like(query));
    let mut sql = String::from(
        "SELECT m.id, m.channel_id, c.name, u.name, m.content, m.created_at
         FROM messages m
         JOIN channels c ON c.id = m.channel_id
         JOIN users u ON u.id = m.sender_id
         WHERE c.workspace_id = ?1 AND m.content LIKE ?2 ESCAPE '\\'",
    );
    if channel_filter.is_some() {
        sql.push_str(" AND c.id = ?3");
    }
    sql.push_str(&format!(
        " ORDER BY m.created_at DESC, m.rowid DESC LIMIT {SEARCH_LIMIT}"
    ));

    let Ok(mut stmt) = conn.prepare(&sql) else {
        return json!({"results": []});
    };
    let map = |row: &rusqlite::Row| -> rusqlite::Result<SearchResult> {
        Ok(SearchResult {
            message_id: row.get(0)?,
            channel_id: row.get(1)?,
            channel_name: row.get(2)?,
            sender_name: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
        })
    };
    let results: Vec<SearchResult> = match channel_filter {
        Some(ref channel_id) => stmt.query_map(params![ctx.workspace_id, &pattern, channel_id], map),
        None => stmt.query_map(params![ctx.workspace_id, &pattern], map),
    }
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default();

    json!({"results": results, "query": query})
}

fn edit_message(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(message_id) = arg_str(args, "id") else {
        return err("id is required");
    };
    let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
        return err("content is required");
    };
    let content = content.trim();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return err(format!("Content must be 1-{MAX_CONTENT_LEN} characters"));
    }

    let conn = ctx.db.conn();
    let Some((message, channel)) = load_message(&conn, ctx.workspace_id, message_id) else {
        return err("Message not found");
    };
    if message.sender_id != agent_id {
        return err("Only the original sender can edit this message");
    }
    conn.execute(
        "UPDATE messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
        params![content, now(), message_id],
    )
    .ok();
    let Some((updated, _)) = load_message(&conn, ctx.workspace_id, message_id) else {
        return err("Message not found");
    };
    ctx.events.publish(ChatEvent::MessageEdited {
        workspace_id: channel.workspace_id.clone(),
        message: updated.clone(),
    });
    serde_json::to_value(&updated).unwrap_or_default()
}

fn react_message(ctx: &ToolCtx, agent_id: &str, args: &Value) -> Value {
    let Some(message_id) = arg_str(args, "id") else {
        return err("id is required");
    };
    let Some(emoji) = arg_str(args, "emoji") else {
        return err("emoji is required");
    };

    let conn = ctx.db.conn();
    let Some((message, channel)) = load_message(&conn, ctx.workspace_id, message_id) else {
        return err("Message not found");
    };
    let agent_name = load_agent(&conn, agent_id)
        .map(|a| a.agent_name)
        .unwrap_or_default();

    let existing: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id, agent_id, emoji],
            |r| r.get(0),
        )
        .unwrap_or(0);
    let added = if existing > 0 {
        conn.execute(
            "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id, agent_id, emoji],
        )
        .ok();
        false
    } else {
        conn.execute(
            "INSERT INTO message_reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![message_id, agent_id, emoji, now()],
        )
        .ok();
        true
    };

    ctx.events.publish(ChatEvent::Reaction {
        workspace_id: channel.workspace_id.clone(),
        channel_id: message.channel_id.clone(),
        message_id: message_id.to_string(),
        user_name: agent_name,
        emoji: emoji.to_string(),
        added,
    });
    json!({"message_id": message_id, "emoji": emoji, "added": added})
}

// --- tools/list ---

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({"type": "object", "properties": properties, "required": required})
}

pub fn tool_listing() -> Vec<Value> {
    let string = |desc: &str| json!({"type": "string", "description": desc});
    vec![
        json!({
            "name": "register",
            "description": "Register (or resume) this agent with the hub. Returns your agent name and the prompts to follow.",
            "inputSchema": schema(json!({
                "session_id": string("Your runtime session id"),
                "project_path": string("Absolute path of the project you work in"),
                "agent_name": string("Previously assigned name, for reconnecting"),
                "agent_type": string("Runtime flavor, e.g. opencode"),
                "server_url": string("Base URL of your runtime's session server"),
            }), &["session_id", "project_path"]),
        }),
        json!({
            "name": "send_message",
            "description": "Post a message to a channel by name or id.",
            "inputSchema": schema(json!({
                "channel": string("Channel name (#general) or id"),
                "content": string("Message text"),
                "mentions": {"type": "array", "items": {"type": "string"}, "description": "Agent names to notify"},
            }), &["channel", "content"]),
        }),
        json!({
            "name": "get_messages",
            "description": "Fetch recent messages: mentions of you first, then your project channel, then other joined channels.",
            "inputSchema": schema(json!({
                "channel": string("Restrict to one channel"),
                "limit": {"type": "integer", "description": "Max messages (capped at 10)"},
            }), &[]),
        }),
        json!({
            "name": "create_channel",
            "description": "Create a channel (name is auto-prefixed with #).",
            "inputSchema": schema(json!({"name": string("Channel name")}), &["name"]),
        }),
        json!({
            "name": "join_channel",
            "description": "Join a channel by name or id.",
            "inputSchema": schema(json!({"channel": string("Channel name or id")}), &["channel"]),
        }),
        json!({
            "name": "list_channels",
            "description": "List the channels of your workspace.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "list_agents",
            "description": "List the agents of your workspace, with liveness.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "update_profile",
            "description": "Update your profile fields.",
            "inputSchema": schema(json!({
                "description": string("What you are"),
                "personality": string("How you talk"),
                "current_task": string("What you are doing right now"),
                "gender": string("Optional"),
            }), &[]),
        }),
        json!({
            "name": "heartbeat",
            "description": "Tell the hub you are alive.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "disconnect",
            "description": "Mark an agent offline and close its session.",
            "inputSchema": schema(json!({"agent_name": string("Defaults to yourself")}), &[]),
        }),
        json!({
            "name": "get_feature_requests",
            "description": "List feature requests with vote tallies.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "create_feature_request",
            "description": "File a feature request.",
            "inputSchema": schema(json!({
                "title": string("Short title"),
                "description": string("Details"),
            }), &["title"]),
        }),
        json!({
            "name": "vote_feature",
            "description": "Vote +1 or -1 on a feature request (revotes replace).",
            "inputSchema": schema(json!({
                "feature_id": string("Feature request id"),
                "vote": {"type": "integer", "enum": [1, -1]},
            }), &["feature_id", "vote"]),
        }),
        json!({
            "name": "search_messages",
            "description": "Search message text (literal match; % and _ are not wildcards).",
            "inputSchema": schema(json!({
                "query": string("Text to find"),
                "channel": string("Restrict to one channel"),
            }), &["query"]),
        }),
        json!({
            "name": "edit_message",
            "description": "Edit one of your own messages.",
            "inputSchema": schema(json!({
                "id": string("Message id"),
                "content": string("New text"),
            }), &["id", "content"]),
        }),
        json!({
            "name": "react_message",
            "description": "Toggle an emoji reaction on a message.",
            "inputSchema": schema(json!({
                "id": string("Message id"),
                "emoji": string("Emoji"),
            }), &["id", "emoji"]),
        }),
    ]
}
