use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post};
use rusqlite::params;

use super::channels::channel_in_workspace;
use super::{ApiError, ApiResult, ClientIp};
use crate::auth::{RequireUser, Role};
use crate::db::{Db, MESSAGE_COLS, message_from_row};
use crate::events::{ChatEvent, EventBus};
use crate::invoke::{InvocationEngine, parse_mentions};
use crate::models::{EditMessageBody, Message, PinBody, SendMessageBody};
use crate::rate_limit::{RateLimitConfig, RateLimiter};

const MAX_CONTENT_LEN: usize = 32_000;
const PAGE_LIMIT: i64 = 100;

#[get("/api/channels/<channel_id>/messages?<before>&<limit>")]
pub fn list_messages(
    user: RequireUser,
    db: &State<Db>,
    channel_id: &str,
    before: Option<&str>,
    limit: Option<i64>,
) -> ApiResult<Json<Vec<Message>>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let limit = limit.unwrap_or(50).clamp(1, PAGE_LIMIT);

    // Cursor pagination keyed on insert order (rowid breaks created_at ties).
    let mut messages: Vec<Message> = if let Some(before_id) = before {
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1
             AND m.rowid < (SELECT rowid FROM messages WHERE id = ?2)
             ORDER BY m.rowid DESC LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql).map_err(ApiError::from)?;
        stmt.query_map(params![&channel.id, before_id, limit], message_from_row)
            .map_err(ApiError::from)?
            .filter_map(|r| r.ok())
            .collect()
    } else {
        let sql = format!(
            "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1 ORDER BY m.rowid DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(ApiError::from)?;
        stmt.query_map(params![&channel.id, limit], message_from_row)
            .map_err(ApiError::from)?
            .filter_map(|r| r.ok())
            .collect()
    };

    messages.reverse(); // chronological order for the client
    Ok(Json(messages))
}

#[post("/api/channels/<channel_id>/messages", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn post_message(
    user: RequireUser,
    db: &State<Db>,
    events: &State<EventBus>,
    engine: &State<Arc<InvocationEngine>>,
    limiter: &State<Arc<RateLimiter>>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    channel_id: &str,
    body: Json<SendMessageBody>,
) -> ApiResult<(Status, Json<Message>)> {
    let rl = limiter.check_with_info(
        &format!("send_msg:{}", ip.0),
        rate_config.messages_max,
        rate_config.messages_window_secs,
    );
    if !rl.allowed {
        return Err(ApiError::RateLimited {
            retry_after_secs: rl.retry_after_secs,
        });
    }

    let content = body.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(ApiError::Validation(format!(
            "Content must be 1-{MAX_CONTENT_LEN} characters"
        )));
    }

    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    if channel.is_archived {
        return Err(ApiError::Conflict("Channel is archived".into()));
    }

    let parent_id = body
        .parent_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    if let Some(ref parent) = parent_id {
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1 AND channel_id = ?2",
                params![parent, &channel.id],
                |r| r.get(0),
            )
            .unwrap_or(0);
        if exists == 0 {
            return Err(ApiError::Validation(
                "parent_id does not reference a message in this channel".into(),
            ));
        }
    }

    let sender_id = user.0.user_id.clone().unwrap_or_default();
    let sender_name: String = conn
        .query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![&sender_id],
            |r| r.get(0),
        )
        .map_err(ApiError::from)?;

    let mentions: Vec<String> = match body.mentions {
        Some(ref m) if !m.is_empty() => m.clone(),
        _ => parse_mentions(&content),
    };
    let mentions_json = if mentions.is_empty() {
        None
    } else {
        serde_json::to_string(&mentions).ok()
    };

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (id, channel_id, sender_id, content, mentions, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, &channel.id, &sender_id, &content, &mentions_json, &parent_id, &created_at],
    )
    .map_err(ApiError::from)?;

    let message = Message {
        id,
        channel_id: channel.id.clone(),
        sender_id,
        sender_name,
        content,
        mentions: if mentions.is_empty() { None } else { Some(mentions) },
        parent_id,
        is_pinned: false,
        pinned_at: None,
        pinned_by: None,
        edited_at: None,
        created_at,
    };

    // Broadcast only after the row is durably stored.
    events.publish(ChatEvent::NewMessage {
        workspace_id: channel.workspace_id.clone(),
        message: message.clone(),
    });
    engine.dispatch_for_message(&conn, &message, &channel, 0);

    Ok((Status::Created, Json(message)))
}

fn load_message(
    conn: &rusqlite::Connection,
    channel_id: &str,
    message_id: &str,
) -> ApiResult<Message> {
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
         WHERE m.id = ?1 AND m.channel_id = ?2"
    );
    conn.query_row(&sql, params![message_id, channel_id], message_from_row)
        .map_err(|_| ApiError::NotFound("Message not found".to_string()))
}

#[patch("/api/channels/<channel_id>/messages/<message_id>", format = "json", data = "<body>")]
pub fn edit_message(
    user: RequireUser,
    db: &State<Db>,
    events: &State<EventBus>,
    channel_id: &str,
    message_id: &str,
    body: Json<EditMessageBody>,
) -> ApiResult<Json<Message>> {
    let content = body.content.trim().to_string();
    if content.is_empty() || content.len() > MAX_CONTENT_LEN {
        return Err(ApiError::Validation(format!(
            "Content must be 1-{MAX_CONTENT_LEN} characters"
        )));
    }

    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let message = load_message(&conn, &channel.id, message_id)?;
    if Some(&message.sender_id) != user.0.user_id.as_ref() {
        return Err(ApiError::Forbidden(
            "Only the original sender can edit this message".into(),
        ));
    }

    conn.execute(
        "UPDATE messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
        params![&content, chrono::Utc::now().to_rfc3339(), message_id],
    )
    .map_err(ApiError::from)?;

    let updated = load_message(&conn, &channel.id, message_id)?;
    events.publish(ChatEvent::MessageEdited {
        workspace_id: channel.workspace_id.clone(),
        message: updated.clone(),
    });
    Ok(Json(updated))
}

#[delete("/api/channels/<channel_id>/messages/<message_id>")]
pub fn delete_message(
    user: RequireUser,
    db: &State<Db>,
    events: &State<EventBus>,
    channel_id: &str,
    message_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let message = load_message(&conn, &channel.id, message_id)?;

    let is_sender = Some(&message.sender_id) == user.0.user_id.as_ref();
    if !is_sender && user.0.role != Role::Admin {
        return Err(ApiError::Forbidden(
            "Only the original sender or an admin can delete this message".into(),
        ));
    }
    if message.is_pinned {
        return Err(ApiError::Validation("Unpin the message before deleting it".into()));
    }

    // Reactions go with the row via FK cascade.
    conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])
        .map_err(ApiError::from)?;

    events.publish(ChatEvent::MessageDeleted {
        workspace_id: channel.workspace_id.clone(),
        channel_id: channel.id.clone(),
        id: message_id.to_string(),
    });
    Ok(Json(serde_json::json!({"deleted": true})))
}

/// Absolute (not toggling) pin state: pinning a pinned message is a no-op,
/// as is unpinning an unpinned one.
#[post("/api/channels/<channel_id>/messages/<message_id>/pin", data = "<body>")]
pub fn pin_message(
    user: RequireUser,
    db: &State<Db>,
    channel_id: &str,
    message_id: &str,
    body: Option<Json<PinBody>>,
) -> ApiResult<Json<Message>> {
    let pinned = body.map(|b| b.pinned).unwrap_or(true);

    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    load_message(&conn, &channel.id, message_id)?;

    if pinned {
        conn.execute(
            "UPDATE messages SET is_pinned = 1,
             pinned_at = COALESCE(pinned_at, ?1),
             pinned_by = COALESCE(pinned_by, ?2)
             WHERE id = ?3",
            params![chrono::Utc::now().to_rfc3339(), &user.0.user_id, message_id],
        )
        .map_err(ApiError::from)?;
    } else {
        conn.execute(
            "UPDATE messages SET is_pinned = 0, pinned_at = NULL, pinned_by = NULL WHERE id = ?1",
            params![message_id],
        )
        .map_err(ApiError::from)?;
    }

    Ok(Json(load_message(&conn, &channel.id, message_id)?))
}

#[get("/api/channels/<channel_id>/messages/pinned")]
pub fn pinned_messages(
    user: RequireUser,
    db: &State<Db>,
    channel_id: &str,
) -> ApiResult<Json<Vec<Message>>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let sql = format!(
        "SELECT {MESSAGE_COLS} FROM messages m JOIN users u ON u.id = m.sender_id
         WHERE m.channel_id = ?1 AND m.is_pinned = 1 ORDER BY m.pinned_at DESC"
    );
    let mut stmt = conn.prepare(&sql).map_err(ApiError::from)?;
    let messages = stmt
        .query_map(params![&channel.id], message_from_row)
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(messages))
}
