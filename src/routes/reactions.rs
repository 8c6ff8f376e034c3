use rocket::serde::json::Json;
use rocket::{State, get, post};
use rusqlite::params;

use super::channels::channel_in_workspace;
use super::{ApiError, ApiResult};
use crate::auth::RequireUser;
use crate::db::Db;
use crate::events::{ChatEvent, EventBus};
use crate::models::{ReactBody, ReactionSummary};

/// Toggle semantics: the same user reacting with the same emoji twice adds
/// then removes it.
#[post("/api/channels/<channel_id>/messages/<message_id>/react", format = "json", data = "<body>")]
pub fn react(
    user: RequireUser,
    db: &State<Db>,
    events: &State<EventBus>,
    channel_id: &str,
    message_id: &str,
    body: Json<ReactBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let emoji = body.emoji.trim().to_string();
    if emoji.is_empty() || emoji.len() > 32 {
        return Err(ApiError::Validation("Emoji must be 1-32 characters".into()));
    }

    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1 AND channel_id = ?2",
            params![message_id, &channel.id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if exists == 0 {
        return Err(ApiError::NotFound("Message not found".into()));
    }

    let user_id = user.0.user_id.clone().unwrap_or_default();
    let user_name: String = conn
        .query_row(
            "SELECT name FROM users WHERE id = ?1",
            params![&user_id],
            |r| r.get(0),
        )
        .unwrap_or_default();

    let present: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id, &user_id, &emoji],
            |r| r.get(0),
        )
        .unwrap_or(0);

    let added = if present > 0 {
        conn.execute(
            "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id, &user_id, &emoji],
        )
        .map_err(ApiError::from)?;
        false
    } else {
        conn.execute(
            "INSERT INTO message_reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![message_id, &user_id, &emoji, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(ApiError::from)?;
        true
    };

    events.publish(ChatEvent::Reaction {
        workspace_id: channel.workspace_id.clone(),
        channel_id: channel.id.clone(),
        message_id: message_id.to_string(),
        user_name,
        emoji: emoji.clone(),
        added,
    });

    Ok(Json(serde_json::json!({
        "message_id": message_id,
        "emoji": emoji,
        "added": added,
    })))
}

#[get("/api/channels/<channel_id>/messages/<message_id>/reactions")]
pub fn list_reactions(
    user: RequireUser,
    db: &State<Db>,
    channel_id: &str,
    message_id: &str,
) -> ApiResult<Json<Vec<ReactionSummary>>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1 AND channel_id = ?2",
            params![message_id, &channel.id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if exists == 0 {
        return Err(ApiError::NotFound("Message not found".into()));
    }

    let mut stmt = conn
        .prepare(
            "SELECT r.emoji, COUNT(*), GROUP_CONCAT(u.name)
             FROM message_reactions r JOIN users u ON u.id = r.user_id
             WHERE r.message_id = ?1 GROUP BY r.emoji ORDER BY COUNT(*) DESC",
        )
        .map_err(ApiError::from)?;
    let summaries = stmt
        .query_map(params![message_id], |r| {
            let users_csv: Option<String> = r.get(2)?;
            Ok(ReactionSummary {
                emoji: r.get(0)?,
                count: r.get(1)?,
                users: users_csv
                    .map(|s| s.split(',').map(String::from).collect())
                    .unwrap_or_default(),
            })
        })
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(summaries))
}
