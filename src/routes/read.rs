use rocket::serde::json::Json;
use rocket::{State, get, post};
use rusqlite::params;

use super::channels::channel_in_workspace;
use super::{ApiError, ApiResult};
use crate::auth::RequireUser;
use crate::db::Db;
use crate::models::{MarkReadBody, UnreadInfo};

/// Upsert the caller's read receipt. Receipts never regress: the stored
/// timestamp is the max of old and new (RFC3339 UTC strings compare
/// lexicographically).
#[post("/api/channels/<channel_id>/read", data = "<body>")]
pub fn mark_read(
    user: RequireUser,
    db: &State<Db>,
    channel_id: &str,
    body: Option<Json<MarkReadBody>>,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &user.0.workspace_id, channel_id)?;
    let user_id = user.0.user_id.clone().unwrap_or_default();

    let stamp = body
        .and_then(|b| b.last_read_at.clone())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    if chrono::DateTime::parse_from_rfc3339(&stamp).is_err() {
        return Err(ApiError::Validation("last_read_at must be RFC3339".into()));
    }

    conn.execute(
        "INSERT INTO read_receipts (user_id, channel_id, last_read_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, channel_id) DO UPDATE SET
         last_read_at = MAX(last_read_at, excluded.last_read_at)",
        params![&user_id, &channel.id, &stamp],
    )
    .map_err(ApiError::from)?;

    let stored: String = conn
        .query_row(
            "SELECT last_read_at FROM read_receipts WHERE user_id = ?1 AND channel_id = ?2",
            params![&user_id, &channel.id],
            |r| r.get(0),
        )
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({
        "channel_id": channel.id,
        "last_read_at": stored,
    })))
}

#[get("/api/channels/unread")]
pub fn unread(user: RequireUser, db: &State<Db>) -> ApiResult<Json<Vec<UnreadInfo>>> {
    let conn = db.conn();
    let user_id = user.0.user_id.clone().unwrap_or_default();

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, rr.last_read_at,
             (SELECT COUNT(*) FROM messages m WHERE m.channel_id = c.id
              AND (rr.last_read_at IS NULL OR m.created_at > rr.last_read_at)
              AND m.sender_id != ?1)
             FROM channels c
             LEFT JOIN read_receipts rr ON rr.channel_id = c.id AND rr.user_id = ?1
             WHERE c.workspace_id = ?2 AND c.is_archived = 0
             ORDER BY c.name",
        )
        .map_err(ApiError::from)?;
    let infos = stmt
        .query_map(params![&user_id, &user.0.workspace_id], |r| {
            Ok(UnreadInfo {
                channel_id: r.get(0)?,
                channel_name: r.get(1)?,
                last_read_at: r.get(2)?,
                unread_count: r.get(3)?,
            })
        })
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(infos))
}
