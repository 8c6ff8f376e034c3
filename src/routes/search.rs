use rocket::serde::json::Json;
use rocket::{State, get};

use super::{ApiError, ApiResult};
use crate::auth::AuthContext;
use crate::db::{Db, escape_like, resolve_channel};
use crate::models::SearchResult;

const SEARCH_LIMIT: i64 = 50;

/// Text search, workspace-scoped. Both filters apply simultaneously, and the
/// user's `%` / `_` match literally; they are escaped before embedding in
/// the LIKE pattern.
#[get("/api/search?<q>&<channel>&<limit>")]
pub fn search(
    auth: AuthContext,
    db: &State<Db>,
    q: &str,
    channel: Option<&str>,
    limit: Option<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let query = q.trim();
    if query.is_empty() {
        return Err(ApiError::Validation("Query parameter 'q' must not be empty".into()));
    }
    if query.len() > 500 {
        return Err(ApiError::Validation("Query too long (max 500 characters)".into()));
    }
    let limit = limit.unwrap_or(SEARCH_LIMIT).clamp(1, SEARCH_LIMIT);

    let conn = db.conn();
    let channel_id = match channel {
        Some(name) => match resolve_channel(&conn, &auth.workspace_id, name) {
            Some(channel) => Some(channel.id),
            None => return Err(ApiError::NotFound("Channel not found".into())),
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
    if channel_id.is_some() {
        sql.push_str(" AND c.id = ?3");
    }
    sql.push_str(&format!(" ORDER BY m.created_at DESC, m.rowid DESC LIMIT {limit}"));

    let mut stmt = conn.prepare(&sql).map_err(ApiError::from)?;
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
    let results: Vec<SearchResult> = match channel_id {
        Some(ref id) => stmt.query_map(rusqlite::params![&auth.workspace_id, &pattern, id], map),
        None => stmt.query_map(rusqlite::params![&auth.workspace_id, &pattern], map),
    }
    .map_err(ApiError::from)?
    .filter_map(|r| r.ok())
    .collect();

    let count = results.len();
    Ok(Json(serde_json::json!({
        "results": results,
        "count": count,
        "query": query,
    })))
}
