use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post};
use rusqlite::{Connection, params};

use super::{ApiError, ApiResult};
use crate::auth::{AuthContext, Role};
use crate::db::{CHANNEL_COLS, Db, channel_from_row};
use crate::events::{ChatEvent, EventBus};
use crate::models::{
    Channel, ChannelAnalytics, CreateChannelBody, SenderCount, UpdateChannelBody,
};

/// Fetch a channel by id, scoped to the caller's workspace. A channel living
/// in another workspace is a 404, indistinguishable from a missing one.
pub fn channel_in_workspace(
    conn: &Connection,
    workspace_id: &str,
    channel_id: &str,
) -> ApiResult<Channel> {
    let sql = format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = ?1");
    let channel = conn
        .query_row(&sql, params![channel_id], channel_from_row)
        .map_err(|_| ApiError::NotFound("Channel not found".to_string()))?;
    if channel.workspace_id != workspace_id {
        return Err(ApiError::NotFound("Channel not found".to_string()));
    }
    Ok(channel)
}

#[get("/api/channels?<include_archived>")]
pub fn list_channels(
    auth: AuthContext,
    db: &State<Db>,
    include_archived: Option<bool>,
) -> ApiResult<Json<Vec<Channel>>> {
    let conn = db.conn();
    let mut sql = format!("SELECT {CHANNEL_COLS} FROM channels WHERE workspace_id = ?1");
    if !include_archived.unwrap_or(false) {
        sql.push_str(" AND is_archived = 0");
    }
    sql.push_str(" ORDER BY name");
    let mut stmt = conn.prepare(&sql).map_err(ApiError::from)?;
    let channels = stmt
        .query_map(params![&auth.workspace_id], channel_from_row)
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(channels))
}

#[post("/api/channels", format = "json", data = "<body>")]
pub fn create_channel(
    auth: AuthContext,
    db: &State<Db>,
    events: &State<EventBus>,
    body: Json<CreateChannelBody>,
) -> ApiResult<(Status, Json<Channel>)> {
    let raw = body.name.trim();
    if raw.is_empty() || raw.len() > 80 {
        return Err(ApiError::Validation("Name must be 1-80 characters".into()));
    }
    let name = if raw.starts_with('#') {
        raw.to_string()
    } else {
        format!("#{raw}")
    };
    let channel_type = match body.channel_type.as_deref() {
        None => "custom",
        Some(t @ ("general" | "project" | "custom")) => t,
        Some(other) => {
            return Err(ApiError::Validation(format!("Unknown channel type '{other}'")));
        }
    };

    let conn = db.conn();
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO channels (id, name, channel_type, topic, project_path, workspace_id, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &name,
            channel_type,
            &body.topic,
            &body.project_path,
            &auth.workspace_id,
            &auth.user_id,
            &now
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ApiError::Conflict(format!("Channel {name} already exists"))
        }
        other => ApiError::Internal(other.to_string()),
    })?;

    if let Some(ref user_id) = auth.user_id {
        conn.execute(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            params![&id, user_id, &now],
        )
        .ok();
    }

    let channel = channel_in_workspace(&conn, &auth.workspace_id, &id)?;
    events.publish(ChatEvent::ChannelCreated {
        workspace_id: auth.workspace_id.clone(),
        channel: channel.clone(),
    });
    Ok((Status::Created, Json(channel)))
}

#[get("/api/channels/<channel_id>")]
pub fn get_channel(
    auth: AuthContext,
    db: &State<Db>,
    channel_id: &str,
) -> ApiResult<Json<Channel>> {
    let conn = db.conn();
    Ok(Json(channel_in_workspace(&conn, &auth.workspace_id, channel_id)?))
}

#[patch("/api/channels/<channel_id>", format = "json", data = "<body>")]
pub fn update_channel(
    auth: AuthContext,
    db: &State<Db>,
    channel_id: &str,
    body: Json<UpdateChannelBody>,
) -> ApiResult<Json<Channel>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &auth.workspace_id, channel_id)?;

    if let Some(ref raw) = body.name {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > 80 {
            return Err(ApiError::Validation("Name must be 1-80 characters".into()));
        }
        let name = if raw.starts_with('#') {
            raw.to_string()
        } else {
            format!("#{raw}")
        };
        conn.execute(
            "UPDATE channels SET name = ?1 WHERE id = ?2",
            params![&name, &channel.id],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::Conflict(format!("Channel {name} already exists"))
            }
            other => ApiError::Internal(other.to_string()),
        })?;
    }
    if let Some(ref topic) = body.topic {
        conn.execute(
            "UPDATE channels SET topic = ?1 WHERE id = ?2",
            params![topic.trim(), &channel.id],
        )
        .map_err(ApiError::from)?;
    }

    Ok(Json(channel_in_workspace(&conn, &auth.workspace_id, channel_id)?))
}

fn can_manage(auth: &AuthContext, channel: &Channel) -> bool {
    auth.role == Role::Admin
        || (auth.user_id.is_some() && auth.user_id == channel.created_by)
}

#[delete("/api/channels/<channel_id>")]
pub fn delete_channel(
    auth: AuthContext,
    db: &State<Db>,
    channel_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &auth.workspace_id, channel_id)?;
    if !can_manage(&auth, &channel) {
        return Err(ApiError::Forbidden("Only admins or the creator can delete a channel".into()));
    }

    let message_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
            params![&channel.id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if message_count > 0 {
        return Err(ApiError::Conflict(
            "Channel has messages; archive it instead".into(),
        ));
    }

    conn.execute("DELETE FROM channels WHERE id = ?1", params![&channel.id])
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[post("/api/channels/<channel_id>/archive")]
pub fn archive_channel(
    auth: AuthContext,
    db: &State<Db>,
    channel_id: &str,
) -> ApiResult<Json<Channel>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &auth.workspace_id, channel_id)?;
    if !can_manage(&auth, &channel) {
        return Err(ApiError::Forbidden("Only admins or the creator can archive a channel".into()));
    }
    conn.execute(
        "UPDATE channels SET is_archived = 1, archived_at = COALESCE(archived_at, ?1) WHERE id = ?2",
        params![chrono::Utc::now().to_rfc3339(), &channel.id],
    )
    .map_err(ApiError::from)?;
    Ok(Json(channel_in_workspace(&conn, &auth.workspace_id, channel_id)?))
}

#[post("/api/channels/<channel_id>/unarchive")]
pub fn unarchive_channel(
    auth: AuthContext,
    db: &State<Db>,
    channel_id: &str,
) -> ApiResult<Json<Channel>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &auth.workspace_id, channel_id)?;
    if !can_manage(&auth, &channel) {
        return Err(ApiError::Forbidden("Only admins or the creator can unarchive a channel".into()));
    }
    conn.execute(
        "UPDATE channels SET is_archived = 0, archived_at = NULL WHERE id = ?1",
        params![&channel.id],
    )
    .map_err(ApiError::from)?;
    Ok(Json(channel_in_workspace(&conn, &auth.workspace_id, channel_id)?))
}

#[get("/api/channels/<channel_id>/analytics")]
pub fn channel_analytics(
    auth: AuthContext,
    db: &State<Db>,
    channel_id: &str,
) -> ApiResult<Json<ChannelAnalytics>> {
    let conn = db.conn();
    let channel = channel_in_workspace(&conn, &auth.workspace_id, channel_id)?;

    let (message_count, first_message_at, last_message_at): (i64, Option<String>, Option<String>) =
        conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM messages WHERE channel_id = ?1",
            params![&channel.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(ApiError::from)?;

    let participant_count: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT sender_id) FROM messages WHERE channel_id = ?1",
            params![&channel.id],
            |r| r.get(0),
        )
        .unwrap_or(0);

    let mut stmt = conn
        .prepare(
            "SELECT u.name, COUNT(*) AS n FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.channel_id = ?1 GROUP BY m.sender_id ORDER BY n DESC LIMIT 5",
        )
        .map_err(ApiError::from)?;
    let top_senders = stmt
        .query_map(params![&channel.id], |r| {
            Ok(SenderCount {
                sender_name: r.get(0)?,
                message_count: r.get(1)?,
            })
        })
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Json(ChannelAnalytics {
        channel_id: channel.id,
        message_count,
        participant_count,
        first_message_at,
        last_message_at,
        top_senders,
    }))
}
