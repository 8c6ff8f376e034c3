use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, patch, post};
use rusqlite::params;

use super::{ApiError, ApiResult};
use crate::auth::{AuthContext, RequireAdmin, RequireUser};
use crate::db::Db;
use crate::events::{ChatEvent, EventBus};
use crate::mcp::tools::feature_rows;
use crate::models::{CreateFeatureBody, FeatureRequest, UpdateFeatureBody, VoteBody};

const STATUSES: [&str; 5] = ["open", "planned", "building", "shipped", "declined"];

#[get("/api/features")]
pub fn list_features(_auth: AuthContext, db: &State<Db>) -> Json<Vec<FeatureRequest>> {
    let conn = db.conn();
    Json(feature_rows(&conn, None))
}

#[post("/api/features", format = "json", data = "<body>")]
pub fn create_feature(
    auth: AuthContext,
    db: &State<Db>,
    events: &State<EventBus>,
    body: Json<CreateFeatureBody>,
) -> ApiResult<(Status, Json<FeatureRequest>)> {
    let title = body.title.trim().to_string();
    if title.is_empty() || title.len() > 200 {
        return Err(ApiError::Validation("Title must be 1-200 characters".into()));
    }

    let conn = db.conn();
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO feature_requests (id, title, description, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            &id,
            &title,
            body.description.trim(),
            &auth.user_id,
            chrono::Utc::now().to_rfc3339()
        ],
    )
    .map_err(ApiError::from)?;

    let feature = feature_rows(&conn, Some(&id))
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Internal("Failed to create feature request".into()))?;
    events.publish(ChatEvent::FeatureUpdate {
        feature: feature.clone(),
    });
    Ok((Status::Created, Json(feature)))
}

/// Vote upsert: revoting replaces the previous vote.
#[post("/api/features/<feature_id>/vote", format = "json", data = "<body>")]
pub fn vote_feature(
    user: RequireUser,
    db: &State<Db>,
    events: &State<EventBus>,
    feature_id: &str,
    body: Json<VoteBody>,
) -> ApiResult<Json<FeatureRequest>> {
    if body.vote != 1 && body.vote != -1 {
        return Err(ApiError::Validation("vote must be +1 or -1".into()));
    }

    let conn = db.conn();
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM feature_requests WHERE id = ?1",
            params![feature_id],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if exists == 0 {
        return Err(ApiError::NotFound("Feature request not found".into()));
    }

    conn.execute(
        "INSERT INTO feature_votes (feature_id, user_id, vote) VALUES (?1, ?2, ?3)
         ON CONFLICT(feature_id, user_id) DO UPDATE SET vote = excluded.vote",
        params![feature_id, &user.0.user_id, body.vote],
    )
    .map_err(ApiError::from)?;

    let feature = feature_rows(&conn, Some(feature_id))
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound("Feature request not found".into()))?;
    events.publish(ChatEvent::FeatureUpdate {
        feature: feature.clone(),
    });
    Ok(Json(feature))
}

#[patch("/api/features/<feature_id>", format = "json", data = "<body>")]
pub fn update_feature(
    _admin: RequireAdmin,
    db: &State<Db>,
    events: &State<EventBus>,
    feature_id: &str,
    body: Json<UpdateFeatureBody>,
) -> ApiResult<Json<FeatureRequest>> {
    let status = body.status.trim();
    if !STATUSES.contains(&status) {
        return Err(ApiError::Validation(format!(
            "status must be one of: {}",
            STATUSES.join(", ")
        )));
    }

    let conn = db.conn();
    let updated = conn
        .execute(
            "UPDATE feature_requests SET status = ?1, reason = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                status,
                &body.reason,
                chrono::Utc::now().to_rfc3339(),
                feature_id
            ],
        )
        .map_err(ApiError::from)?;
    if updated == 0 {
        return Err(ApiError::NotFound("Feature request not found".into()));
    }

    let feature = feature_rows(&conn, Some(feature_id))
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound("Feature request not found".into()))?;
    events.publish(ChatEvent::FeatureUpdate {
        feature: feature.clone(),
    });
    Ok(Json(feature))
}
