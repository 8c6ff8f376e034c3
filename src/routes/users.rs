use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::serde::json::Json;
use rocket::{State, delete, get, patch, post};
use rusqlite::params;

use super::system::user_by_id;
use super::{ApiError, ApiResult};
use crate::auth::{RequireUser, SESSION_COOKIE, create_session};
use crate::db::{DEFAULT_WORKSPACE_ID, Db};
use crate::models::{OnboardBody, UpdateMeBody, User};

fn session_cookie(token: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token.to_string()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

/// First-human bootstrap. Public: the localhost bypass has no user yet, and
/// network-mode setups hit this before any credential exists.
#[post("/api/users/onboard", format = "json", data = "<body>")]
pub fn onboard(
    db: &State<Db>,
    cookies: &CookieJar<'_>,
    body: Json<OnboardBody>,
) -> ApiResult<(Status, Json<serde_json::Value>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Validation("Name must be 1-100 characters".into()));
    }

    let conn = db.conn();
    let existing: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users u JOIN workspace_members wm ON wm.user_id = u.id
             WHERE u.user_type = 'human' AND wm.workspace_id = ?1",
            params![DEFAULT_WORKSPACE_ID],
            |r| r.get(0),
        )
        .unwrap_or(0);
    if existing > 0 {
        return Err(ApiError::Conflict("Already onboarded".into()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, name, user_type, display_name, email, created_at)
         VALUES (?1, ?2, 'human', ?3, ?4, ?5)",
        params![&id, &name, &body.display_name, &body.email, &now],
    )
    .map_err(ApiError::from)?;
    conn.execute(
        "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
         VALUES (?1, ?2, 'admin', ?3)",
        params![DEFAULT_WORKSPACE_ID, &id, &now],
    )
    .map_err(ApiError::from)?;

    let (token, expires_at) = create_session(&conn, &id, DEFAULT_WORKSPACE_ID);
    cookies.add(session_cookie(&token));

    let user = user_by_id(&conn, &id);
    Ok((
        Status::Created,
        Json(serde_json::json!({
            "user": user,
            "token": token,
            "expires_at": expires_at,
            "workspace_id": DEFAULT_WORKSPACE_ID,
        })),
    ))
}

#[get("/api/users/me")]
pub fn get_me(user: RequireUser, db: &State<Db>) -> ApiResult<Json<User>> {
    let conn = db.conn();
    let id = user.0.user_id.as_deref().unwrap_or_default();
    user_by_id(&conn, id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

#[patch("/api/users/me", format = "json", data = "<body>")]
pub fn update_me(
    user: RequireUser,
    db: &State<Db>,
    body: Json<UpdateMeBody>,
) -> ApiResult<Json<User>> {
    let conn = db.conn();
    let id = user.0.user_id.clone().unwrap_or_default();

    if let Some(ref display_name) = body.display_name {
        conn.execute(
            "UPDATE users SET display_name = ?1 WHERE id = ?2",
            params![display_name.trim(), &id],
        )
        .map_err(ApiError::from)?;
    }
    if let Some(ref about) = body.about {
        conn.execute(
            "UPDATE users SET about = ?1 WHERE id = ?2",
            params![about.trim(), &id],
        )
        .map_err(ApiError::from)?;
    }
    if let Some(ref email) = body.email {
        conn.execute(
            "UPDATE users SET email = ?1 WHERE id = ?2",
            params![email.trim(), &id],
        )
        .map_err(ApiError::from)?;
    }
    if let Some(ref avatar_url) = body.avatar_url {
        conn.execute(
            "UPDATE users SET avatar_url = ?1 WHERE id = ?2",
            params![avatar_url.trim(), &id],
        )
        .map_err(ApiError::from)?;
    }

    user_by_id(&conn, &id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

#[delete("/api/users/me")]
pub fn delete_me(user: RequireUser, db: &State<Db>, cookies: &CookieJar<'_>) -> ApiResult<Status> {
    let conn = db.conn();
    let id = user.0.user_id.clone().unwrap_or_default();
    // Sessions and memberships go with the user row via FK cascade.
    conn.execute("DELETE FROM users WHERE id = ?1", params![&id])
        .map_err(ApiError::from)?;
    cookies.remove(SESSION_COOKIE);
    Ok(Status::NoContent)
}
