use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::{State, catch, get, post};
use rusqlite::params;

use super::{ApiError, ApiResult};
use crate::auth::{AuthContext, SESSION_COOKIE, hash_token};
use crate::db::Db;
use crate::models::User;

#[get("/api/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "talkto",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn user_by_id(conn: &rusqlite::Connection, id: &str) -> Option<User> {
    conn.query_row(
        "SELECT id, name, user_type, display_name, about, agent_instructions, email, avatar_url, created_at
         FROM users WHERE id = ?1",
        params![id],
        |r| {
            Ok(User {
                id: r.get(0)?,
                name: r.get(1)?,
                user_type: r.get(2)?,
                display_name: r.get(3)?,
                about: r.get(4)?,
                agent_instructions: r.get(5)?,
                email: r.get(6)?,
                avatar_url: r.get(7)?,
                created_at: r.get(8)?,
            })
        },
    )
    .ok()
}

#[get("/api/auth/me")]
pub fn auth_me(auth: AuthContext, db: &State<Db>) -> Json<serde_json::Value> {
    let conn = db.conn();
    let user = auth.user_id.as_deref().and_then(|id| user_by_id(&conn, id));
    Json(serde_json::json!({
        "user": user,
        "workspace_id": auth.workspace_id,
        "role": auth.role.as_str(),
        "via": auth.via,
    }))
}

#[post("/api/auth/logout")]
pub fn logout(
    _auth: AuthContext,
    db: &State<Db>,
    cookies: &CookieJar<'_>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        let conn = db.conn();
        conn.execute(
            "DELETE FROM user_sessions WHERE token_hash = ?1",
            params![hash_token(cookie.value())],
        )
        .map_err(ApiError::from)?;
        cookies.remove(SESSION_COOKIE);
    }
    Ok(Json(serde_json::json!({"ok": true})))
}

// --- Error catchers: everything renders as {"detail": ...} ---

#[catch(400)]
pub fn bad_request() -> ApiError {
    ApiError::Validation("Bad request".to_string())
}

// Rocket reports malformed JSON bodies as 422; the API contract calls that a
// validation failure.
#[catch(422)]
pub fn unprocessable() -> ApiError {
    ApiError::Validation("Invalid request body".to_string())
}

#[catch(401)]
pub fn unauthorized() -> ApiError {
    ApiError::Unauthenticated
}

#[catch(403)]
pub fn forbidden() -> ApiError {
    ApiError::Forbidden("Insufficient role".to_string())
}

#[catch(404)]
pub fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

#[catch(429)]
pub fn too_many_requests() -> ApiError {
    ApiError::RateLimited { retry_after_secs: 1 }
}

#[catch(500)]
pub fn internal_error() -> ApiError {
    ApiError::Internal("Internal server error".to_string())
}
