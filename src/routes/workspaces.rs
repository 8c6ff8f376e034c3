use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rusqlite::params;

use super::system::user_by_id;
use super::{ApiError, ApiResult};
use crate::auth::{
    API_KEY_PREFIX, AuthContext, RequireAdmin, RequireUser, SESSION_COOKIE, create_session,
    generate_token, hash_token, key_display_prefix,
};
use crate::db::{Db, WORKSPACE_COLS, workspace_from_row};
use crate::models::{
    ApiKeyInfo, CreateInviteBody, CreateKeyBody, CreateWorkspaceBody, CreatedApiKey, JoinBody,
    Workspace, WorkspaceInvite, WorkspaceMemberInfo,
};

/// Cross-workspace references are indistinguishable from missing ones.
fn require_same_workspace(ctx: &AuthContext, workspace_id: &str) -> ApiResult<()> {
    if ctx.workspace_id != workspace_id {
        return Err(ApiError::NotFound("Workspace not found".into()));
    }
    Ok(())
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[get("/api/workspaces")]
pub fn list_workspaces(auth: AuthContext, db: &State<Db>) -> Json<Vec<Workspace>> {
    let conn = db.conn();
    let workspaces = match auth.user_id {
        Some(ref user_id) => {
            let sql = format!(
                "SELECT {WORKSPACE_COLS} FROM workspaces
                 WHERE id IN (SELECT workspace_id FROM workspace_members WHERE user_id = ?1)
                 ORDER BY created_at"
            );
            conn.prepare(&sql)
                .and_then(|mut stmt| {
                    stmt.query_map(params![user_id], workspace_from_row)
                        .map(|rows| rows.filter_map(|r| r.ok()).collect())
                })
                .unwrap_or_default()
        }
        None => {
            let sql = format!("SELECT {WORKSPACE_COLS} FROM workspaces WHERE id = ?1");
            conn.query_row(&sql, params![&auth.workspace_id], workspace_from_row)
                .map(|w| vec![w])
                .unwrap_or_default()
        }
    };
    Json(workspaces)
}

#[post("/api/workspaces", format = "json", data = "<body>")]
pub fn create_workspace(
    user: RequireUser,
    db: &State<Db>,
    body: Json<CreateWorkspaceBody>,
) -> ApiResult<(Status, Json<Workspace>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Validation("Name must be 1-100 characters".into()));
    }
    let slug = body
        .slug
        .as_deref()
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(&name));
    if slug.is_empty() {
        return Err(ApiError::Validation("Could not derive a slug".into()));
    }

    let conn = db.conn();
    let user_id = user.0.user_id.clone().unwrap_or_default();
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let ws_type = body.ws_type.clone().unwrap_or_else(|| "shared".to_string());

    conn.execute(
        "INSERT INTO workspaces (id, name, slug, ws_type, description, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, &name, &slug, &ws_type, body.description.as_deref().unwrap_or(""), &user_id, &now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ApiError::Conflict(format!("Workspace slug '{slug}' already exists"))
        }
        other => ApiError::Internal(other.to_string()),
    })?;
    conn.execute(
        "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
         VALUES (?1, ?2, 'admin', ?3)",
        params![&id, &user_id, &now],
    )
    .map_err(ApiError::from)?;

    let sql = format!("SELECT {WORKSPACE_COLS} FROM workspaces WHERE id = ?1");
    let workspace = conn
        .query_row(&sql, params![&id], workspace_from_row)
        .map_err(ApiError::from)?;
    Ok((Status::Created, Json(workspace)))
}

#[get("/api/workspaces/<workspace_id>/members")]
pub fn list_members(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
) -> ApiResult<Json<Vec<WorkspaceMemberInfo>>> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();
    let mut stmt = conn
        .prepare(
            "SELECT wm.user_id, u.name, u.user_type, wm.role, wm.joined_at
             FROM workspace_members wm JOIN users u ON u.id = wm.user_id
             WHERE wm.workspace_id = ?1 ORDER BY wm.joined_at",
        )
        .map_err(ApiError::from)?;
    let members = stmt
        .query_map(params![workspace_id], |r| {
            Ok(WorkspaceMemberInfo {
                user_id: r.get(0)?,
                name: r.get(1)?,
                user_type: r.get(2)?,
                role: r.get(3)?,
                joined_at: r.get(4)?,
            })
        })
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(members))
}

#[delete("/api/workspaces/<workspace_id>/members/<user_id>")]
pub fn remove_member(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
    user_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();
    let removed = conn
        .execute(
            "DELETE FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
        )
        .map_err(ApiError::from)?;
    if removed == 0 {
        return Err(ApiError::NotFound("Member not found".into()));
    }
    Ok(Json(serde_json::json!({"removed": true})))
}

// --- API keys ---

#[get("/api/workspaces/<workspace_id>/keys")]
pub fn list_keys(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
) -> ApiResult<Json<Vec<ApiKeyInfo>>> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();
    let mut stmt = conn
        .prepare(
            "SELECT id, workspace_id, key_prefix, name, created_by, created_at, expires_at,
             revoked_at, last_used_at
             FROM workspace_api_keys WHERE workspace_id = ?1 ORDER BY created_at DESC",
        )
        .map_err(ApiError::from)?;
    let keys = stmt
        .query_map(params![workspace_id], key_info_from_row)
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(keys))
}

fn key_info_from_row(r: &rusqlite::Row) -> rusqlite::Result<ApiKeyInfo> {
    Ok(ApiKeyInfo {
        id: r.get(0)?,
        workspace_id: r.get(1)?,
        key_prefix: r.get(2)?,
        name: r.get(3)?,
        created_by: r.get(4)?,
        created_at: r.get(5)?,
        expires_at: r.get(6)?,
        revoked_at: r.get(7)?,
        last_used_at: r.get(8)?,
    })
}

#[post("/api/workspaces/<workspace_id>/keys", format = "json", data = "<body>")]
pub fn create_key(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
    body: Json<CreateKeyBody>,
) -> ApiResult<(Status, Json<CreatedApiKey>)> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();

    let token = generate_token(API_KEY_PREFIX);
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO workspace_api_keys (id, workspace_id, key_hash, key_prefix, name, created_by, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            workspace_id,
            hash_token(&token),
            key_display_prefix(&token),
            &body.name,
            &admin.0.user_id,
            &now,
            &body.expires_at
        ],
    )
    .map_err(ApiError::from)?;

    let info = conn
        .query_row(
            "SELECT id, workspace_id, key_prefix, name, created_by, created_at, expires_at,
             revoked_at, last_used_at FROM workspace_api_keys WHERE id = ?1",
            params![&id],
            key_info_from_row,
        )
        .map_err(ApiError::from)?;
    Ok((Status::Created, Json(CreatedApiKey { info, key: token })))
}

#[delete("/api/workspaces/<workspace_id>/keys/<key_id>")]
pub fn revoke_key(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
    key_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();
    let revoked = conn
        .execute(
            "UPDATE workspace_api_keys SET revoked_at = ?1
             WHERE id = ?2 AND workspace_id = ?3 AND revoked_at IS NULL",
            params![chrono::Utc::now().to_rfc3339(), key_id, workspace_id],
        )
        .map_err(ApiError::from)?;
    if revoked == 0 {
        return Err(ApiError::NotFound("API key not found".into()));
    }
    Ok(Json(serde_json::json!({"revoked": true})))
}

// --- Invites ---

#[get("/api/workspaces/<workspace_id>/invites")]
pub fn list_invites(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
) -> ApiResult<Json<Vec<WorkspaceInvite>>> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();
    let mut stmt = conn
        .prepare(
            "SELECT id, workspace_id, token, role, max_uses, use_count, expires_at, created_at, revoked_at
             FROM workspace_invites WHERE workspace_id = ?1 ORDER BY created_at DESC",
        )
        .map_err(ApiError::from)?;
    let invites = stmt
        .query_map(params![workspace_id], invite_from_row)
        .map_err(ApiError::from)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(Json(invites))
}

fn invite_from_row(r: &rusqlite::Row) -> rusqlite::Result<WorkspaceInvite> {
    Ok(WorkspaceInvite {
        id: r.get(0)?,
        workspace_id: r.get(1)?,
        token: r.get(2)?,
        role: r.get(3)?,
        max_uses: r.get(4)?,
        use_count: r.get(5)?,
        expires_at: r.get(6)?,
        created_at: r.get(7)?,
        revoked_at: r.get(8)?,
    })
}

#[post("/api/workspaces/<workspace_id>/invites", format = "json", data = "<body>")]
pub fn create_invite(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
    body: Json<CreateInviteBody>,
) -> ApiResult<(Status, Json<WorkspaceInvite>)> {
    require_same_workspace(&admin.0, workspace_id)?;
    let role = match body.role.as_deref() {
        None | Some("member") => "member",
        Some("admin") => "admin",
        Some(other) => {
            return Err(ApiError::Validation(format!("Unknown role '{other}'")));
        }
    };

    let conn = db.conn();
    let id = uuid::Uuid::new_v4().to_string();
    // Invite tokens travel in URLs; same entropy, no cookie prefix.
    let token = generate_token("inv_");
    conn.execute(
        "INSERT INTO workspace_invites (id, workspace_id, token, role, max_uses, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            workspace_id,
            &token,
            role,
            &body.max_uses,
            &body.expires_at,
            chrono::Utc::now().to_rfc3339()
        ],
    )
    .map_err(ApiError::from)?;

    let invite = conn
        .query_row(
            "SELECT id, workspace_id, token, role, max_uses, use_count, expires_at, created_at, revoked_at
             FROM workspace_invites WHERE id = ?1",
            params![&id],
            invite_from_row,
        )
        .map_err(ApiError::from)?;
    Ok((Status::Created, Json(invite)))
}

#[delete("/api/workspaces/<workspace_id>/invites/<invite_id>")]
pub fn revoke_invite(
    admin: RequireAdmin,
    db: &State<Db>,
    workspace_id: &str,
    invite_id: &str,
) -> ApiResult<Json<serde_json::Value>> {
    require_same_workspace(&admin.0, workspace_id)?;
    let conn = db.conn();
    let revoked = conn
        .execute(
            "UPDATE workspace_invites SET revoked_at = ?1
             WHERE id = ?2 AND workspace_id = ?3 AND revoked_at IS NULL",
            params![chrono::Utc::now().to_rfc3339(), invite_id, workspace_id],
        )
        .map_err(ApiError::from)?;
    if revoked == 0 {
        return Err(ApiError::NotFound("Invite not found".into()));
    }
    Ok(Json(serde_json::json!({"revoked": true})))
}

/// Invite acceptance: public, token-authenticated. Creates the human user,
/// joins the workspace, and opens a browser session.
#[post("/api/join/<token>", format = "json", data = "<body>")]
pub fn join_workspace(
    db: &State<Db>,
    cookies: &CookieJar<'_>,
    token: &str,
    body: Json<JoinBody>,
) -> ApiResult<(Status, Json<serde_json::Value>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ApiError::Validation("Name must be 1-100 characters".into()));
    }

    let conn = db.conn();
    let invite = conn
        .query_row(
            "SELECT id, workspace_id, token, role, max_uses, use_count, expires_at, created_at, revoked_at
             FROM workspace_invites WHERE token = ?1",
            params![token],
            invite_from_row,
        )
        .map_err(|_| ApiError::NotFound("Invite not found".to_string()))?;

    if invite.revoked_at.is_some() {
        return Err(ApiError::NotFound("Invite not found".into()));
    }
    if let Some(ref expires_at) = invite.expires_at
        && chrono::DateTime::parse_from_rfc3339(expires_at)
            .map(|t| t < chrono::Utc::now())
            .unwrap_or(true)
    {
        return Err(ApiError::Forbidden("Invite expired".into()));
    }
    if let Some(max_uses) = invite.max_uses
        && invite.use_count >= max_uses
    {
        return Err(ApiError::Forbidden("Invite exhausted".into()));
    }

    let user_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, name, user_type, display_name, email, created_at)
         VALUES (?1, ?2, 'human', ?3, ?4, ?5)",
        params![&user_id, &name, &body.display_name, &body.email, &now],
    )
    .map_err(ApiError::from)?;
    conn.execute(
        "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![&invite.workspace_id, &user_id, &invite.role, &now],
    )
    .map_err(ApiError::from)?;
    conn.execute(
        "UPDATE workspace_invites SET use_count = use_count + 1 WHERE id = ?1",
        params![&invite.id],
    )
    .map_err(ApiError::from)?;

    let (session_token, expires_at) = create_session(&conn, &user_id, &invite.workspace_id);
    cookies.add(
        Cookie::build((SESSION_COOKIE, session_token.clone()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .path("/")
            .build(),
    );

    let user = user_by_id(&conn, &user_id);
    Ok((
        Status::Created,
        Json(serde_json::json!({
            "user": user,
            "token": session_token,
            "expires_at": expires_at,
            "workspace_id": invite.workspace_id,
            "role": invite.role,
        })),
    ))
}
