use base64::Engine;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::db::{DEFAULT_WORKSPACE_ID, Db};

pub const SESSION_COOKIE: &str = "talkto_session";
pub const SESSION_PREFIX: &str = "ses_";
pub const API_KEY_PREFIX: &str = "tk_";
/// Browser sessions live for 30 days.
pub const SESSION_TTL_DAYS: i64 = 30;
/// Characters of the key shown in listings (`tk_` + 8).
const KEY_DISPLAY_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Role {
        if s == "admin" { Role::Admin } else { Role::Member }
    }
}

/// The resolved principal of a request: who (if anyone), which workspace,
/// and with what role. Frozen per request by the `FromRequest` impl below.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub workspace_id: String,
    pub role: Role,
    /// `session` | `api_key` | `localhost`
    pub via: &'static str,
}

// --- Token material ---

/// 32 bytes of CSPRNG entropy, URL-safe base64, prefixed.
pub fn generate_token(prefix: &str) -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!(
        "{prefix}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Single unsalted SHA-256; tokens are 256-bit random, so no KDF is needed.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Stored display prefix for API key listings.
pub fn key_display_prefix(token: &str) -> String {
    token.chars().take(KEY_DISPLAY_LEN).collect()
}

/// Constant-time equality over byte slices.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn is_expired(expires_at: &str) -> bool {
    match chrono::DateTime::parse_from_rfc3339(expires_at) {
        Ok(t) => t < chrono::Utc::now(),
        Err(_) => true,
    }
}

// --- Lookups shared by the request guard and the WebSocket upgrade ---

pub fn member_role(conn: &Connection, workspace_id: &str, user_id: &str) -> Role {
    conn.query_row(
        "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
        params![workspace_id, user_id],
        |r| r.get::<_, String>(0),
    )
    .map(|s| Role::parse(&s))
    .unwrap_or(Role::Member)
}

/// Resolve a `ses_` cookie/query token to `(user_id, workspace_id, role)`,
/// touching `last_active_at`.
pub fn resolve_session(conn: &Connection, token: &str) -> Option<(String, String, Role)> {
    let hash = hash_token(token);
    let (id, user_id, workspace_id, expires_at): (String, String, String, String) = conn
        .query_row(
            "SELECT id, user_id, workspace_id, expires_at FROM user_sessions WHERE token_hash = ?1",
            params![&hash],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .ok()?;
    if is_expired(&expires_at) {
        return None;
    }
    conn.execute(
        "UPDATE user_sessions SET last_active_at = ?1 WHERE id = ?2",
        params![chrono::Utc::now().to_rfc3339(), &id],
    )
    .ok();
    let role = member_role(conn, &workspace_id, &user_id);
    Some((user_id, workspace_id, role))
}

/// Resolve a `tk_` bearer token to its workspace, touching `last_used_at`.
/// Candidates come from the stored display prefix; the hash comparison is
/// constant-time.
pub fn resolve_api_key(conn: &Connection, token: &str) -> Option<String> {
    let hash = hash_token(token);
    let prefix = key_display_prefix(token);
    let mut stmt = conn
        .prepare(
            "SELECT id, workspace_id, key_hash, expires_at FROM workspace_api_keys
             WHERE key_prefix = ?1 AND revoked_at IS NULL",
        )
        .ok()?;
    let candidates: Vec<(String, String, String, Option<String>)> = stmt
        .query_map(params![&prefix], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .ok()?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);

    for (id, workspace_id, key_hash, expires_at) in candidates {
        if !ct_eq(key_hash.as_bytes(), hash.as_bytes()) {
            continue;
        }
        if let Some(ref exp) = expires_at
            && is_expired(exp)
        {
            continue;
        }
        conn.execute(
            "UPDATE workspace_api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), &id],
        )
        .ok();
        return Some(workspace_id);
    }
    None
}

/// The onboarded human of the default workspace, if any.
pub fn default_workspace_human(conn: &Connection) -> Option<String> {
    conn.query_row(
        "SELECT u.id FROM users u
         JOIN workspace_members wm ON wm.user_id = u.id
         WHERE u.user_type = 'human' AND wm.workspace_id = ?1
         ORDER BY u.created_at ASC LIMIT 1",
        params![DEFAULT_WORKSPACE_ID],
        |r| r.get(0),
    )
    .ok()
}

/// Create a browser session and return `(token, expires_at)`. The plaintext
/// token exists only in this return value and the client's cookie.
pub fn create_session(conn: &Connection, user_id: &str, workspace_id: &str) -> (String, String) {
    let token = generate_token(SESSION_PREFIX);
    let now = chrono::Utc::now();
    let expires_at = (now + chrono::Duration::days(SESSION_TTL_DAYS)).to_rfc3339();
    conn.execute(
        "INSERT INTO user_sessions (id, user_id, token_hash, workspace_id, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            user_id,
            hash_token(&token),
            workspace_id,
            now.to_rfc3339(),
            &expires_at
        ],
    )
    .ok();
    (token, expires_at)
}

// --- Request guards ---

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthContext {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(db) = req.rocket().state::<Db>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let network = req
            .rocket()
            .state::<Config>()
            .map(|c| c.network)
            .unwrap_or(false);

        // 1. Cookie session
        if let Some(cookie) = req.cookies().get(SESSION_COOKIE) {
            let conn = db.conn();
            if let Some((user_id, workspace_id, role)) = resolve_session(&conn, cookie.value()) {
                return Outcome::Success(AuthContext {
                    user_id: Some(user_id),
                    workspace_id,
                    role,
                    via: "session",
                });
            }
        }

        // 2. Bearer API key: only tk_ tokens are keys, anything else falls through
        if let Some(auth) = req.headers().get_one("Authorization")
            && let Some(token) = auth.strip_prefix("Bearer ")
            && token.starts_with(API_KEY_PREFIX)
        {
            let conn = db.conn();
            if let Some(workspace_id) = resolve_api_key(&conn, token) {
                return Outcome::Success(AuthContext {
                    user_id: None,
                    workspace_id,
                    role: Role::Admin,
                    via: "api_key",
                });
            }
        }

        // 3. Localhost bypass, unless the hub runs in network mode. An absent
        // peer address means an in-process or unix-socket caller: local.
        let is_loopback = req.client_ip().map(|ip| ip.is_loopback()).unwrap_or(true);
        if is_loopback && !network {
            let conn = db.conn();
            let user_id = default_workspace_human(&conn);
            return Outcome::Success(AuthContext {
                user_id,
                workspace_id: DEFAULT_WORKSPACE_ID.to_string(),
                role: Role::Admin,
                via: "localhost",
            });
        }

        Outcome::Error((Status::Unauthorized, ()))
    }
}

/// Guard: an authenticated user (human or agent) is required.
pub struct RequireUser(pub AuthContext);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireUser {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthContext::from_request(req).await {
            Outcome::Success(ctx) if ctx.user_id.is_some() => Outcome::Success(RequireUser(ctx)),
            Outcome::Success(_) => Outcome::Error((Status::Unauthorized, ())),
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Forward(f) => Outcome::Forward(f),
        }
    }
}

/// Guard: workspace admin role is required.
pub struct RequireAdmin(pub AuthContext);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthContext::from_request(req).await {
            Outcome::Success(ctx) if ctx.role == Role::Admin => {
                Outcome::Success(RequireAdmin(ctx))
            }
            Outcome::Success(_) => Outcome::Error((Status::Forbidden, ())),
            Outcome::Error(e) => Outcome::Error(e),
            Outcome::Forward(f) => Outcome::Forward(f),
        }
    }
}
