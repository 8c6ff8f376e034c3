// Route module decomposition — each domain area in its own file.
// Shared error type and request guards live here; route functions in submodules.

pub mod agents;
pub mod channels;
pub mod features;
pub mod messages;
pub mod reactions;
pub mod read;
pub mod search;
pub mod system;
pub mod users;
pub mod workspaces;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use agents::{dm_agent, get_agent, list_agents};
pub use channels::{
    archive_channel, channel_analytics, create_channel, delete_channel, get_channel,
    list_channels, unarchive_channel, update_channel,
};
pub use features::{create_feature, list_features, update_feature, vote_feature};
pub use messages::{
    delete_message, edit_message, list_messages, pin_message, pinned_messages, post_message,
};
pub use reactions::{list_reactions, react};
pub use read::{mark_read, unread};
pub use system::{
    auth_me, bad_request, forbidden, health, internal_error, logout, not_found,
    too_many_requests, unauthorized, unprocessable,
};
pub use users::{delete_me, get_me, onboard, update_me};
pub use workspaces::{
    create_invite, create_key, create_workspace, join_workspace, list_invites, list_keys,
    list_members, list_workspaces, remove_member, revoke_invite, revoke_key,
};

use rocket::Request;
use rocket::http::{Header, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;

/// Domain failures as surfaced at the REST boundary. Every variant renders
/// as `{"detail": "..."}` with the matching status code.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthenticated,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    RateLimited { retry_after_secs: u64 },
    Internal(String),
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::Unauthenticated => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::RateLimited { .. } => Status::TooManyRequests,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Validation(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Internal(m) => m.clone(),
            ApiError::Unauthenticated => "Authentication required".to_string(),
            ApiError::RateLimited { retry_after_secs } => {
                format!("Rate limited, retry in {retry_after_secs}s")
            }
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({"detail": self.detail()}));
        let mut builder = Response::build_from(body.respond_to(req)?);
        builder.status(self.status());
        if let ApiError::RateLimited { retry_after_secs } = self {
            builder.header(Header::new("Retry-After", retry_after_secs.to_string()));
        }
        builder.ok()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => ApiError::NotFound("Not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Effective client address, honoring one hop of X-Forwarded-For.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}
