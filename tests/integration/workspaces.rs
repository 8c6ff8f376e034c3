use crate::common::{onboard, test_client};
use rocket::http::{ContentType, Header, Status};
use talkto::db::DEFAULT_WORKSPACE_ID;

#[test]
fn test_default_workspace_is_seeded() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client.get("/api/workspaces").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let workspaces: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(workspaces.iter().any(|w| w["id"] == DEFAULT_WORKSPACE_ID));
}

#[test]
fn test_create_workspace_and_slug_conflict() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client
        .post("/api/workspaces")
        .header(ContentType::JSON)
        .body(r#"{"name": "Side Project"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let ws: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ws["slug"], "side-project");

    let res = client
        .post("/api/workspaces")
        .header(ContentType::JSON)
        .body(r#"{"name": "side project"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_member_listing_is_admin_gated_and_workspace_scoped() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client
        .get(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/members"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let members: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(members.iter().any(|m| m["name"] == "operator" && m["role"] == "admin"));

    // Another workspace's members are a 404 from this context
    let res = client
        .get("/api/workspaces/not-my-workspace/members")
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_api_key_lifecycle() {
    let client = test_client();
    onboard(&client, "operator");

    let res = client
        .post(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/keys"))
        .header(ContentType::JSON)
        .body(r#"{"name": "ci"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let created: serde_json::Value = res.into_json().unwrap();
    let key = created["key"].as_str().unwrap().to_string();
    let key_id = created["id"].as_str().unwrap().to_string();
    assert!(key.starts_with("tk_"));
    assert_eq!(created["key_prefix"].as_str().unwrap(), &key[..11]);

    // Listings only ever show the prefix
    let res = client
        .get(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/keys"))
        .dispatch();
    let keys: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].get("key").is_none());

    // The key authenticates as a workspace admin with no user
    let res = client
        .get("/api/auth/me")
        .header(Header::new("Authorization", format!("Bearer {key}")))
        .dispatch();
    let me: serde_json::Value = res.into_json().unwrap();
    assert_eq!(me["via"], "api_key");
    assert_eq!(me["role"], "admin");
    assert_eq!(me["workspace_id"], DEFAULT_WORKSPACE_ID);
    assert!(me["user"].is_null());

    // Revoked keys stop resolving (the request falls back to the cookie session)
    let res = client
        .delete(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/keys/{key_id}"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client
        .get("/api/auth/me")
        .header(Header::new("Authorization", format!("Bearer {key}")))
        .dispatch();
    let me: serde_json::Value = res.into_json().unwrap();
    assert_ne!(me["via"], "api_key");
}

#[test]
fn test_invite_flow_with_max_uses() {
    let client = test_client();
    onboard(&client, "operator");

    let res = client
        .post(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/invites"))
        .header(ContentType::JSON)
        .body(r#"{"role": "member", "max_uses": 1}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let invite: serde_json::Value = res.into_json().unwrap();
    let token = invite["token"].as_str().unwrap().to_string();

    client.post("/api/auth/logout").dispatch();

    let res = client
        .post(format!("/api/join/{token}"))
        .header(ContentType::JSON)
        .body(r#"{"name": "guest"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let joined: serde_json::Value = res.into_json().unwrap();
    assert_eq!(joined["user"]["name"], "guest");
    assert_eq!(joined["role"], "member");
    assert_eq!(joined["workspace_id"], DEFAULT_WORKSPACE_ID);

    // Single-use invite is now exhausted
    client.post("/api/auth/logout").dispatch();
    let res = client
        .post(format!("/api/join/{token}"))
        .header(ContentType::JSON)
        .body(r#"{"name": "another"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_join_with_bad_token_is_404() {
    let client = test_client();
    let res = client
        .post("/api/join/inv_definitely-not-real")
        .header(ContentType::JSON)
        .body(r#"{"name": "guest"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_revoked_invite_is_gone() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client
        .post(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/invites"))
        .header(ContentType::JSON)
        .body(r#"{}"#)
        .dispatch();
    let invite: serde_json::Value = res.into_json().unwrap();
    let invite_id = invite["id"].as_str().unwrap();
    let token = invite["token"].as_str().unwrap().to_string();

    let res = client
        .delete(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/invites/{invite_id}"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    client.post("/api/auth/logout").dispatch();
    let res = client
        .post(format!("/api/join/{token}"))
        .header(ContentType::JSON)
        .body(r#"{"name": "guest"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
