use crate::common::{onboard, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_health_is_public() {
    let client = test_client();
    let res = client.get("/api/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "talkto");
}

#[test]
fn test_localhost_bypass_is_admin_without_user() {
    let client = test_client();
    let res = client.get("/api/auth/me").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["via"], "localhost");
    assert_eq!(body["role"], "admin");
    assert!(body["user"].is_null());
}

#[test]
fn test_onboard_creates_human_and_session() {
    let client = test_client();
    let body = onboard(&client, "operator");
    assert_eq!(body["user"]["name"], "operator");
    assert_eq!(body["user"]["user_type"], "human");
    assert!(body["token"].as_str().unwrap().starts_with("ses_"));

    // Cookie session now resolves the user
    let res = client.get("/api/auth/me").dispatch();
    let me: serde_json::Value = res.into_json().unwrap();
    assert_eq!(me["via"], "session");
    assert_eq!(me["user"]["name"], "operator");
}

#[test]
fn test_onboard_twice_conflicts() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client
        .post("/api/users/onboard")
        .header(ContentType::JSON)
        .body(r#"{"name": "second"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["detail"].as_str().unwrap().contains("onboarded"));
}

#[test]
fn test_onboard_rejects_empty_name() {
    let client = test_client();
    let res = client
        .post("/api/users/onboard")
        .header(ContentType::JSON)
        .body(r#"{"name": "  "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_logout_revokes_session() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client.post("/api/auth/logout").dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Back to the localhost bypass, which now resolves the onboarded human
    let res = client.get("/api/auth/me").dispatch();
    let me: serde_json::Value = res.into_json().unwrap();
    assert_eq!(me["via"], "localhost");
    assert_eq!(me["user"]["name"], "operator");
}

#[test]
fn test_users_me_update_and_delete() {
    let client = test_client();
    onboard(&client, "operator");

    let res = client
        .patch("/api/users/me")
        .header(ContentType::JSON)
        .body(r#"{"display_name": "The Operator", "about": "keeps the lights on"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let me: serde_json::Value = res.into_json().unwrap();
    assert_eq!(me["display_name"], "The Operator");
    assert_eq!(me["about"], "keeps the lights on");

    let res = client.delete("/api/users/me").dispatch();
    assert_eq!(res.status(), Status::NoContent);
}

#[test]
fn test_me_requires_a_user() {
    let client = test_client();
    // No human onboarded: bypass has no user to act as
    let res = client.get("/api/users/me").dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["detail"].is_string());
}
