use crate::common::{create_channel, general_channel_id, onboard, post_message, test_client};
use rocket::http::{ContentType, Status};
use talkto::db::DEFAULT_WORKSPACE_ID;

#[test]
fn test_post_and_list_messages() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);

    let msg = post_message(&client, &id, "Hello world!");
    assert_eq!(msg["content"], "Hello world!");
    assert_eq!(msg["sender_name"], "operator");
    assert_eq!(msg["channel_id"], id.as_str());

    let res = client.get(format!("/api/channels/{id}/messages")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["content"], "Hello world!");
}

#[test]
fn test_messages_never_leak_across_channels() {
    let client = test_client();
    onboard(&client, "operator");
    let a = create_channel(&client, "alpha");
    let b = create_channel(&client, "beta");
    post_message(&client, &a, "in alpha");
    post_message(&client, &b, "in beta");

    let res = client.get(format!("/api/channels/{a}/messages")).dispatch();
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(msgs.len(), 1);
    assert!(msgs.iter().all(|m| m["channel_id"] == a.as_str()));
}

#[test]
fn test_cursor_pagination_with_before() {
    let client = test_client();
    onboard(&client, "operator");
    let id = create_channel(&client, "paged");
    let mut ids = Vec::new();
    for i in 1..=5 {
        ids.push(post_message(&client, &id, &format!("m{i}"))["id"]
            .as_str()
            .unwrap()
            .to_string());
    }

    // Latest two
    let res = client
        .get(format!("/api/channels/{id}/messages?limit=2"))
        .dispatch();
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0]["content"], "m4");
    assert_eq!(msgs[1]["content"], "m5");

    // Everything strictly before m4
    let res = client
        .get(format!("/api/channels/{id}/messages?before={}&limit=10", ids[3]))
        .dispatch();
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    let contents: Vec<&str> = msgs.iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["m1", "m2", "m3"]);
}

#[test]
fn test_message_validation() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);

    let res = client
        .post(format!("/api/channels/{id}/messages"))
        .header(ContentType::JSON)
        .body(r#"{"content": "   "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let long = "x".repeat(32_001);
    let res = client
        .post(format!("/api/channels/{id}/messages"))
        .header(ContentType::JSON)
        .body(serde_json::json!({"content": long}).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_parent_id_round_trip_and_validation() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let root = post_message(&client, &id, "root");

    let res = client
        .post(format!("/api/channels/{id}/messages"))
        .header(ContentType::JSON)
        .body(serde_json::json!({"content": "reply", "parent_id": root["id"]}).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let reply: serde_json::Value = res.into_json().unwrap();
    assert_eq!(reply["parent_id"], root["id"]);

    // The read path exposes it too
    let res = client.get(format!("/api/channels/{id}/messages")).dispatch();
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(msgs[1]["parent_id"], root["id"]);

    // A parent from nowhere is a validation failure
    let res = client
        .post(format!("/api/channels/{id}/messages"))
        .header(ContentType::JSON)
        .body(r#"{"content": "reply", "parent_id": "bogus"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_edit_preserves_identity_and_sets_edited_at() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let msg = post_message(&client, &id, "draft");
    assert!(msg["edited_at"].is_null());

    let res = client
        .patch(format!("/api/channels/{id}/messages/{}", msg["id"].as_str().unwrap()))
        .header(ContentType::JSON)
        .body(r#"{"content": "final"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let edited: serde_json::Value = res.into_json().unwrap();
    assert_eq!(edited["id"], msg["id"]);
    assert_eq!(edited["channel_id"], msg["channel_id"]);
    assert_eq!(edited["content"], "final");
    assert!(edited["edited_at"].is_string());
}

#[test]
fn test_only_the_sender_can_edit() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let msg = post_message(&client, &id, "mine");
    let mid = msg["id"].as_str().unwrap().to_string();

    // Second human arrives via invite
    let res = client
        .post(format!("/api/workspaces/{DEFAULT_WORKSPACE_ID}/invites"))
        .header(ContentType::JSON)
        .body(r#"{"role": "member"}"#)
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

    let res = client
        .patch(format!("/api/channels/{id}/messages/{mid}"))
        .header(ContentType::JSON)
        .body(r#"{"content": "hijacked"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_delete_message_removes_it() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let msg = post_message(&client, &id, "ephemeral");
    let mid = msg["id"].as_str().unwrap();

    let res = client
        .delete(format!("/api/channels/{id}/messages/{mid}"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/api/channels/{id}/messages")).dispatch();
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(msgs.is_empty());
}

#[test]
fn test_message_rate_limit_trips_429() {
    let config = talkto::rate_limit::RateLimitConfig {
        messages_max: 3,
        ..talkto::rate_limit::RateLimitConfig::default()
    };
    let client = crate::common::test_client_with_rate_limits(config);
    onboard(&client, "operator");
    let id = general_channel_id(&client);

    for i in 0..3 {
        post_message(&client, &id, &format!("ok {i}"));
    }
    let res = client
        .post(format!("/api/channels/{id}/messages"))
        .header(ContentType::JSON)
        .body(r#"{"content": "over quota"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
    assert!(res.headers().get_one("Retry-After").is_some());
}
