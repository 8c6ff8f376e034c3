use crate::common::{create_channel, general_channel_id, onboard, post_message, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_pin_is_idempotent() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let msg = post_message(&client, &id, "important");
    let mid = msg["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("/api/channels/{id}/messages/{mid}/pin"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let pinned: serde_json::Value = res.into_json().unwrap();
    assert_eq!(pinned["is_pinned"], true);
    let first_pinned_at = pinned["pinned_at"].clone();

    // Pinning again changes nothing
    let res = client
        .post(format!("/api/channels/{id}/messages/{mid}/pin"))
        .dispatch();
    let again: serde_json::Value = res.into_json().unwrap();
    assert_eq!(again["is_pinned"], true);
    assert_eq!(again["pinned_at"], first_pinned_at);

    // Explicit unpin clears the pin fields
    let res = client
        .post(format!("/api/channels/{id}/messages/{mid}/pin"))
        .header(ContentType::JSON)
        .body(r#"{"pinned": false}"#)
        .dispatch();
    let unpinned: serde_json::Value = res.into_json().unwrap();
    assert_eq!(unpinned["is_pinned"], false);
    assert!(unpinned["pinned_at"].is_null());
}

#[test]
fn test_pinned_listing_is_channel_scoped() {
    let client = test_client();
    onboard(&client, "operator");
    let a = create_channel(&client, "pin-a");
    let b = create_channel(&client, "pin-b");
    let in_a = post_message(&client, &a, "pin me");
    let in_b = post_message(&client, &b, "pin me too");
    for (channel, msg) in [(&a, &in_a), (&b, &in_b)] {
        let mid = msg["id"].as_str().unwrap();
        client
            .post(format!("/api/channels/{channel}/messages/{mid}/pin"))
            .dispatch();
    }

    let res = client
        .get(format!("/api/channels/{a}/messages/pinned"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let pins: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(pins.len(), 1);
    assert_eq!(pins[0]["channel_id"], a.as_str());
    assert_eq!(pins[0]["content"], "pin me");
}

#[test]
fn test_pinned_message_cannot_be_deleted() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let msg = post_message(&client, &id, "anchored");
    let mid = msg["id"].as_str().unwrap().to_string();
    client
        .post(format!("/api/channels/{id}/messages/{mid}/pin"))
        .dispatch();

    let res = client
        .delete(format!("/api/channels/{id}/messages/{mid}"))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["detail"].as_str().unwrap().contains("Unpin"));
}

#[test]
fn test_react_twice_toggles_off() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let msg = post_message(&client, &id, "nice");
    let mid = msg["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!("/api/channels/{id}/messages/{mid}/react"))
        .header(ContentType::JSON)
        .body(r#"{"emoji": "🎉"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["added"], true);

    let res = client
        .get(format!("/api/channels/{id}/messages/{mid}/reactions"))
        .dispatch();
    let reactions: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0]["emoji"], "🎉");
    assert_eq!(reactions[0]["count"], 1);
    assert_eq!(reactions[0]["users"][0], "operator");

    // Second identical reaction removes the first
    let res = client
        .post(format!("/api/channels/{id}/messages/{mid}/react"))
        .header(ContentType::JSON)
        .body(r#"{"emoji": "🎉"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["added"], false);

    let res = client
        .get(format!("/api/channels/{id}/messages/{mid}/reactions"))
        .dispatch();
    let reactions: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(reactions.is_empty());
}

#[test]
fn test_react_on_missing_message_is_404() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let res = client
        .post(format!("/api/channels/{id}/messages/ghost-id/react"))
        .header(ContentType::JSON)
        .body(r#"{"emoji": "👀"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
