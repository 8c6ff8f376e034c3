use crate::common::{create_channel, general_channel_id, onboard, post_message, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_seeded_general_channel() {
    let client = test_client();
    let res = client.get("/api/channels").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let channels: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(channels.iter().any(|c| c["name"] == "#general"));
}

#[test]
fn test_create_channel_auto_prefixes_hash() {
    let client = test_client();
    let res = client
        .post("/api/channels")
        .header(ContentType::JSON)
        .body(r#"{"name": "random", "topic": "anything"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["name"], "#random");
    assert_eq!(body["topic"], "anything");
    assert_eq!(body["channel_type"], "custom");
}

#[test]
fn test_duplicate_channel_name_conflicts() {
    let client = test_client();
    create_channel(&client, "dup");
    let res = client
        .post("/api/channels")
        .header(ContentType::JSON)
        .body(r##"{"name": "#dup"}"##)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_get_unknown_channel_is_404() {
    let client = test_client();
    let res = client.get("/api/channels/no-such-id").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["detail"].is_string());
}

#[test]
fn test_update_channel_topic() {
    let client = test_client();
    let id = create_channel(&client, "topical");
    let res = client
        .patch(format!("/api/channels/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"topic": "new topic"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["topic"], "new topic");
}

#[test]
fn test_archived_channel_rejects_messages() {
    let client = test_client();
    onboard(&client, "operator");
    let id = create_channel(&client, "old-news");
    let res = client.post(format!("/api/channels/{id}/archive")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["is_archived"], true);

    let res = client
        .post(format!("/api/channels/{id}/messages"))
        .header(ContentType::JSON)
        .body(r#"{"content": "too late"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    // Archived channels disappear from the default listing
    let res = client.get("/api/channels").dispatch();
    let channels: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(!channels.iter().any(|c| c["id"] == id.as_str()));
    let res = client.get("/api/channels?include_archived=true").dispatch();
    let channels: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(channels.iter().any(|c| c["id"] == id.as_str()));

    // And come back on unarchive
    let res = client
        .post(format!("/api/channels/{id}/unarchive"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["is_archived"], false);
}

#[test]
fn test_delete_channel_with_messages_is_refused() {
    let client = test_client();
    onboard(&client, "operator");
    let id = create_channel(&client, "keep-history");
    post_message(&client, &id, "for the record");

    let res = client.delete(format!("/api/channels/{id}")).dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["detail"].as_str().unwrap().contains("archive"));

    // An empty channel deletes fine
    let empty = create_channel(&client, "empty");
    let res = client.delete(format!("/api/channels/{empty}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_channel_analytics() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    post_message(&client, &id, "one");
    post_message(&client, &id, "two");

    let res = client.get(format!("/api/channels/{id}/analytics")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["message_count"], 2);
    assert_eq!(body["participant_count"], 1);
    assert_eq!(body["top_senders"][0]["sender_name"], "operator");
    assert_eq!(body["top_senders"][0]["message_count"], 2);
}
