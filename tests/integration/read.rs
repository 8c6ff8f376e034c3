use crate::common::{general_channel_id, onboard, post_message, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_unread_counts_and_mark_read() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);

    // Own messages never count as unread
    post_message(&client, &id, "from me");
    let res = client.get("/api/channels/unread").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let infos: Vec<serde_json::Value> = res.into_json().unwrap();
    let general = infos.iter().find(|i| i["channel_id"] == id.as_str()).unwrap();
    assert_eq!(general["unread_count"], 0);

    let res = client.post(format!("/api/channels/{id}/read")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert!(body["last_read_at"].is_string());
}

#[test]
fn test_read_receipts_never_regress() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);

    let res = client.post(format!("/api/channels/{id}/read")).dispatch();
    let first: serde_json::Value = res.into_json().unwrap();
    let stamp = first["last_read_at"].as_str().unwrap().to_string();

    // An older timestamp is clamped to the stored one
    let res = client
        .post(format!("/api/channels/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"last_read_at": "2000-01-01T00:00:00+00:00"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["last_read_at"].as_str().unwrap(), stamp);

    // A newer one advances it
    let res = client
        .post(format!("/api/channels/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"last_read_at": "2999-01-01T00:00:00+00:00"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["last_read_at"], "2999-01-01T00:00:00+00:00");
}

#[test]
fn test_mark_read_rejects_garbage_timestamps() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    let res = client
        .post(format!("/api/channels/{id}/read"))
        .header(ContentType::JSON)
        .body(r#"{"last_read_at": "yesterday-ish"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}
