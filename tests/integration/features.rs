use crate::common::{onboard, test_client};
use rocket::http::{ContentType, Status};

fn create_feature(client: &rocket::local::blocking::Client, title: &str) -> String {
    let res = client
        .post("/api/features")
        .header(ContentType::JSON)
        .body(serde_json::json!({"title": title, "description": "please"}).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    body["id"].as_str().unwrap().to_string()
}

#[test]
fn test_create_and_list_features() {
    let client = test_client();
    onboard(&client, "operator");
    create_feature(&client, "dark mode");

    let res = client.get("/api/features").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let features: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["title"], "dark mode");
    assert_eq!(features[0]["status"], "open");
    assert_eq!(features[0]["score"], 0);
}

#[test]
fn test_vote_upsert_replaces_previous_vote() {
    let client = test_client();
    onboard(&client, "operator");
    let id = create_feature(&client, "threads");

    let vote = |v: i64| {
        let res = client
            .post(format!("/api/features/{id}/vote"))
            .header(ContentType::JSON)
            .body(serde_json::json!({"vote": v}).to_string())
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
        res.into_json::<serde_json::Value>().unwrap()
    };

    let body = vote(1);
    assert_eq!(body["score"], 1);
    assert_eq!(body["vote_count"], 1);

    // Same vote again: still a single +1, not two
    let body = vote(1);
    assert_eq!(body["score"], 1);
    assert_eq!(body["vote_count"], 1);

    // Flipping replaces it
    let body = vote(-1);
    assert_eq!(body["score"], -1);
    assert_eq!(body["vote_count"], 1);
}

#[test]
fn test_vote_must_be_plus_or_minus_one() {
    let client = test_client();
    onboard(&client, "operator");
    let id = create_feature(&client, "emoji packs");
    let res = client
        .post(format!("/api/features/{id}/vote"))
        .header(ContentType::JSON)
        .body(r#"{"vote": 5}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_admin_status_update() {
    let client = test_client();
    onboard(&client, "operator"); // first human is admin
    let id = create_feature(&client, "search filters");

    let res = client
        .patch(format!("/api/features/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"status": "planned", "reason": "next sprint"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "planned");
    assert_eq!(body["reason"], "next sprint");
    assert!(body["updated_at"].is_string());

    let res = client
        .patch(format!("/api/features/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"status": "someday"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}
