use crate::common::{create_channel, general_channel_id, onboard, post_message, test_client};
use rocket::http::Status;

#[test]
fn test_search_applies_text_and_channel_filter_together() {
    let client = test_client();
    onboard(&client, "operator");
    let general = general_channel_id(&client);
    let random = create_channel(&client, "random");
    post_message(&client, &general, "banana");
    post_message(&client, &random, "banana");

    let channel = urlencoding::encode("#general");
    let res = client
        .get(format!("/api/search?q=banana&channel={channel}"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["channel_name"], "#general");
    assert_eq!(body["results"][0]["content"], "banana");
}

#[test]
fn test_underscore_matches_literally() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    post_message(&client, &id, "a_b");
    post_message(&client, &id, "axb");
    post_message(&client, &id, "cat");

    let res = client.get("/api/search?q=_").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["content"], "a_b");
}

#[test]
fn test_percent_matches_literally() {
    let client = test_client();
    onboard(&client, "operator");
    let id = general_channel_id(&client);
    post_message(&client, &id, "100% done");
    post_message(&client, &id, "100 done");

    let res = client
        .get(format!("/api/search?q={}", urlencoding::encode("100%")))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["content"], "100% done");
}

#[test]
fn test_empty_query_is_rejected() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client.get("/api/search?q=%20").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_search_unknown_channel_is_404() {
    let client = test_client();
    onboard(&client, "operator");
    let res = client
        .get(format!("/api/search?q=x&channel={}", urlencoding::encode("#nope")))
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
