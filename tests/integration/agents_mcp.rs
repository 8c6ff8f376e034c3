use crate::common::{
    general_channel_id, mcp_initialize, mcp_request, mcp_tool, onboard, post_message,
    register_agent, test_client,
};
use rocket::http::{ContentType, Status};

const ALL_TOOLS: [&str; 16] = [
    "register",
    "send_message",
    "get_messages",
    "create_channel",
    "join_channel",
    "list_channels",
    "list_agents",
    "update_profile",
    "heartbeat",
    "disconnect",
    "get_feature_requests",
    "create_feature_request",
    "vote_feature",
    "search_messages",
    "edit_message",
    "react_message",
];

#[test]
fn test_initialize_allocates_a_session() {
    let client = test_client();
    let session = mcp_initialize(&client);
    assert!(!session.is_empty());

    let (body, _) = mcp_request(&client, Some(&session), "tools/list", serde_json::json!({}));
    let tools = body["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    for expected in ALL_TOOLS {
        assert!(names.contains(&expected), "missing tool {expected}");
    }
}

#[test]
fn test_requests_without_session_are_rejected() {
    let client = test_client();
    let (body, _) = mcp_request(&client, None, "tools/list", serde_json::json!({}));
    assert_eq!(body["error"]["code"], -32000);

    let (body, _) = mcp_request(&client, Some("bogus"), "tools/list", serde_json::json!({}));
    assert_eq!(body["error"]["code"], -32000);
}

#[test]
fn test_tools_require_registration_first() {
    let client = test_client();
    let session = mcp_initialize(&client);
    for tool in ALL_TOOLS.iter().filter(|t| **t != "register") {
        let result = mcp_tool(&client, &session, tool, serde_json::json!({}));
        assert_eq!(
            result["error"], "Not registered. Call register first.",
            "tool {tool} should demand registration"
        );
    }
}

#[test]
fn test_register_allocates_compound_name_and_channels() {
    let client = test_client();
    let session = mcp_initialize(&client);
    let result = register_agent(&client, &session, "/tmp/proj-x");

    let name = result["agent_name"].as_str().unwrap();
    assert!(name.contains('-'), "expected adjective-animal, got {name}");
    assert_eq!(result["project_channel"], "#proj-x");
    assert!(result["master_prompt"].as_str().unwrap().contains(name));
    assert!(result["inject_prompt"].as_str().unwrap().contains(name));

    // Visible over REST, online, not a ghost
    let res = client.get(format!("/api/agents/{name}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let agent: serde_json::Value = res.into_json().unwrap();
    assert_eq!(agent["status"], "online");
    assert_eq!(agent["is_ghost"], false);

    // The project channel exists and is joined
    let channels = mcp_tool(&client, &session, "list_channels", serde_json::json!({}));
    let names: Vec<&str> = channels["channels"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert!(names.contains(&"#general"));
    assert!(names.contains(&"#proj-x"));
}

#[test]
fn test_register_resumes_by_name_and_allocates_fresh_otherwise() {
    let client = test_client();
    let session = mcp_initialize(&client);
    let first = register_agent(&client, &session, "/tmp/proj-y");
    let name = first["agent_name"].as_str().unwrap().to_string();

    // Same name on a new MCP session resumes the same agent
    let session2 = mcp_initialize(&client);
    let resumed = mcp_tool(
        &client,
        &session2,
        "register",
        serde_json::json!({
            "session_id": "fresh-session",
            "project_path": "/tmp/proj-y",
            "agent_name": name,
        }),
    );
    assert_eq!(resumed["agent_name"].as_str().unwrap(), name);

    // No name: a distinct agent
    let session3 = mcp_initialize(&client);
    let other = register_agent(&client, &session3, "/tmp/proj-z");
    assert_ne!(other["agent_name"].as_str().unwrap(), name);
}

#[test]
fn test_register_rejects_empty_session_id() {
    let client = test_client();
    let session = mcp_initialize(&client);
    let result = mcp_tool(
        &client,
        &session,
        "register",
        serde_json::json!({"session_id": "", "project_path": "/tmp/p"}),
    );
    assert!(result["error"].as_str().unwrap().contains("session_id"));
}

#[test]
fn test_mcp_sessions_are_isolated() {
    let client = test_client();
    let session1 = mcp_initialize(&client);
    let session2 = mcp_initialize(&client);
    register_agent(&client, &session1, "/tmp/iso");

    // session2 never saw a register; its state is its own
    let result = mcp_tool(
        &client,
        &session2,
        "send_message",
        serde_json::json!({"channel": "#general", "content": "hi"}),
    );
    assert_eq!(result["error"], "Not registered. Call register first.");

    // while session1 works
    let result = mcp_tool(
        &client,
        &session1,
        "send_message",
        serde_json::json!({"channel": "#general", "content": "hi from one"}),
    );
    assert_eq!(result["channel"], "#general");
}

#[test]
fn test_agent_message_flow_over_mcp() {
    let client = test_client();
    onboard(&client, "operator");
    let session = mcp_initialize(&client);
    let reg = register_agent(&client, &session, "/tmp/flow");
    let agent_name = reg["agent_name"].as_str().unwrap().to_string();

    let sent = mcp_tool(
        &client,
        &session,
        "send_message",
        serde_json::json!({"channel": "general", "content": "reporting in"}),
    );
    assert_eq!(sent["channel"], "#general");

    let general = general_channel_id(&client);
    let res = client
        .get(format!("/api/channels/{general}/messages"))
        .dispatch();
    let msgs: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(msgs
        .iter()
        .any(|m| m["content"] == "reporting in" && m["sender_name"] == agent_name.as_str()));

    // Edit own message, react, search
    let mid = sent["id"].as_str().unwrap();
    let edited = mcp_tool(
        &client,
        &session,
        "edit_message",
        serde_json::json!({"id": mid, "content": "reporting in, v2"}),
    );
    assert_eq!(edited["content"], "reporting in, v2");
    assert!(edited["edited_at"].is_string());

    let reacted = mcp_tool(
        &client,
        &session,
        "react_message",
        serde_json::json!({"id": mid, "emoji": "🫡"}),
    );
    assert_eq!(reacted["added"], true);
    let reacted = mcp_tool(
        &client,
        &session,
        "react_message",
        serde_json::json!({"id": mid, "emoji": "🫡"}),
    );
    assert_eq!(reacted["added"], false);

    let found = mcp_tool(
        &client,
        &session,
        "search_messages",
        serde_json::json!({"query": "reporting"}),
    );
    assert_eq!(found["results"].as_array().unwrap().len(), 1);
}

#[test]
fn test_get_messages_puts_mentions_first() {
    let client = test_client();
    onboard(&client, "operator");
    let session = mcp_initialize(&client);
    let reg = register_agent(&client, &session, "/tmp/prio");
    let agent_name = reg["agent_name"].as_str().unwrap().to_string();

    let general = general_channel_id(&client);
    post_message(&client, &general, "just chatter");
    post_message(&client, &general, &format!("@{agent_name} are you there?"));

    let result = mcp_tool(&client, &session, "get_messages", serde_json::json!({}));
    let messages = result["messages"].as_array().unwrap();
    assert!(!messages.is_empty());
    assert!(messages[0]["content"]
        .as_str()
        .unwrap()
        .contains("are you there"));
}

#[test]
fn test_create_channel_tool_conflicts_on_duplicate() {
    let client = test_client();
    let session = mcp_initialize(&client);
    register_agent(&client, &session, "/tmp/chan");

    let created = mcp_tool(
        &client,
        &session,
        "create_channel",
        serde_json::json!({"name": "workbench"}),
    );
    assert_eq!(created["name"], "#workbench");

    let dup = mcp_tool(
        &client,
        &session,
        "create_channel",
        serde_json::json!({"name": "#workbench"}),
    );
    assert!(dup["error"].as_str().unwrap().contains("already exists"));
}

#[test]
fn test_heartbeat_and_disconnect() {
    let client = test_client();
    let session = mcp_initialize(&client);
    let reg = register_agent(&client, &session, "/tmp/hb");
    let agent_name = reg["agent_name"].as_str().unwrap().to_string();

    let hb = mcp_tool(&client, &session, "heartbeat", serde_json::json!({}));
    assert_eq!(hb["ok"], true);

    let off = mcp_tool(&client, &session, "disconnect", serde_json::json!({}));
    assert_eq!(off["disconnected"], agent_name);

    let res = client.get(format!("/api/agents/{agent_name}")).dispatch();
    let agent: serde_json::Value = res.into_json().unwrap();
    assert_eq!(agent["status"], "offline");
}

#[test]
fn test_update_profile() {
    let client = test_client();
    let session = mcp_initialize(&client);
    register_agent(&client, &session, "/tmp/profile");

    let updated = mcp_tool(
        &client,
        &session,
        "update_profile",
        serde_json::json!({"description": "test pilot", "current_task": "running checks"}),
    );
    assert_eq!(updated["description"], "test pilot");
    assert_eq!(updated["current_task"], "running checks");

    let nothing = mcp_tool(&client, &session, "update_profile", serde_json::json!({}));
    assert!(nothing["error"].is_string());
}

#[test]
fn test_feature_tools_round_trip() {
    let client = test_client();
    let session = mcp_initialize(&client);
    register_agent(&client, &session, "/tmp/feat");

    let created = mcp_tool(
        &client,
        &session,
        "create_feature_request",
        serde_json::json!({"title": "agent-side threads", "description": "would help"}),
    );
    let fid = created["id"].as_str().unwrap();

    let voted = mcp_tool(
        &client,
        &session,
        "vote_feature",
        serde_json::json!({"feature_id": fid, "vote": 1}),
    );
    assert_eq!(voted["score"], 1);

    let bad = mcp_tool(
        &client,
        &session,
        "vote_feature",
        serde_json::json!({"feature_id": fid, "vote": 3}),
    );
    assert!(bad["error"].is_string());

    let listed = mcp_tool(&client, &session, "get_feature_requests", serde_json::json!({}));
    assert_eq!(listed["features"].as_array().unwrap().len(), 1);
}

#[test]
fn test_dm_creates_channel_and_message() {
    let client = test_client();
    onboard(&client, "operator");
    let session = mcp_initialize(&client);
    let reg = register_agent(&client, &session, "/tmp/dm");
    let agent_name = reg["agent_name"].as_str().unwrap().to_string();

    let res = client
        .post(format!("/api/agents/{agent_name}/dm"))
        .header(ContentType::JSON)
        .body(r#"{"content": "psst, over here"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let msg: serde_json::Value = res.into_json().unwrap();
    assert_eq!(msg["sender_name"], "operator");

    let res = client.get("/api/channels").dispatch();
    let channels: Vec<serde_json::Value> = res.into_json().unwrap();
    let dm = channels
        .iter()
        .find(|c| c["name"] == format!("#dm-{agent_name}"))
        .expect("DM channel created lazily");
    assert_eq!(dm["channel_type"], "dm");

    // DM to a missing agent is a 404
    let res = client
        .post("/api/agents/nobody-here/dm")
        .header(ContentType::JSON)
        .body(r#"{"content": "hello?"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_notifications_are_acknowledged_without_body() {
    let client = test_client();
    let session = mcp_initialize(&client);
    let envelope = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "notifications/initialized",
    });
    let res = client
        .post("/mcp")
        .header(ContentType::JSON)
        .header(rocket::http::Header::new("mcp-session-id", session))
        .body(envelope.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Accepted);
}
