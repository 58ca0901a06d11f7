use crate::common::{create_test_project, create_test_session, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn create_and_get_session() {
    let client = test_client();
    create_test_project(&client, "session-proj");

    let session = create_test_session(&client, "session-proj", "agent-1");
    assert_eq!(session["session_id"], "agent-1");
    assert_eq!(session["status"], "active");
    assert_eq!(session["queue_size"], 0);

    let res = client.get("/api/v1/projects/session-proj/sessions/agent-1").dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn heartbeat_updates_last_heartbeat() {
    let client = test_client();
    create_test_project(&client, "heartbeat-proj");
    create_test_session(&client, "heartbeat-proj", "agent-1");

    let res = client
        .post("/api/v1/projects/heartbeat-proj/sessions/agent-1/heartbeat")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let session: serde_json::Value = res.into_json().unwrap();
    assert_eq!(session["status"], "active");
}

#[test]
fn disconnect_marks_session_disconnected() {
    let client = test_client();
    create_test_project(&client, "disc-proj");
    create_test_session(&client, "disc-proj", "agent-1");

    let res = client.delete("/api/v1/projects/disc-proj/sessions/agent-1").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let session: serde_json::Value = res.into_json().unwrap();
    assert_eq!(session["status"], "disconnected");
}

#[test]
fn duplicate_session_id_replaces_the_previous_one() {
    let client = test_client();
    create_test_project(&client, "replace-proj");
    create_test_session(&client, "replace-proj", "agent-1");

    let res = client
        .post("/api/v1/projects/replace-proj/sessions")
        .header(ContentType::JSON)
        .body(r#"{"session_id": "agent-1", "capabilities": {}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let session: serde_json::Value = res.into_json().unwrap();
    assert_eq!(session["queue_size"], 0);
}

#[test]
fn get_session_on_unknown_project_is_404() {
    let client = test_client();
    let res = client.get("/api/v1/projects/no-such-project/sessions/agent-1").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn list_sessions_filters_by_status() {
    let client = test_client();
    create_test_project(&client, "list-sess-proj");
    create_test_session(&client, "list-sess-proj", "agent-1");
    create_test_session(&client, "list-sess-proj", "agent-2");
    client.delete("/api/v1/projects/list-sess-proj/sessions/agent-2").dispatch();

    let res = client.get("/api/v1/projects/list-sess-proj/sessions?status=active").dispatch();
    let sessions: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(sessions.iter().any(|s| s["session_id"] == "agent-1"));
    assert!(!sessions.iter().any(|s| s["session_id"] == "agent-2"));
}
