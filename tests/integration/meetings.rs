use crate::common::test_client;
use rocket::http::{ContentType, Status};

#[test]
fn create_meeting_assigns_speaking_order_and_moderator() {
    let client = test_client();
    let res = client
        .post("/api/v1/meetings")
        .header(ContentType::JSON)
        .body(r#"{"title": "Roadmap review", "participant_ids": ["a", "b", "c"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let meeting: serde_json::Value = res.into_json().unwrap();
    assert_eq!(meeting["title"], "Roadmap review");
    assert_eq!(meeting["status"], "pending");
    assert_eq!(meeting["current_round"], 0);
}

#[test]
fn create_meeting_requires_at_least_two_participants() {
    let client = test_client();
    let res = client
        .post("/api/v1/meetings")
        .header(ContentType::JSON)
        .body(r#"{"title": "Solo", "participant_ids": ["a"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn get_missing_meeting_is_404() {
    let client = test_client();
    let res = client
        .get("/api/v1/meetings/00000000-0000-0000-0000-000000000000")
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn malformed_meeting_id_is_a_validation_error() {
    let client = test_client();
    let res = client.get("/api/v1/meetings/not-a-uuid").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn add_participant_appends_at_next_speaking_order() {
    let client = test_client();
    let res = client
        .post("/api/v1/meetings")
        .header(ContentType::JSON)
        .body(r#"{"title": "Growing meeting", "participant_ids": ["a", "b"]}"#)
        .dispatch();
    let meeting: serde_json::Value = res.into_json().unwrap();
    let meeting_id = meeting["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/v1/meetings/{meeting_id}/participants/d"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let participant: serde_json::Value = res.into_json().unwrap();
    assert_eq!(participant["speaking_order"], 3);
    assert_eq!(participant["role"], "participant");
}

#[test]
fn messages_and_decisions_start_empty() {
    let client = test_client();
    let res = client
        .post("/api/v1/meetings")
        .header(ContentType::JSON)
        .body(r#"{"title": "Fresh meeting", "participant_ids": ["a", "b"]}"#)
        .dispatch();
    let meeting: serde_json::Value = res.into_json().unwrap();
    let meeting_id = meeting["id"].as_str().unwrap();

    let res = client.get(format!("/api/v1/meetings/{meeting_id}/messages")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let messages: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(messages.is_empty());

    let res = client.get(format!("/api/v1/meetings/{meeting_id}/decisions")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let decisions: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(decisions.is_empty());
}

#[test]
fn opinion_and_vote_submission_without_a_running_discussion_is_not_accepted() {
    let client = test_client();
    let res = client
        .post("/api/v1/meetings")
        .header(ContentType::JSON)
        .body(r#"{"title": "No discussion yet", "participant_ids": ["a", "b"]}"#)
        .dispatch();
    let meeting: serde_json::Value = res.into_json().unwrap();
    let meeting_id = meeting["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/v1/meetings/{meeting_id}/participants/a/opinion"))
        .header(ContentType::JSON)
        .body(r#"{"content": "looks fine to me"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["accepted"], false);
}
