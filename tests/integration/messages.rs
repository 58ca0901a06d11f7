use crate::common::{create_test_project, create_test_session, test_client};
use rocket::http::{ContentType, Status};

fn send_body() -> &'static str {
    r#"{"protocol_name": "chat", "protocol_version": "1.0.0", "payload": {"text": "hi"}}"#
}

#[test]
fn send_delivers_to_an_active_recipient() {
    let client = test_client();
    create_test_project(&client, "msg-proj");
    create_test_session(&client, "msg-proj", "sender");
    create_test_session(&client, "msg-proj", "recipient");

    let res = client
        .post("/api/v1/projects/msg-proj/sessions/sender/send/recipient")
        .header(ContentType::JSON)
        .body(send_body())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let result: serde_json::Value = res.into_json().unwrap();
    assert_eq!(result["delivered"], true);

    let res = client
        .get("/api/v1/projects/msg-proj/sessions/recipient/messages")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let messages: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["payload"]["text"], "hi");
}

#[test]
fn empty_payload_is_rejected() {
    let client = test_client();
    create_test_project(&client, "empty-payload-proj");
    create_test_session(&client, "empty-payload-proj", "sender");
    create_test_session(&client, "empty-payload-proj", "recipient");

    let res = client
        .post("/api/v1/projects/empty-payload-proj/sessions/sender/send/recipient")
        .header(ContentType::JSON)
        .body(r#"{"protocol_name": "chat", "protocol_version": "1.0.0", "payload": {}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn send_to_unknown_recipient_is_404() {
    let client = test_client();
    create_test_project(&client, "unknown-recipient-proj");
    create_test_session(&client, "unknown-recipient-proj", "sender");

    let res = client
        .post("/api/v1/projects/unknown-recipient-proj/sessions/sender/send/ghost")
        .header(ContentType::JSON)
        .body(send_body())
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn broadcast_reaches_every_other_session() {
    let client = test_client();
    create_test_project(&client, "broadcast-proj");
    create_test_session(&client, "broadcast-proj", "sender");
    create_test_session(&client, "broadcast-proj", "a");
    create_test_session(&client, "broadcast-proj", "b");

    let res = client
        .post("/api/v1/projects/broadcast-proj/sessions/sender/broadcast")
        .header(ContentType::JSON)
        .body(send_body())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let result: serde_json::Value = res.into_json().unwrap();
    let delivered = result["delivered"].as_array().unwrap();
    assert_eq!(delivered.len(), 2);
}

#[test]
fn cross_project_send_requires_cross_project_to_be_enabled() {
    let client = test_client();
    create_test_project(&client, "cp-source");
    create_test_project(&client, "cp-target");
    create_test_session(&client, "cp-source", "sender");
    create_test_session(&client, "cp-target", "recipient");

    let res = client
        .post("/api/v1/projects/cp-source/cross-project/cp-target/send/sender/recipient")
        .header(ContentType::JSON)
        .body(send_body())
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}
