use crate::common::{create_test_project, test_client};
use rocket::http::{ContentType, Status};

fn sample_schema() -> &'static str {
    r#"{"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}"#
}

#[test]
fn register_and_get_protocol() {
    let client = test_client();
    create_test_project(&client, "proto-proj");

    let res = client
        .post("/api/v1/projects/proto-proj/protocols")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"name": "chat", "version": "1.0.0", "message_schema": {}}}"#,
            sample_schema()
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/v1/projects/proto-proj/protocols/chat/1.0.0").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let protocol: serde_json::Value = res.into_json().unwrap();
    assert_eq!(protocol["name"], "chat");
    assert_eq!(protocol["version"], "1.0.0");
}

#[test]
fn register_invalid_schema_is_rejected() {
    let client = test_client();
    create_test_project(&client, "bad-schema-proj");

    let res = client
        .post("/api/v1/projects/bad-schema-proj/protocols")
        .header(ContentType::JSON)
        .body(r#"{"name": "broken", "version": "1.0.0", "message_schema": "not a schema object at all"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn discover_lists_registered_protocols() {
    let client = test_client();
    create_test_project(&client, "discover-proj");
    client
        .post("/api/v1/projects/discover-proj/protocols")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"name": "chat", "version": "1.0.0", "message_schema": {}}}"#,
            sample_schema()
        ))
        .dispatch();

    let res = client.get("/api/v1/projects/discover-proj/protocols").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let protocols: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(protocols.len(), 1);
    assert_eq!(protocols[0]["name"], "chat");
}

#[test]
fn share_protocol_makes_it_discoverable_across_projects() {
    let client = test_client();
    create_test_project(&client, "source-proj");
    create_test_project(&client, "target-proj");
    client
        .post("/api/v1/projects/source-proj/protocols")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"name": "shared-proto", "version": "1.0.0", "message_schema": {}}}"#,
            sample_schema()
        ))
        .dispatch();

    let res = client
        .post("/api/v1/projects/source-proj/protocols/shared-proto/1.0.0/share/target-proj")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get("/api/v1/projects/target-proj/protocols?include_shared=true")
        .dispatch();
    let protocols: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(protocols.iter().any(|p| p["name"] == "shared-proto" && p["source_project_id"] == "source-proj"));
}

#[test]
fn get_missing_protocol_is_404() {
    let client = test_client();
    create_test_project(&client, "empty-proj");
    let res = client.get("/api/v1/projects/empty-proj/protocols/ghost/1.0.0").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
