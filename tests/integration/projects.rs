use crate::common::test_client;
use rocket::http::{ContentType, Status};

#[test]
fn create_and_get_project() {
    let client = test_client();
    let res = client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "widgets", "name": "Widgets"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["project_id"], "widgets");
    assert!(!body["plaintext_api_key"].as_str().unwrap().is_empty());

    let res = client.get("/api/v1/projects/widgets").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let project: serde_json::Value = res.into_json().unwrap();
    assert_eq!(project["name"], "Widgets");
    assert_eq!(project["status"], "active");
}

#[test]
fn reserved_project_id_is_rejected() {
    let client = test_client();
    let res = client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "admin", "name": "nope"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn duplicate_project_id_conflicts() {
    let client = test_client();
    client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "dup-proj", "name": "first"}"#)
        .dispatch();
    let res = client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "dup-proj", "name": "second"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn get_missing_project_is_404() {
    let client = test_client();
    let res = client.get("/api/v1/projects/nonexistent").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn update_project_requires_admin_key() {
    let client = test_client();
    let res = client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "secured", "name": "Secured"}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let api_key = body["plaintext_api_key"].as_str().unwrap().to_string();

    let res = client
        .patch("/api/v1/projects/secured")
        .header(ContentType::JSON)
        .body(r#"{"name": "renamed"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .patch("/api/v1/projects/secured")
        .header(ContentType::JSON)
        .header(rocket::http::Header::new("X-Api-Key", api_key))
        .body(r#"{"name": "renamed"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let updated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(updated["name"], "renamed");
}

#[test]
fn list_projects_filters_by_name() {
    let client = test_client();
    client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "alpha-proj", "name": "Alpha"}"#)
        .dispatch();
    client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "beta-proj", "name": "Beta"}"#)
        .dispatch();

    let res = client.get("/api/v1/projects?name_filter=Alpha").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let projects: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(projects.iter().any(|p| p["project_id"] == "alpha-proj"));
    assert!(!projects.iter().any(|p| p["project_id"] == "beta-proj"));
}
