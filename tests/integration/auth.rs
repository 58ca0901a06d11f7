use crate::common::test_client;
use rocket::http::{ContentType, Header, Status};

#[test]
fn register_login_and_refresh_cycle() {
    let client = test_client();
    let res = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "alice", "email": "alice@example.com", "password": "correct horse battery"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let user: serde_json::Value = res.into_json().unwrap();
    assert_eq!(user["username"], "alice");

    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "alice", "password": "correct horse battery"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let tokens: serde_json::Value = res.into_json().unwrap();
    let access = tokens["access_token"].as_str().unwrap().to_string();
    let refresh = tokens["refresh_token"].as_str().unwrap().to_string();
    assert!(!access.is_empty());

    let res = client
        .post("/api/v1/auth/refresh")
        .header(ContentType::JSON)
        .body(format!("\"{refresh}\""))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let refreshed: serde_json::Value = res.into_json().unwrap();
    assert!(!refreshed["access_token"].as_str().unwrap().is_empty());
}

#[test]
fn login_with_wrong_password_is_unauthorized() {
    let client = test_client();
    client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "bob", "email": "bob@example.com", "password": "correct horse battery"}"#)
        .dispatch();

    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "bob", "password": "wrong password entirely"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn password_below_minimum_length_is_rejected() {
    let client = test_client();
    let res = client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "short", "email": "short@example.com", "password": "tiny"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn logout_requires_bearer_token_and_revokes_it() {
    let client = test_client();
    client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "carol", "email": "carol@example.com", "password": "correct horse battery"}"#)
        .dispatch();
    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "carol", "password": "correct horse battery"}"#)
        .dispatch();
    let tokens: serde_json::Value = res.into_json().unwrap();
    let access = tokens["access_token"].as_str().unwrap().to_string();

    let res = client
        .post("/api/v1/auth/logout")
        .header(ContentType::JSON)
        .body(format!("\"{access}\""))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    let res = client
        .post("/api/v1/auth/logout")
        .header(ContentType::JSON)
        .header(Header::new("Authorization", format!("Bearer {access}")))
        .body(format!("\"{access}\""))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn register_agent_requires_authenticated_user() {
    let client = test_client();
    let res = client
        .post("/api/v1/agents/register")
        .header(ContentType::JSON)
        .body(r#"{"project_id": "default", "nickname": "scout"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);

    client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(r#"{"username": "dave", "email": "dave@example.com", "password": "correct horse battery"}"#)
        .dispatch();
    let res = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(r#"{"username": "dave", "password": "correct horse battery"}"#)
        .dispatch();
    let tokens: serde_json::Value = res.into_json().unwrap();
    let access = tokens["access_token"].as_str().unwrap().to_string();

    let res = client
        .post("/api/v1/agents/register")
        .header(ContentType::JSON)
        .header(Header::new("Authorization", format!("Bearer {access}")))
        .body(r#"{"project_id": "default", "nickname": "scout"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let created: serde_json::Value = res.into_json().unwrap();
    assert!(!created["plaintext_token"].as_str().unwrap().is_empty());
    assert_eq!(created["nickname"], "scout");
}
