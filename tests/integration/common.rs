use rocket::local::blocking::Client;

/// Wrapper around `Client` that deletes its temp database on drop, so
/// repeated test runs don't accumulate `/tmp/broker_test_*.db` files.
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    let db_path = format!(
        "/tmp/broker_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let rocket = agent_broker::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

/// Creates a project and returns `(project_id, owner_api_key)`.
pub fn create_test_project(client: &Client, project_id: &str) -> (String, String) {
    use rocket::http::{ContentType, Status};
    let res = client
        .post("/api/v1/projects")
        .header(ContentType::JSON)
        .body(format!(r#"{{"project_id": "{project_id}", "name": "{project_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    (
        body["project_id"].as_str().unwrap().to_string(),
        body["plaintext_api_key"].as_str().unwrap().to_string(),
    )
}

/// Creates a session within an already-existing project. Declares support for
/// `chat` protocol `1.0.0` so sessions can exchange messages in tests without
/// each one separately negotiating capabilities.
pub fn create_test_session(client: &Client, project_id: &str, session_id: &str) -> serde_json::Value {
    use rocket::http::{ContentType, Status};
    let res = client
        .post(format!("/api/v1/projects/{project_id}/sessions"))
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"session_id": "{session_id}", "capabilities": {{"supported_protocols": {{"chat": ["1.0.0"]}}}}}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}
