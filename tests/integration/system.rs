use crate::common::{create_test_project, test_client};
use rocket::http::Status;

#[test]
fn health_reports_ok() {
    let client = test_client();
    let res = client.get("/api/v1/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
}

#[test]
fn stats_returns_project_and_message_counters() {
    let client = test_client();
    let (project_id, _) = create_test_project(&client, "stats-proj");

    let res = client.get(format!("/api/v1/stats?project_id={project_id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["project"]["session_count"], 0);
    assert_eq!(body["messages"]["total_sent"], 0);
}

#[test]
fn stats_for_unknown_project_is_404() {
    let client = test_client();
    let res = client.get("/api/v1/stats?project_id=nonexistent").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
