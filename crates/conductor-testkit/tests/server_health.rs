//! Exercises `conductor-server`'s minimal HTTP surface end to end
//! against a real bound socket, backed by in-memory repositories.

#[tokio::test]
async fn health_reports_zero_connected_agents_before_any_registration() {
    let (addr, _handle) = conductor_testkit::start_test_server().await.unwrap();

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health")).await.unwrap().json().await.unwrap();

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connected_agents"], 0);
}

#[tokio::test]
async fn ready_returns_ok() {
    let (addr, _handle) = conductor_testkit::start_test_server().await.unwrap();
    let response = reqwest::get(format!("http://{addr}/ready")).await.unwrap();
    assert!(response.status().is_success());
}
