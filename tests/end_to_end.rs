use cadence_relay::backend::BackendUrl;
use cadence_relay::chat::ChatSession;
use cadence_relay::client::ProxyClient;
use cadence_relay::credentials::CredentialStore;
use cadence_relay::server::{AppState, router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_relay(backend: &MockServer) -> String {
    let state = AppState {
        http: reqwest::Client::new(),
        backend: BackendUrl::parse(&backend.uri()).unwrap(),
        credentials: CredentialStore::default(),
    };
    let app = router(Arc::new(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn login_then_chat_uses_session_cookie() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"username": "ops", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "secret-token"})))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/orgs"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"org_id": "o1", "name": "Acme", "status": "active", "role": "admin"}
        ])))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/orgs/o1/completion/stream"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"content\":\"pong\",\"session_id\":\"conv-7\"}\n\n",
            "text/event-stream",
        ))
        .expect(1)
        .mount(&backend)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/auth/logout"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&backend)
        .await;

    let relay = spawn_relay(&backend).await;
    let client = ProxyClient::new(&relay).unwrap();

    assert!(client.login("ops", "hunter2").await.unwrap());

    let orgs = client.orgs().await.unwrap();
    assert_eq!(orgs.len(), 1);
    assert_eq!(orgs[0].org_id, "o1");

    let session = ChatSession::new(client.clone());
    session.set_org("o1");
    session.select_instance("i1");
    session.send("ping").await.unwrap();

    assert_eq!(session.messages()[1].content, "pong");
    assert_eq!(session.conversation_id().as_deref(), Some("conv-7"));

    client.logout().await;
}

#[tokio::test]
async fn health_passes_through_relay() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&backend)
        .await;

    let relay = spawn_relay(&backend).await;
    let client = ProxyClient::new(&relay).unwrap();

    assert_eq!(client.health().await, json!({"status": "ok"}));
}
