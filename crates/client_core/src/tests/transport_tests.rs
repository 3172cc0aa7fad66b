use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::{OptionId, Role, SessionStatus};
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

#[derive(Clone, Default)]
struct ServerState {
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ServerState {
    async fn record(&self, route: &str, body: Value) {
        self.bodies.lock().await.push((route.to_string(), body));
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn request_code(State(state): State<ServerState>, Json(body): Json<Value>) -> StatusCode {
    state.record("request-code", body).await;
    StatusCode::NO_CONTENT
}

async fn verify_code(Json(body): Json<Value>) -> Response {
    if body["code"] == "123456" {
        Json(json!({"token": "tok-admin", "role": "ADMIN"})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid code"}))).into_response()
    }
}

async fn active_session() -> Json<Value> {
    Json(json!({
        "id": 3,
        "title": "Best Talk",
        "options": [{"id": 1, "text": "A"}, {"id": 2, "name": "B"}],
    }))
}

async fn submit_vote(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    match bearer(&headers).as_deref() {
        Some("voter") => {
            state.record("vote", body).await;
            StatusCode::OK.into_response()
        }
        _ => (StatusCode::UNAUTHORIZED, "missing token").into_response(),
    }
}

async fn live_results() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"B": 2, "A": 1}"#,
    )
}

async fn latest_final() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn final_by_id(Path(_id): Path<i64>) -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn create_session(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if bearer(&headers).as_deref() != Some("admin") {
        return StatusCode::FORBIDDEN.into_response();
    }
    let options: Vec<Value> = body["options"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, label)| json!({"id": index + 1, "text": label}))
        .collect();
    Json(json!({"id": 11, "title": body["title"], "status": "DRAFT", "options": options}))
        .into_response()
}

async fn activate(Path(id): Path<i64>) -> Json<Value> {
    Json(json!(format!("Session {id} activated")))
}

async fn close(Path(id): Path<i64>) -> String {
    format!("closed {id}")
}

async fn list_sessions(headers: HeaderMap) -> Response {
    if bearer(&headers).is_none() {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Login required"})))
            .into_response();
    }
    Json(json!([
        {"id": 3, "title": "Best Talk", "status": "ACTIVE", "options": []},
        {"id": 4, "title": "Worst Talk", "status": "CLOSED", "options": []},
    ]))
    .into_response()
}

async fn session_details(Path(id): Path<i64>) -> Response {
    if id == 3 {
        Json(json!({"id": 3, "title": "Best Talk", "status": "ACTIVE", "options": []}))
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"message": format!("Session {id} not found")})),
        )
            .into_response()
    }
}

async fn delete_session(Path(id): Path<i64>) -> Json<Value> {
    Json(json!({"message": format!("Deleted {id}")}))
}

async fn spawn_voting_server() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState::default();
    let app = Router::new()
        .route("/auth/request-code", post(request_code))
        .route("/auth/verify-code", post(verify_code))
        .route("/session/active", get(active_session))
        .route("/vote", post(submit_vote))
        .route("/results/live", get(live_results))
        .route("/results/final", get(latest_final))
        .route("/results/final/:id", get(final_by_id))
        .route("/admin/session", get(list_sessions).post(create_session))
        .route("/admin/session/activate/:id", post(activate))
        .route("/admin/session/close/:id", post(close))
        .route("/admin/session/:id", get(session_details).delete(delete_session))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn auth_calls_round_trip() {
    let (server_url, state) = spawn_voting_server().await;
    let api = HttpVotingApi::new(&server_url).expect("api");

    api.request_auth_code("host@example.com")
        .await
        .expect("request code");
    let token = api
        .verify_auth_code("host@example.com", "123456")
        .await
        .expect("verify");
    let err = api
        .verify_auth_code("host@example.com", "999999")
        .await
        .unwrap_err();

    assert_eq!(token.token.as_deref(), Some("tok-admin"));
    assert_eq!(token.role, Some(Role::Admin));
    assert_eq!(
        err,
        ClientError::Server {
            status: 401,
            message: "Invalid code".into()
        }
    );
    let bodies = state.bodies.lock().await;
    assert_eq!(bodies[0], ("request-code".into(), json!({"email": "host@example.com"})));
}

#[tokio::test]
async fn active_session_normalizes_minimal_payload() {
    let (server_url, _state) = spawn_voting_server().await;
    let api = HttpVotingApi::new(&server_url).expect("api");

    let session = api.active_session().await.expect("fetch").expect("session");

    assert_eq!(session.id, SessionId(3));
    assert_eq!(session.status, None);
    assert!(session.is_active());
    assert_eq!(session.options[0].label, "A");
    assert_eq!(session.options[1].label, "B");
}

#[tokio::test]
async fn vote_sends_bearer_token_and_camel_case_body() {
    let (server_url, state) = spawn_voting_server().await;
    let api = HttpVotingApi::new(&server_url).expect("api");
    let vote = SubmitVoteRequest {
        session_id: SessionId(3),
        option_id: OptionId(2),
    };

    api.submit_vote("voter", &vote).await.expect("vote");
    let err = api.submit_vote("stranger", &vote).await.unwrap_err();

    assert_eq!(
        err,
        ClientError::Server {
            status: 401,
            message: "missing token".into()
        }
    );
    let bodies = state.bodies.lock().await;
    assert_eq!(bodies[0], ("vote".into(), json!({"sessionId": 3, "optionId": 2})));
}

#[tokio::test]
async fn results_keep_order_and_treat_no_content_as_none() {
    let (server_url, _state) = spawn_voting_server().await;
    let api = HttpVotingApi::new(&server_url).expect("api");

    let live = api.live_results().await.expect("live").expect("map");
    let latest = api.latest_final_results().await.expect("final");
    let err = api.final_results(SessionId(3)).await.unwrap_err();

    assert_eq!(live.iter().collect::<Vec<_>>(), vec![("B", 2), ("A", 1)]);
    assert_eq!(latest, None);
    assert_eq!(
        err,
        ClientError::Server {
            status: 500,
            message: "Internal Server Error".into()
        }
    );
}

#[tokio::test]
async fn admin_calls_decode_every_message_shape() {
    let (server_url, _state) = spawn_voting_server().await;
    let api = HttpVotingApi::new(&server_url).expect("api");

    let created = api
        .create_session(
            "admin",
            &CreateSessionRequest {
                title: "Lunch".into(),
                options: vec!["Pizza".into(), "Tacos".into()],
            },
        )
        .await
        .expect("create");
    assert_eq!(created.status, Some(SessionStatus::Draft));
    assert_eq!(created.options[1].label, "Tacos");

    assert_eq!(
        api.activate_session("admin", SessionId(11)).await.expect("activate"),
        Some("Session 11 activated".into())
    );
    assert_eq!(
        api.close_session("admin", SessionId(11)).await.expect("close"),
        Some("closed 11".into())
    );
    assert_eq!(
        api.delete_session("admin", SessionId(11)).await.expect("delete"),
        Some("Deleted 11".into())
    );

    let sessions = api.list_sessions("admin").await.expect("list");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].status, Some(SessionStatus::Closed));
    assert!(api
        .session_details("admin", SessionId(3))
        .await
        .expect("details")
        .is_some());
    assert_eq!(
        api.session_details("admin", SessionId(9)).await.unwrap_err().to_string(),
        "Session 9 not found"
    );
    assert_eq!(
        api.create_session(
            "voter",
            &CreateSessionRequest {
                title: "x".into(),
                options: vec![]
            }
        )
        .await
        .unwrap_err(),
        ClientError::Server {
            status: 403,
            message: "Forbidden".into()
        }
    );
}

#[tokio::test]
async fn unreachable_server_is_a_network_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let api = HttpVotingApi::new(&format!("http://{addr}")).expect("api");

    let err = api.active_session().await.unwrap_err();

    assert!(matches!(err, ClientError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn silent_server_times_out_as_network_failure() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    let api = HttpVotingApi::with_timeout(&format!("http://{addr}"), Duration::from_millis(200))
        .expect("api");

    let started = std::time::Instant::now();
    let err = api.active_session().await.unwrap_err();

    assert!(matches!(err, ClientError::Network(_)), "unexpected error: {err:?}");
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn message_bodies_accept_string_object_or_text() {
    assert_eq!(message_from_body(r#""done""#), "done");
    assert_eq!(message_from_body(r#"{"message": "ok"}"#), "ok");
    assert_eq!(message_from_body(r#"{"status": "ok"}"#), r#"{"status": "ok"}"#);
    assert_eq!(message_from_body("plain"), "plain");
}
