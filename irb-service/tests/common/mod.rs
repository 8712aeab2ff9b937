//! Shared setup for the irb-service integration tests.
//!
//! Every test gets its own router over a fresh in-memory store, so tests
//! run in parallel without a database.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use irb_service::{
    build_router,
    config::IrbConfig,
    models::{NewUser, Role, StudyStatus, User},
    services::{IrbStore, MemoryRevocation, MemoryStore},
    utils::{hash_password, Password},
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse-battery";
pub const CLIENT_IP: &str = "203.0.113.10";
pub const BOUNDARY: &str = "irb-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub struct TestUser {
    pub user: User,
    pub token: String,
}

impl TestUser {
    pub fn id(&self) -> Uuid {
        self.user.user_id
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let mut config = IrbConfig::local();
        config.rate_limit.login_attempts = 1000;
        config.rate_limit.global_ip_limit = 10_000;
        Self::with_config(config)
    }

    pub fn with_config(config: IrbConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            config,
            store.clone() as Arc<dyn IrbStore>,
            Arc::new(MemoryRevocation::new()),
        );
        Self {
            router: build_router(state.clone()),
            state,
            store,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// JSON request with an optional bearer token. Returns the status and the
    /// parsed body (`Value::Null` when the body is empty or not JSON).
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", CLIENT_IP);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = self.send(req).await;
        let status = res.status();
        (status, body_json(res).await)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.json(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.json(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.json(Method::PATCH, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> StatusCode {
        self.json(Method::DELETE, uri, Some(token), None).await.0
    }

    /// Insert a user straight into the store.
    pub async fn create_user(&self, role: Role, email: &str) -> User {
        let password_hash = hash_password(&Password::new(PASSWORD)).unwrap();
        self.store
            .create_user(User::new(NewUser {
                email: email.to_string(),
                full_name: format!("{} user", role),
                role,
                password_hash: password_hash.into_string(),
            }))
            .await
            .unwrap()
    }

    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .json(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["access_token"].as_str().unwrap().to_string()
    }

    /// Create a user with a unique email and log them in.
    pub async fn user(&self, role: Role) -> TestUser {
        let email = format!("{}-{}@irb.test", role, Uuid::new_v4().simple());
        let user = self.create_user(role, &email).await;
        let token = self.login(&email).await;
        TestUser { user, token }
    }

    pub async fn create_study(&self, owner: &TestUser, protocol: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/studies",
                &owner.token,
                json!({
                    "protocol_number": protocol,
                    "title": format!("Study {}", protocol),
                    "description": "Observational study",
                    "risk_level": "minimal",
                    "start_date": "2025-01-01",
                    "end_date": "2030-12-31",
                    "target_enrollment": 40,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create study failed: {}", body);
        body
    }

    pub async fn transition(
        &self,
        token: &str,
        study_id: &str,
        to: StudyStatus,
        notes: Option<&str>,
    ) -> (StatusCode, Value) {
        self.post(
            &format!("/api/studies/{}/transition", study_id),
            token,
            json!({ "to": to, "notes": notes }),
        )
        .await
    }

    /// Drive a new study owned by `owner` all the way to `active`.
    pub async fn active_study(&self, owner: &TestUser, protocol: &str) -> String {
        let study = self.create_study(owner, protocol).await;
        let id = study["study_id"].as_str().unwrap().to_string();
        let reviewer = self.user(Role::Reviewer).await;
        let chair = self.user(Role::IrbChair).await;

        let steps = [
            (owner.token.as_str(), StudyStatus::Submitted, None),
            (reviewer.token.as_str(), StudyStatus::Reviewed, Some("Reviewed")),
            (chair.token.as_str(), StudyStatus::Active, None),
        ];
        for (token, to, notes) in steps {
            let (status, body) = self.transition(token, &id, to, notes).await;
            assert_eq!(status, StatusCode::OK, "transition to {} failed: {}", to, body);
        }
        id
    }

    pub async fn upload(
        &self,
        token: &str,
        study_id: &str,
        kind: &str,
        title: &str,
        file_name: &str,
        content: &[u8],
    ) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/studies/{}/documents", study_id))
            .header("x-forwarded-for", CLIENT_IP)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(kind, title, file_name, content)))
            .unwrap();
        let res = self.send(req).await;
        let status = res.status();
        (status, body_json(res).await)
    }
}

pub fn multipart_body(kind: &str, title: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in [("kind", kind), ("title", title)] {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/pdf\r\n\r\n",
            BOUNDARY, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub async fn body_bytes(res: Response) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(res: Response) -> Value {
    let bytes = body_bytes(res).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub async fn body_text(res: Response) -> String {
    String::from_utf8(body_bytes(res).await).unwrap()
}
