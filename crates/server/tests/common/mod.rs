#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use lectern_server::{
    config::Config,
    db::Database,
    services::{
        identity::{IdentityClaims, IdentityError, IdentityProvider},
        mailer::{Mailer, OutgoingEmail},
    },
    AppState,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

impl RecordingMailer {
    /// The verification token from the most recent email sent to `to`.
    pub fn verification_token(&self, to: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let email = sent
            .iter()
            .rev()
            .find(|email| email.to == to)
            .expect("no email sent to recipient");
        let start = email.text.find("token=").expect("no token in email") + "token=".len();
        email.text[start..].trim().to_string()
    }
}

/// Accepts assertions of the form `valid:<email>`.
pub struct FakeIdentity;

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn verify(&self, assertion: &str) -> Result<IdentityClaims, IdentityError> {
        match assertion.strip_prefix("valid:") {
            Some(email) => Ok(IdentityClaims {
                email: email.to_string(),
                name: Some("Identity User".to_string()),
                picture: None,
            }),
            None => Err(IdentityError::Rejected("unknown assertion".to_string())),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    _media_dir: TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let media_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = Config::for_tests(media_dir.path().to_string_lossy().to_string());
    configure(&mut config);

    let db = Database::in_memory()
        .await
        .expect("Failed to create test database");
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::with_services(db, config, mailer.clone(), Arc::new(FakeIdentity));

    TestApp {
        router: lectern_server::app(state.clone()),
        state,
        mailer,
        _media_dir: media_dir,
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }

        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        self.send(req).await
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, body)
    }

    /// Signs up, verifies and signs in. Returns `(user_id, session_token)`.
    pub async fn register(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .request(
                "POST",
                "/api/auth/signup",
                None,
                Some(json!({
                    "username": email.split('@').next().unwrap(),
                    "email": email,
                    "password": "correct horse battery",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {body}");
        let user_id = body["user"]["id"].as_str().unwrap().to_string();

        let token = self.mailer.verification_token(email);
        let (status, _) = self
            .request(
                "POST",
                "/api/auth/verify-email",
                None,
                Some(json!({ "token": token })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self
            .request(
                "POST",
                "/api/auth/signin",
                None,
                Some(json!({ "email": email, "password": "correct horse battery" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "signin failed: {body}");

        (user_id, body["token"].as_str().unwrap().to_string())
    }

    pub async fn create_course(&self, token: &str, title: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/courses",
                Some(token),
                Some(json!({ "title": title })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create course failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn create_chapter(&self, token: &str, course_id: &str, title: &str) -> Value {
        let (status, body) = self
            .request(
                "POST",
                "/api/chapters",
                Some(token),
                Some(json!({ "course_id": course_id, "title": title })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create chapter failed: {body}");
        body
    }

    pub async fn publish_course(&self, token: &str, course_id: &str) {
        let (status, body) = self
            .request(
                "PATCH",
                &format!("/api/courses/{course_id}"),
                Some(token),
                Some(json!({ "is_published": true })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "publish course failed: {body}");
    }

    pub async fn publish_chapter(&self, token: &str, chapter_id: &str) {
        let (status, body) = self
            .request(
                "PATCH",
                &format!("/api/chapters/{chapter_id}"),
                Some(token),
                Some(json!({ "is_published": true })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "publish chapter failed: {body}");
    }
}
