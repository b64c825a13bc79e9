use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde_json::Value;
use std::sync::Arc;
use storefront_api::{
    app_router,
    config::AppConfig,
    events::{process_events, EventSender},
    migrator::Migrator,
    services::LogNotifier,
    stripe::StripeClient,
    AppServices, AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Full application wired against an in-memory database and a mock payments
/// platform. Requests are driven through the router directly, no sockets.
pub struct TestApp {
    pub router: Router,
    pub stripe: MockServer,
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let stripe = MockServer::start().await;

        let db = Arc::new(
            Database::connect("sqlite::memory:")
                .await
                .expect("sqlite in-memory connect"),
        );
        Migrator::up(db.as_ref(), None).await.expect("migrations");

        let mut config = AppConfig::new("sqlite::memory:", "127.0.0.1", 0, "test", "sk_test");
        config.stripe_api_base = stripe.uri();
        config.stripe_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        config.public_url = Some("https://shop.test".to_string());
        customize(&mut config);
        let config = Arc::new(config);

        let client = Arc::new(
            StripeClient::new(
                config.stripe_api_base.clone(),
                config.stripe_secret_key.clone(),
                std::time::Duration::from_secs(5),
            )
            .expect("stripe client"),
        );

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(process_events(event_rx));
        let event_sender = Arc::new(EventSender::new(event_tx));

        let services = AppServices::build(
            db.clone(),
            config.clone(),
            event_sender.clone(),
            client.clone(),
            client,
            Arc::new(LogNotifier),
        );

        let state = AppState {
            db: db.clone(),
            config: config.clone(),
            event_sender,
            services,
        };

        Self {
            router: app_router(state),
            stripe,
            db,
            config,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router must be infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let json = serde_json::from_slice(&bytes).ok();
        TestResponse {
            status,
            headers,
            json,
        }
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> TestResponse {
        self.request(build_request("GET", path, cookie, None)).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        cookie: Option<&str>,
        body: Value,
    ) -> TestResponse {
        self.request(build_request("POST", path, cookie, Some(body)))
            .await
    }

    pub async fn put_json(&self, path: &str, cookie: Option<&str>, body: Value) -> TestResponse {
        self.request(build_request("PUT", path, cookie, Some(body)))
            .await
    }

    pub async fn delete(&self, path: &str, cookie: Option<&str>) -> TestResponse {
        self.request(build_request("DELETE", path, cookie, None))
            .await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub json: Option<Value>,
}

impl TestResponse {
    pub fn json(&self) -> &Value {
        self.json.as_ref().expect("response body is not JSON")
    }

    /// Session id from the Set-Cookie header, when one was issued.
    pub fn session_cookie(&self, cookie_name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|cookie| {
                let (name, rest) = cookie.split_once('=')?;
                (name == cookie_name)
                    .then(|| rest.split(';').next().unwrap_or(rest).to_string())
            })
    }
}

fn build_request(
    method: &str,
    path: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(session_id) = cookie {
        builder = builder.header(header::COOKIE, format!("cart_session={}", session_id));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

/// Signed webhook delivery, the way the platform would send it.
pub fn signed_webhook_request(path: &str, payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = storefront_api::stripe::webhook::sign_payload(
        &timestamp,
        body.as_bytes(),
        WEBHOOK_SECRET,
    );
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            storefront_api::stripe::webhook::SIGNATURE_HEADER,
            format!("t={},v1={}", timestamp, signature),
        )
        .body(Body::from(body))
        .expect("request")
}
