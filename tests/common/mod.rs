// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use betslip_analyzer::config::Config;
use betslip_analyzer::db::{
    BalanceStore, CreateAccountOutcome, CreditOutcome, FirestoreDb, MemoryDb,
};
use betslip_analyzer::error::AppError;
use betslip_analyzer::models::{AccountRecord, LastPurchase, Match, MatchPrediction};
use betslip_analyzer::routes::create_router;
use betslip_analyzer::services::gateway::{
    sign_body, verify_signature, CallbackAuthError, CallbackPayload, PaymentRedirect,
    PaymentRequest, SIGNATURE_HEADER,
};
use betslip_analyzer::services::{
    AnalysisService, IdTokenVerifier, MatchExtractor, MockFootballApi, PaymentGateway, Predictor,
    SlipImage, StatsProvider,
};
use betslip_analyzer::AppState;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

pub const TEST_KID: &str = "test-kid";
pub const TEST_ID_TOKEN_SECRET: &[u8] = b"test_id_token_secret";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Unique user id for test isolation (no '-').
#[allow(dead_code)]
pub fn unique_user_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}{nanos}")
}

/// Collaborator call counters.
#[derive(Default)]
pub struct CallCounts {
    pub extract: AtomicUsize,
    pub stats: AtomicUsize,
    pub predict: AtomicUsize,
}

#[allow(dead_code)]
impl CallCounts {
    pub fn total(&self) -> usize {
        self.extract.load(Ordering::SeqCst)
            + self.stats.load(Ordering::SeqCst)
            + self.predict.load(Ordering::SeqCst)
    }
}

/// Pipeline returning fixed match names and a "Home Win" for each match.
pub struct ScriptedPipeline {
    names: Vec<String>,
    calls: Arc<CallCounts>,
    stats: MockFootballApi,
}

#[async_trait]
impl MatchExtractor for ScriptedPipeline {
    async fn extract_matches(&self, _image: &SlipImage) -> Result<Vec<String>, AppError> {
        self.calls.extract.fetch_add(1, Ordering::SeqCst);
        Ok(self.names.clone())
    }
}

#[async_trait]
impl StatsProvider for ScriptedPipeline {
    async fn find_matches(&self, names: &[String]) -> Result<Vec<Match>, AppError> {
        self.calls.stats.fetch_add(1, Ordering::SeqCst);
        self.stats.find_matches(names).await
    }
}

#[async_trait]
impl Predictor for ScriptedPipeline {
    async fn predict(&self, matches: &[Match]) -> Result<Vec<MatchPrediction>, AppError> {
        self.calls.predict.fetch_add(1, Ordering::SeqCst);
        Ok(matches
            .iter()
            .map(|m| MatchPrediction {
                fixture: m.clone(),
                prediction: "Home Win".to_string(),
                reasoning: "Stronger recent form at home.".to_string(),
            })
            .collect())
    }
}

/// Gateway that verifies real signatures but never leaves the process.
pub struct FakeGateway {
    secret: Vec<u8>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentRedirect, AppError> {
        Ok(PaymentRedirect::Html {
            html: format!("<form action=\"checkout\">{}</form>", request.order_id),
            order_id: request.order_id.clone(),
        })
    }

    fn verify_and_parse_callback(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<CallbackPayload, CallbackAuthError> {
        verify_signature(&self.secret, signature, body)?;
        Ok(CallbackPayload::from_form(body))
    }
}

/// Store operation that a [`FaultyStore`] fails.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// `create_account` hits a backend outage
    CreateUnavailable,
    /// `create_account` rejects the input
    CreateRejected,
    /// `transactional_decrement` hits a backend outage
    DecrementUnavailable,
}

/// Memory store with one operation failing.
#[allow(dead_code)]
pub struct FaultyStore {
    inner: Arc<MemoryDb>,
    fault: StoreFault,
}

#[async_trait]
impl BalanceStore for FaultyStore {
    async fn read(&self, user_id: &str) -> Result<i64, AppError> {
        self.inner.read(user_id).await
    }

    async fn get_account(&self, user_id: &str) -> Result<Option<AccountRecord>, AppError> {
        self.inner.get_account(user_id).await
    }

    async fn create_account(
        &self,
        user_id: &str,
        email: Option<&str>,
        credits: i64,
    ) -> Result<CreateAccountOutcome, AppError> {
        match self.fault {
            StoreFault::CreateUnavailable => {
                Err(AppError::Internal(anyhow::anyhow!("backend unavailable")))
            }
            StoreFault::CreateRejected => Err(AppError::BadRequest("email too long".to_string())),
            StoreFault::DecrementUnavailable => {
                self.inner.create_account(user_id, email, credits).await
            }
        }
    }

    async fn transactional_decrement(&self, user_id: &str) -> Result<i64, AppError> {
        if self.fault == StoreFault::DecrementUnavailable {
            return Err(AppError::Database("deadline exceeded".to_string()));
        }
        self.inner.transactional_decrement(user_id).await
    }

    async fn increment(&self, user_id: &str, amount: i64) -> Result<i64, AppError> {
        self.inner.increment(user_id, amount).await
    }

    async fn credit_order(
        &self,
        user_id: &str,
        purchase: LastPurchase,
    ) -> Result<CreditOutcome, AppError> {
        self.inner.credit_order(user_id, purchase).await
    }

    async fn set(&self, user_id: &str, value: i64) -> Result<(), AppError> {
        self.inner.set(user_id, value).await
    }

    fn watch(&self, user_id: &str) -> watch::Receiver<Option<i64>> {
        self.inner.watch(user_id)
    }
}

/// Everything a router-level test needs.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryDb>,
    pub calls: Arc<CallCounts>,
}

/// Create a test app backed by the in-memory store.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default(), &["Liverpool vs Arsenal"])
}

/// Create a test app with a custom config and scripted match names.
pub fn create_test_app_with(config: Config, names: &[&str]) -> TestApp {
    let store = Arc::new(MemoryDb::new());
    build_test_app(config, names, store.clone(), store)
}

/// Create a test app whose store fails one operation. `TestApp::store`
/// still reaches the underlying memory store.
#[allow(dead_code)]
pub fn create_test_app_with_fault(fault: StoreFault) -> TestApp {
    let store = Arc::new(MemoryDb::new());
    let faulty = Arc::new(FaultyStore {
        inner: store.clone(),
        fault,
    });
    build_test_app(
        Config::test_default(),
        &["Liverpool vs Arsenal"],
        store,
        faulty,
    )
}

fn build_test_app(
    config: Config,
    names: &[&str],
    store: Arc<MemoryDb>,
    backend: Arc<dyn BalanceStore>,
) -> TestApp {
    let calls = Arc::new(CallCounts::default());

    let verifier = Arc::new(
        IdTokenVerifier::new_with_static_key(
            &config,
            TEST_KID,
            Algorithm::HS256,
            DecodingKey::from_secret(TEST_ID_TOKEN_SECRET),
        )
        .expect("static verifier"),
    );

    let pipeline = Arc::new(ScriptedPipeline {
        names: names.iter().map(|s| s.to_string()).collect(),
        calls: calls.clone(),
        stats: MockFootballApi::default(),
    });
    let analysis = AnalysisService::new(
        pipeline.clone(),
        pipeline.clone(),
        pipeline,
        Duration::from_secs(5),
    );

    let gateway = Arc::new(FakeGateway {
        secret: config.payment_callback_secret.clone(),
    });

    let state = Arc::new(AppState::new(
        config,
        backend,
        verifier,
        analysis,
        gateway,
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        calls,
    }
}

/// Create a test ID token for the static verifier.
#[allow(dead_code)]
pub fn id_token(user_id: &str) -> String {
    id_token_for_project(user_id, "test-project")
}

#[allow(dead_code)]
pub fn id_token_for_project(user_id: &str, project: &str) -> String {
    #[derive(Serialize)]
    struct Claims {
        sub: String,
        iss: String,
        aud: String,
        exp: usize,
        iat: usize,
        email: String,
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        iss: format!("https://securetoken.google.com/{project}"),
        aud: project.to_string(),
        exp: now + 3600,
        iat: now,
        email: format!("{user_id}@example.com"),
    };

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(TEST_KID.to_string());

    encode(&header, &claims, &EncodingKey::from_secret(TEST_ID_TOKEN_SECRET)).unwrap()
}

/// Build an authenticated request with an optional JSON body.
#[allow(dead_code)]
pub fn authed_request(
    method: &str,
    uri: &str,
    user_id: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", id_token(user_id)));

    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Build a gateway callback request signed with the test secret.
#[allow(dead_code)]
pub fn signed_callback(body: &str) -> Request<Body> {
    let signature = sign_body(&Config::test_default().payment_callback_secret, body.as_bytes())
        .unwrap();
    callback_with_signature(body, Some(&signature))
}

#[allow(dead_code)]
pub fn callback_with_signature(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/payments/callback")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as text.
#[allow(dead_code)]
pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
