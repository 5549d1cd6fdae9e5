// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firebase ID token verification for end-user requests.
//!
//! Production tokens are RS256 JWTs signed by the `securetoken` service
//! account. Signing keys are fetched from its JWK endpoint and kept for the
//! lifetime the endpoint advertises in `Cache-Control`.

use crate::config::Config;
use anyhow::Context;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::{HeaderMap, CACHE_CONTROL};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

const SECURETOKEN_JWK_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_KEY_LIFETIME: Duration = Duration::from_secs(300);
const LEEWAY_SECS: u64 = 60;
/// Firebase user ids are at most 128 characters.
const MAX_UID_LEN: usize = 128;

/// Identity extracted from a valid ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Stable user id (`sub` claim)
    pub user_id: String,
    pub email: Option<String>,
}

/// ID token verification error categories.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdTokenError {
    /// The token is malformed, signed by an unknown key, or has bad claims.
    #[error("rejected ID token: {0}")]
    Forbidden(String),
    /// Key material could not be fetched; the request may be retried.
    #[error("ID token verification unavailable: {0}")]
    Transient(String),
}

fn forbidden(reason: impl Into<String>) -> IdTokenError {
    IdTokenError::Forbidden(reason.into())
}

enum KeySource {
    Remote(SigningKeyCache),
    Fixed {
        kid: String,
        algorithm: Algorithm,
        key: Arc<DecodingKey>,
    },
}

/// Verifier for identity-provider ID tokens.
pub struct IdTokenVerifier {
    audience: String,
    issuer: String,
    keys: KeySource,
}

impl IdTokenVerifier {
    /// Production verifier backed by the `securetoken` JWK endpoint.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(KEY_FETCH_TIMEOUT)
            .build()
            .context("failed building signing key HTTP client")?;

        let verifier = Self::with_source(
            config,
            KeySource::Remote(SigningKeyCache::new(http, SECURETOKEN_JWK_URL)),
        );

        tracing::info!(
            audience = %verifier.audience,
            issuer = %verifier.issuer,
            "Initialized ID token verifier"
        );
        Ok(verifier)
    }

    /// Verifier that trusts exactly one key id.
    ///
    /// Used by local runs and integration tests.
    pub fn new_with_static_key(
        config: &Config,
        kid: impl Into<String>,
        algorithm: Algorithm,
        decoding_key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static verifier kid must not be empty");
        }

        Ok(Self::with_source(
            config,
            KeySource::Fixed {
                kid,
                algorithm,
                key: Arc::new(decoding_key),
            },
        ))
    }

    fn with_source(config: &Config, keys: KeySource) -> Self {
        Self {
            audience: config.firebase_project_id.clone(),
            issuer: format!("{ISSUER_PREFIX}{}", config.firebase_project_id),
            keys,
        }
    }

    fn algorithm(&self) -> Algorithm {
        match &self.keys {
            KeySource::Remote(_) => Algorithm::RS256,
            KeySource::Fixed { algorithm, .. } => *algorithm,
        }
    }

    async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>, IdTokenError> {
        match &self.keys {
            KeySource::Remote(cache) => cache.get(kid).await,
            KeySource::Fixed { kid: trusted, key, .. } if trusted == kid => Ok(key.clone()),
            KeySource::Fixed { .. } => Err(forbidden(format!("untrusted key id {kid}"))),
        }
    }

    /// Verify a raw ID token and return the identity it carries.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdTokenError> {
        if token.is_empty() {
            return Err(forbidden("token is empty"));
        }

        let header =
            decode_header(token).map_err(|e| forbidden(format!("invalid JWT header: {e}")))?;

        let algorithm = self.algorithm();
        if header.alg != algorithm {
            return Err(forbidden(format!("unexpected JWT alg: {:?}", header.alg)));
        }
        let kid = header.kid.ok_or_else(|| forbidden("missing JWT kid"))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = LEEWAY_SECS;

        let claims = decode::<FirebaseClaims>(token, &key, &validation)
            .map_err(|e| forbidden(format!("JWT validation failed: {e}")))?
            .claims;

        claims.check_times(unix_now())?;

        let user_id = claims.sub.trim();
        if user_id.is_empty() || user_id.len() > MAX_UID_LEN {
            return Err(forbidden("sub claim must be 1-128 characters"));
        }

        tracing::debug!(user_id, "ID token verified");

        Ok(VerifiedIdentity {
            user_id: user_id.to_string(),
            email: claims.email,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    iat: Option<u64>,
    auth_time: Option<u64>,
    email: Option<String>,
}

impl FirebaseClaims {
    /// `iat` is required; both it and `auth_time` must not lie in the future.
    fn check_times(&self, now: u64) -> Result<(), IdTokenError> {
        let iat = self.iat.ok_or_else(|| forbidden("missing iat claim"))?;
        let latest = now + LEEWAY_SECS;
        if iat > latest {
            return Err(forbidden("iat claim is in the future"));
        }
        if self.auth_time.is_some_and(|t| t > latest) {
            return Err(forbidden("auth_time claim is in the future"));
        }
        Ok(())
    }
}

/// Signing keys by key id, refreshed from a JWK endpoint.
struct SigningKeyCache {
    http: reqwest::Client,
    url: &'static str,
    current: RwLock<KeySet>,
    fetching: Mutex<()>,
}

#[derive(Default)]
struct KeySet {
    by_kid: HashMap<String, Arc<DecodingKey>>,
    valid_until: Option<Instant>,
}

impl KeySet {
    fn is_fresh(&self) -> bool {
        self.valid_until.is_some_and(|t| t > Instant::now())
    }

    fn key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        if !self.is_fresh() {
            return None;
        }
        self.by_kid.get(kid).cloned()
    }
}

impl SigningKeyCache {
    fn new(http: reqwest::Client, url: &'static str) -> Self {
        Self {
            http,
            url,
            current: RwLock::new(KeySet::default()),
            fetching: Mutex::new(()),
        }
    }

    async fn get(&self, kid: &str) -> Result<Arc<DecodingKey>, IdTokenError> {
        if let Some(key) = self.current.read().await.key(kid) {
            return Ok(key);
        }

        // An unknown kid on a fresh set may mean the keys rotated early.
        let _fetching = self.fetching.lock().await;
        {
            let current = self.current.read().await;
            if let Some(key) = current.key(kid) {
                return Ok(key);
            }
        }

        let fetched = self.fetch().await?;
        let key = fetched.key(kid);
        *self.current.write().await = fetched;

        key.ok_or_else(|| forbidden(format!("unknown key id {kid}")))
    }

    async fn fetch(&self) -> Result<KeySet, IdTokenError> {
        tracing::debug!(url = self.url, "Fetching ID token signing keys");

        let response = self
            .http
            .get(self.url)
            .send()
            .await
            .map_err(|e| IdTokenError::Transient(format!("signing key request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdTokenError::Transient(format!(
                "signing key endpoint returned {status}"
            )));
        }

        let lifetime = max_age(response.headers()).unwrap_or(FALLBACK_KEY_LIFETIME);
        let document: JwkDocument = response
            .json()
            .await
            .map_err(|e| IdTokenError::Transient(format!("invalid JWK document: {e}")))?;

        let by_kid = document.rsa_signing_keys();
        if by_kid.is_empty() {
            return Err(IdTokenError::Transient(
                "JWK document has no RS256 signing keys".to_string(),
            ));
        }

        tracing::debug!(
            keys = by_kid.len(),
            lifetime_secs = lifetime.as_secs(),
            "ID token signing keys refreshed"
        );

        Ok(KeySet {
            by_kid,
            valid_until: Some(Instant::now() + lifetime),
        })
    }
}

#[derive(Debug, Deserialize)]
struct JwkDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    #[serde(rename = "use")]
    usage: Option<String>,
    n: String,
    e: String,
}

impl Jwk {
    fn is_rs256_signing_key(&self) -> bool {
        self.kty == "RSA"
            && !self.kid.trim().is_empty()
            && self.alg.as_deref().map_or(true, |a| a == "RS256")
            && self.usage.as_deref().map_or(true, |u| u == "sig")
    }
}

impl JwkDocument {
    fn rsa_signing_keys(self) -> HashMap<String, Arc<DecodingKey>> {
        self.keys
            .into_iter()
            .filter(Jwk::is_rs256_signing_key)
            .filter_map(|jwk| match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => Some((jwk.kid, Arc::new(key))),
                Err(e) => {
                    tracing::warn!(error = %e, kid = %jwk.kid, "Skipping malformed signing key");
                    None
                }
            })
            .collect()
    }
}

/// `max-age` from a `Cache-Control` header.
fn max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;
    value.split(',').find_map(|directive| {
        let (name, secs) = directive.trim().split_once('=')?;
        if !name.eq_ignore_ascii_case("max-age") {
            return None;
        }
        secs.trim_matches('"').parse().ok().map(Duration::from_secs)
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
