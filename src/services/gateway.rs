// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Payment gateway adapter.
//!
//! The gateway is reached in two directions: `initiate` builds a checkout
//! for an order, and the gateway later posts a signed, form-encoded callback
//! that `verify_and_parse_callback` authenticates.
//!
//! Callbacks are accepted with either signature:
//! - [`SIGNATURE_HEADER`], a hex HMAC-SHA256 of the raw body keyed with the
//!   callback secret, added by a signing proxy in front of this service
//! - Shopier's own `signature` form field, a base64 HMAC-SHA256 of
//!   `random_nr` followed by `platform_order_id`, keyed with the API secret
//!
//! When the header is present it is the only signature checked.

use crate::error::AppError;
use crate::models::Package;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SHOPIER_PAY_URL: &str = "https://www.shopier.com/ShowProduct/api_pay4.php";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Header carrying the hex HMAC-SHA256 of the raw callback body.
///
/// Shopier never sends it; a signing proxy that has already checked the
/// gateway's body signature does.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Everything the gateway needs to build a checkout.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: String,
    pub package: &'static Package,
    pub buyer_name: String,
    pub buyer_email: Option<String>,
    pub callback_url: String,
    pub back_url: String,
}

/// Where to send the buyer next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRedirect {
    Url(String),
    /// Self-submitting checkout form to render in the browser
    Html { html: String, order_id: String },
}

/// Fields this system reads from a callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    pub status: Option<String>,
    /// `platform_order_id`, falling back to `random_nr`
    pub order_id: Option<String>,
    pub buyer_id: Option<String>,
    pub buyer_email: Option<String>,
}

impl CallbackPayload {
    /// Parse a form-encoded callback body.
    pub fn from_form(body: &[u8]) -> Self {
        let mut payload = Self::default();
        let mut random_nr = None;

        for (key, value) in url::form_urlencoded::parse(body) {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "status" => payload.status = Some(value),
                "platform_order_id" => payload.order_id = Some(value),
                "random_nr" => random_nr = Some(value),
                "buyer_id" => payload.buyer_id = Some(value),
                "buyer_email" => payload.buyer_email = Some(value),
                _ => {}
            }
        }

        if payload.order_id.is_none() {
            payload.order_id = random_nr;
        }
        payload
    }

    /// Whether the gateway reports a completed payment.
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_deref(), Some("1") | Some("success"))
    }
}

/// Callback authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackAuthError {
    #[error("missing callback signature")]
    MissingSignature,

    #[error("empty callback body")]
    EmptyBody,

    #[error("callback signature mismatch")]
    InvalidSignature,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a checkout for the order.
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentRedirect, AppError>;

    /// Authenticate a raw callback and extract its fields.
    fn verify_and_parse_callback(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<CallbackPayload, CallbackAuthError>;
}

/// Hex HMAC-SHA256 of `body`.
pub fn sign_body(secret: &[u8], body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature in constant time.
pub fn verify_signature(
    secret: &[u8],
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), CallbackAuthError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CallbackAuthError::MissingSignature)?;

    if body.is_empty() {
        return Err(CallbackAuthError::EmptyBody);
    }

    let expected = hex::decode(signature).map_err(|_| CallbackAuthError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| CallbackAuthError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| CallbackAuthError::InvalidSignature)
}

/// Check Shopier's in-body signature in constant time.
pub fn verify_shopier_signature(
    api_secret: &[u8],
    body: &[u8],
) -> Result<(), CallbackAuthError> {
    if body.is_empty() {
        return Err(CallbackAuthError::MissingSignature);
    }

    let mut signature = None;
    let mut random_nr = String::new();
    let mut order_id = String::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        match key.as_ref() {
            "signature" => signature = Some(value.trim().to_string()),
            "random_nr" => random_nr = value.into_owned(),
            "platform_order_id" => order_id = value.into_owned(),
            _ => {}
        }
    }

    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or(CallbackAuthError::MissingSignature)?;
    let expected = STANDARD
        .decode(signature)
        .map_err(|_| CallbackAuthError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(api_secret).map_err(|_| CallbackAuthError::InvalidSignature)?;
    mac.update(random_nr.as_bytes());
    mac.update(order_id.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| CallbackAuthError::InvalidSignature)
}

/// Shopier checkout adapter.
pub struct ShopierGateway {
    http: reqwest::Client,
    pay_url: String,
    api_key: String,
    api_secret: String,
    callback_secret: Vec<u8>,
}

impl ShopierGateway {
    pub fn new(
        api_key: String,
        api_secret: String,
        callback_secret: Vec<u8>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            pay_url: SHOPIER_PAY_URL.to_string(),
            api_key,
            api_secret,
            callback_secret,
        })
    }

    /// Override the checkout endpoint (tests, sandbox).
    pub fn with_pay_url(mut self, pay_url: impl Into<String>) -> Self {
        self.pay_url = pay_url.into();
        self
    }

    fn checkout_form(&self, request: &PaymentRequest) -> Vec<(&'static str, String)> {
        let package = request.package;
        vec![
            ("API_key", self.api_key.clone()),
            ("API_secret", self.api_secret.clone()),
            ("random_nr", request.order_id.clone()),
            ("platform_order_id", request.order_id.clone()),
            ("buyer_name", request.buyer_name.clone()),
            (
                "buyer_email",
                request.buyer_email.clone().unwrap_or_default(),
            ),
            ("buyer_phone", "5555555555".to_string()),
            ("buyer_account_age", "0".to_string()),
            ("billing_address", "Türkiye".to_string()),
            ("billing_city", "Istanbul".to_string()),
            ("billing_postcode", "34000".to_string()),
            ("billing_country", "Turkey".to_string()),
            ("product_name", package.name.to_string()),
            ("product_type", "1".to_string()),
            ("website_index", "1".to_string()),
            ("total_order_value", package.price.to_string()),
            ("currency", "TL".to_string()),
            ("current_language", "tr".to_string()),
            ("modul_version", "API_v1".to_string()),
            ("callback_url", request.callback_url.clone()),
            ("back_url", request.back_url.clone()),
        ]
    }
}

#[async_trait]
impl PaymentGateway for ShopierGateway {
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentRedirect, AppError> {
        tracing::info!(
            order_id = %request.order_id,
            package_id = request.package.id,
            "Requesting gateway checkout"
        );

        let response = self
            .http
            .post(&self.pay_url)
            .form(&self.checkout_form(request))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Gateway request failed: {e}")))?;

        let status = response.status();
        let html = response
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("Gateway response unreadable: {e}")))?;

        if !status.is_success() || !html.contains("form") {
            return Err(AppError::Upstream(format!(
                "Gateway did not return a checkout form (HTTP {status})"
            )));
        }

        Ok(PaymentRedirect::Html {
            html,
            order_id: request.order_id.clone(),
        })
    }

    fn verify_and_parse_callback(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<CallbackPayload, CallbackAuthError> {
        match signature.map(str::trim).filter(|s| !s.is_empty()) {
            Some(_) => verify_signature(&self.callback_secret, signature, body)?,
            None => verify_shopier_signature(self.api_secret.as_bytes(), body)?,
        }
        Ok(CallbackPayload::from_form(body))
    }
}
