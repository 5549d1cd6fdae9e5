// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Gemini API client for slip extraction and match predictions.
//!
//! Handles:
//! - Match extraction from an inline image (structured JSON output)
//! - Predictions for enriched matches
//! - Lenient parsing of model text (code fences, empty answers)

use crate::error::AppError;
use crate::models::{Match, MatchPrediction};
use crate::services::analysis::{MatchExtractor, Predictor, SlipImage};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const EXTRACTION_PROMPT: &str = "Analyze this image of a football fixture list or betting slip. \
Extract the two teams playing in every match. Return a JSON array of strings where each \
string is 'Team A vs Team B', for example [\"Real Madrid vs Barcelona\", \"Liverpool vs \
Manchester City\"]. Return an empty array if no matches are found.";

const PREDICTION_PROMPT: &str = "You are an expert football analyst. Below is JSON data for \
several football matches. For each match, analyze the statistics (form, goals, head-to-head) \
and give a likely outcome. The prediction must be a short label such as 'Home Win', 'Draw', \
'Away Win', 'Over 2.5 Goals' or 'Both Teams To Score'. The reasoning must be a short expert \
summary of one or two sentences. Return a JSON array with exactly one object per input match, \
in the same order, each with the fields \"prediction\" and \"reasoning\".\n\nMatch data:\n";

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    extraction_model: String,
    prediction_model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        extraction_model: String,
        prediction_model: String,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            extraction_model,
            prediction_model,
        })
    }

    /// Point the client at a different API host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Call `generateContent` and return the concatenated text of the first
    /// candidate.
    async fn generate(&self, model: &str, request: &GenerateContentRequest) -> Result<String, AppError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                tracing::warn!(model, "Gemini rate limit hit (429)");
            }

            return Err(AppError::Upstream(format!("Gemini HTTP {status}: {body}")));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(format!("Gemini JSON parse error: {e}")))?;

        Ok(body.text())
    }
}

#[async_trait]
impl MatchExtractor for GeminiClient {
    async fn extract_matches(&self, image: &SlipImage) -> Result<Vec<String>, AppError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image.data);

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: encoded,
                        },
                    },
                    Part::Text {
                        text: EXTRACTION_PROMPT.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: json!({
                    "type": "ARRAY",
                    "items": {
                        "type": "STRING",
                        "description": "One match between two teams, e.g. 'Team A vs Team B'"
                    }
                }),
            },
        };

        let text = self.generate(&self.extraction_model, &request).await?;
        parse_match_names(&text)
    }
}

#[async_trait]
impl Predictor for GeminiClient {
    async fn predict(&self, matches: &[Match]) -> Result<Vec<MatchPrediction>, AppError> {
        let data = serde_json::to_string_pretty(matches)
            .map_err(|e| AppError::Internal(e.into()))?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text {
                    text: format!("{PREDICTION_PROMPT}{data}"),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: json!({
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "prediction": {"type": "STRING"},
                            "reasoning": {"type": "STRING"}
                        },
                        "required": ["prediction", "reasoning"]
                    }
                }),
            },
        };

        let text = self.generate(&self.prediction_model, &request).await?;
        parse_predictions(&text, matches)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData },
    Text { text: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct PredictionFields {
    prediction: String,
    reasoning: String,
}

/// Remove markdown code fences the model sometimes wraps JSON in.
fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parse the extraction answer. An empty answer, or JSON that is not a list
/// of strings, means nothing was detected.
pub fn parse_match_names(text: &str) -> Result<Vec<String>, AppError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_json::Value = serde_json::from_str(&cleaned).map_err(|e| {
        tracing::warn!(raw = %text, error = %e, "Unparseable extraction response");
        AppError::Parse(format!("extraction response is not JSON: {e}"))
    })?;

    let names = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect::<Option<Vec<String>>>(),
        _ => None,
    };

    Ok(names
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Parse the prediction answer and attach each entry to its input match.
pub fn parse_predictions(text: &str, matches: &[Match]) -> Result<Vec<MatchPrediction>, AppError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(AppError::Parse("empty prediction response".to_string()));
    }

    let fields: Vec<PredictionFields> = serde_json::from_str(&cleaned).map_err(|e| {
        tracing::warn!(raw = %text, error = %e, "Unparseable prediction response");
        AppError::Parse(format!("prediction response has unexpected shape: {e}"))
    })?;

    if fields.len() != matches.len() {
        tracing::warn!(
            raw = %text,
            expected = matches.len(),
            received = fields.len(),
            "Prediction count mismatch"
        );
        return Err(AppError::Parse(format!(
            "expected {} predictions, got {}",
            matches.len(),
            fields.len()
        )));
    }

    Ok(matches
        .iter()
        .zip(fields)
        .map(|(fixture, f)| MatchPrediction {
            fixture: fixture.clone(),
            prediction: f.prediction,
            reasoning: f.reasoning,
        })
        .collect())
}
