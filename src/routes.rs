use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::USER_AGENT, HeaderMap},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ReadParams {
    code: Option<String>,
    degree: Option<String>,
    diag: Option<String>,
}

/// `GET /votes?code=X[&degree=D]`, plus `?diag=1` for a config sanity check.
pub async fn read_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReadParams>,
) -> Result<Json<Value>, AppError> {
    if params.diag.as_deref() == Some("1") {
        return Ok(Json(json!({
            "cooldown_s": state.config.cooldown_s,
            "max_write_attempts": state.config.max_write_attempts,
            "store": state.store_kind,
        })));
    }

    let code = params.code.as_deref().unwrap_or("");
    let summary = state
        .service
        .read_aggregate(code, params.degree.as_deref())
        .await?;

    Ok(Json(json!({ "avg": summary.avg, "count": summary.count })))
}

#[derive(Deserialize)]
pub struct VotePayload {
    code: Option<String>,
    degree: Option<String>,
    // `score` with `vote` kept as an alias for older clients; raw JSON so a
    // fractional or non-numeric value can be rejected as InvalidScore rather
    // than bounced by the deserializer.
    score: Option<Value>,
    vote: Option<Value>,
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

/// `POST /votes`. With a score this records a vote; without one it behaves
/// as a read, which older clients rely on.
pub async fn vote_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<VotePayload>,
) -> Result<Json<Value>, AppError> {
    let code = payload.code.as_deref().unwrap_or("");
    let degree = payload.degree.as_deref();

    let raw = payload
        .score
        .or(payload.vote)
        .filter(|value| !value.is_null());
    let Some(raw) = raw else {
        let summary = state.service.read_aggregate(code, degree).await?;
        return Ok(Json(json!({ "avg": summary.avg, "count": summary.count })));
    };

    // integers only; 50.5 and "80" are both invalid
    let score = raw.as_i64().ok_or(AppError::InvalidScore)?;
    let fingerprint = fingerprint(payload.client_id.as_deref(), &headers);

    let summary = state
        .service
        .submit_vote(code, score, &fingerprint, degree)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "avg": summary.avg,
        "count": summary.count,
        "cooldown_s": state.config.cooldown_s,
    })))
}

/// Opaque voter fingerprint. Prefers the client-supplied id; falls back to
/// hashing request-origin metadata. Stable per browser, not a verified
/// identity.
fn fingerprint(client_id: Option<&str>, headers: &HeaderMap) -> String {
    let mut hasher = Sha256::new();
    match client_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => hasher.update(id.as_bytes()),
        None => {
            let origin = header_str(headers, "x-forwarded-for");
            let agent = headers
                .get(USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("unknown");
            hasher.update(origin.as_bytes());
            hasher.update(b"|");
            hasher.update(agent.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
}
