//! QR pairing endpoints.
//!
//! Three verbs mirror the three actors in a pairing:
//! - `generate`: the new device mints a code to render as a QR
//! - `scan`: the logged-in device approves the code (bearer auth)
//! - `login`: the new device polls until the credential arrives
//!
//! `login` answers every terminal state with HTTP 200 and a `status`
//! field, so a prober cannot distinguish outcomes by status code.

use crate::error::RelayError;
use crate::pairing::ApproveOutcome;
use crate::server::{PairingPoll, ParleyRelay};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use parley_types::UserProfile;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    code: String,
    expires_at: u64,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    code: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LoginResponse {
    Pending,
    Confirmed { credential: String, user: UserProfile },
    Expired,
    Invalid,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScanResponse {
    Success,
    Expired,
    Invalid,
}

/// POST /api/qr/generate
pub async fn generate(Extension(relay): Extension<Arc<ParleyRelay>>) -> Response {
    match relay.generate_pairing() {
        Ok(pairing) => Json(GenerateResponse {
            code: pairing.code,
            expires_at: pairing.expires_at,
        })
        .into_response(),
        Err(RelayError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Err(err) => internal_error(err),
    }
}

/// POST /api/qr/login
pub async fn login(
    Extension(relay): Extension<Arc<ParleyRelay>>,
    Json(request): Json<CodeRequest>,
) -> Response {
    match relay.poll_pairing(&request.code).await {
        Ok(PairingPoll::Pending) => Json(LoginResponse::Pending).into_response(),
        Ok(PairingPoll::Confirmed { token, user }) => Json(LoginResponse::Confirmed {
            credential: token,
            user,
        })
        .into_response(),
        Ok(PairingPoll::Expired) => Json(LoginResponse::Expired).into_response(),
        Ok(PairingPoll::Invalid) => Json(LoginResponse::Invalid).into_response(),
        Err(err) => internal_error(err),
    }
}

/// POST /api/qr/scan
pub async fn scan(
    Extension(relay): Extension<Arc<ParleyRelay>>,
    headers: HeaderMap,
    Json(request): Json<CodeRequest>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user = match relay.authenticate(token).await {
        Ok(user) => user,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    match relay.approve_pairing(&request.code, user.id).await {
        Ok(ApproveOutcome::Approved) => Json(ScanResponse::Success).into_response(),
        Ok(ApproveOutcome::Expired) => Json(ScanResponse::Expired).into_response(),
        Ok(ApproveOutcome::Invalid) => Json(ScanResponse::Invalid).into_response(),
        Err(err) => internal_error(err),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn internal_error(err: RelayError) -> Response {
    warn!(error = %err, "pairing endpoint failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
