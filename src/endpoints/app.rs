//! The signed integration surface under `/api/app`.
//!
//! Every request from the external application carries an `X-Signature`
//! header: hex HMAC-SHA256 over the exact raw body bytes with the shared
//! inbound secret. Verification runs before any parsing or business logic.

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequest, Path, Request, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    blob::ProofStore,
    metrics::SIGNATURE_REJECTED,
    moderation,
    ratelimit::RateLimiter,
    signing,
    webhook::WebhookProducer,
    AppState, Error, Result,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/proofs", post(upload_proof))
        .route("/submissions", post(create_submission))
        .route("/submissions/{id}/claim", post(claim_reward))
        .route("/submissions/{id}/confirm", post(confirm_payment))
}

/// The raw body of a request whose `X-Signature` header verified.
pub struct SignedBytes(pub Bytes);

impl FromRequest<AppState> for SignedBytes {
    type Rejection = Error;

    async fn from_request(req: Request, state: &AppState) -> Result<Self> {
        let (parts, body) = req.into_parts();
        let signature = parts
            .headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = axum::body::to_bytes(body, state.config.proofs.limit)
            .await
            .map_err(|e| Error::bad_request(anyhow!("failed to read request body: {e}")))?;

        let Some(signature) = signature else {
            counter!(SIGNATURE_REJECTED).increment(1);
            return Err(Error::unauthorized(anyhow!("missing X-Signature header")));
        };
        if !signing::verify(&state.config.inbound.secret, &bytes, &signature) {
            counter!(SIGNATURE_REJECTED).increment(1);
            return Err(Error::unauthorized(anyhow!("invalid request signature")));
        }

        Ok(Self(bytes))
    }
}

/// A typed request body parsed from verified bytes.
pub struct SignedJson<T>(pub T);

impl<T: DeserializeOwned> FromRequest<AppState> for SignedJson<T> {
    type Rejection = Error;

    async fn from_request(req: Request, state: &AppState) -> Result<Self> {
        let SignedBytes(bytes) = SignedBytes::from_request(req, state).await?;
        let value = serde_json::from_slice(&bytes).map_err(|e| {
            Error::bad_request(anyhow!("invalid request body"))
                .with_details(json!({ "parse": e.to_string() }))
        })?;
        Ok(Self(value))
    }
}

/// Throttle by wallet when the request carries one, else by peer address.
fn throttle(limiter: &RateLimiter, wallet: Option<&str>, peer: SocketAddr) -> Result<()> {
    let key = match wallet {
        Some(wallet) if !wallet.trim().is_empty() => wallet.trim().to_lowercase(),
        _ => format!("ip:{}", peer.ip()),
    };
    limiter.check(&key).map_err(Error::too_many_requests)
}

async fn upload_proof(
    State(limiter): State<Arc<RateLimiter>>,
    State(proofs): State<ProofStore>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    SignedBytes(bytes): SignedBytes,
) -> Result<Json<serde_json::Value>> {
    let wallet = headers
        .get("x-wallet-address")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|w| !w.is_empty());
    throttle(&limiter, wallet, peer)?;

    let wallet = wallet
        .ok_or_else(|| Error::bad_request(anyhow!("missing X-Wallet-Address header")))?;
    if bytes.is_empty() {
        return Err(Error::bad_request(anyhow!("empty proof upload")));
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let key = ProofStore::generate_key(wallet, content_type);
    let size = proofs.put(&key, &bytes).await?;

    Ok(super::ok(json!({ "key": key, "size": size })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubmissionRequest {
    wallet_address: String,
    task_id: String,
    proof_file_key: Option<String>,
    proof_file_type: Option<String>,
    user_note: Option<String>,
}

async fn create_submission(
    State(db): State<SqlitePool>,
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    SignedJson(input): SignedJson<CreateSubmissionRequest>,
) -> Result<Json<serde_json::Value>> {
    throttle(&limiter, Some(&input.wallet_address), peer)?;

    let submission = moderation::create_submission(
        &db,
        moderation::CreateSubmission {
            wallet_address: input.wallet_address,
            task_id: input.task_id,
            proof_file_key: input.proof_file_key,
            proof_file_type: input.proof_file_type,
            user_note: input.user_note,
        },
    )
    .await?;

    Ok(super::ok(submission))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimRequest {
    wallet_address: String,
}

async fn claim_reward(
    State(db): State<SqlitePool>,
    State(hooks): State<WebhookProducer>,
    Path(id): Path<String>,
    SignedJson(input): SignedJson<ClaimRequest>,
) -> Result<Json<serde_json::Value>> {
    let submission = moderation::claim(&db, &hooks, &input.wallet_address, &id).await?;
    Ok(super::ok(submission))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    tx_hash: String,
}

async fn confirm_payment(
    State(db): State<SqlitePool>,
    State(hooks): State<WebhookProducer>,
    Path(id): Path<String>,
    SignedJson(input): SignedJson<ConfirmRequest>,
) -> Result<Json<serde_json::Value>> {
    let submission = moderation::confirm_payment(&db, &hooks, &id, &input.tx_hash).await?;
    Ok(super::ok(submission))
}
