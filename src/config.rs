use std::{net::SocketAddr, path::PathBuf};

use serde::Deserialize;
use url::Url;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    /// The address to listen on. Defaults to `127.0.0.1:8000`.
    pub listen_address: Option<SocketAddr>,
    /// The sqlite connection string, e.g. `sqlite://data/proofdesk.db`.
    pub db: String,
    /// Proof file storage.
    pub proofs: ProofConfig,
    /// Outbound webhook delivery.
    pub webhook: WebhookConfig,
    /// Inbound signed-request verification.
    pub inbound: InboundConfig,
    /// Submission-creation throttling.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Review housekeeping.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Optional metrics exporter.
    pub metrics: Option<MetricConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProofConfig {
    /// Root directory for stored proof files.
    pub path: PathBuf,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_proof_limit")]
    pub limit: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WebhookConfig {
    /// Delivery endpoint of the external application. When unset, events are
    /// still persisted but never dispatched.
    pub endpoint: Option<Url>,
    /// Shared secret used to sign event payloads.
    pub secret: String,
    /// Per-request timeout for delivery attempts, in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub timeout: u64,
    /// Attempts after which an event is marked FAILED.
    #[serde(default = "default_webhook_attempts")]
    pub max_attempts: u32,
    /// Interval of the durable retry sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct InboundConfig {
    /// Shared secret the external application signs request bodies with.
    pub secret: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per key per window.
    pub quota: usize,
    /// Rolling window length in seconds.
    pub window: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { quota: 5, window: 60 }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReviewConfig {
    /// Submissions still PENDING/UNDER_REVIEW after this many days are
    /// expired by the maintenance sweep.
    pub expire_after_days: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { expire_after_days: 14 }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum MetricConfig {
    PrometheusPush(PrometheusPushConfig),
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusPushConfig {
    /// The push gateway URL.
    pub url: String,
}

fn default_proof_limit() -> usize {
    10 * 1024 * 1024
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_webhook_attempts() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    60
}
