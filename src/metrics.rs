//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const AUTH_FAILED: &str = "proofdesk.auth.failed"; // Counter.
pub const RATELIMIT_REJECTED: &str = "proofdesk.ratelimit.rejected"; // Counter.
pub const SIGNATURE_REJECTED: &str = "proofdesk.signature.rejected"; // Counter.

pub const SUBMISSIONS_CREATED: &str = "proofdesk.submissions.created"; // Counter.
pub const SUBMISSIONS_APPROVED: &str = "proofdesk.submissions.approved"; // Counter.
pub const SUBMISSIONS_REJECTED: &str = "proofdesk.submissions.rejected"; // Counter.
pub const SUBMISSIONS_FLAGGED: &str = "proofdesk.submissions.flagged"; // Counter.
pub const SUBMISSIONS_EXPIRED: &str = "proofdesk.submissions.expired"; // Counter.

pub const WEBHOOK_EMITTED: &str = "proofdesk.webhook.emitted"; // Counter.
pub const WEBHOOK_DELIVERED: &str = "proofdesk.webhook.delivered"; // Counter.
pub const WEBHOOK_FAILED: &str = "proofdesk.webhook.failed"; // Counter.
pub const WEBHOOK_RETRIES: &str = "proofdesk.webhook.retries"; // Counter.
pub const WEBHOOK_QUEUE_DEPTH: &str = "proofdesk.webhook.queue_depth"; // Gauge.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(AUTH_FAILED, "The number of failed authentication attempts.");
    describe_counter!(
        RATELIMIT_REJECTED,
        "The number of requests rejected by the rate limiter."
    );
    describe_counter!(
        SIGNATURE_REJECTED,
        "The number of inbound requests with a missing or invalid signature."
    );

    describe_counter!(SUBMISSIONS_CREATED, "The count of submissions created.");
    describe_counter!(SUBMISSIONS_APPROVED, "The count of submissions approved.");
    describe_counter!(SUBMISSIONS_REJECTED, "The count of submissions rejected.");
    describe_counter!(SUBMISSIONS_FLAGGED, "The count of submissions flagged.");
    describe_counter!(
        SUBMISSIONS_EXPIRED,
        "The count of submissions expired by the maintenance sweep."
    );

    describe_counter!(WEBHOOK_EMITTED, "All webhook events persisted to the outbox.");
    describe_counter!(WEBHOOK_DELIVERED, "Webhook events delivered successfully.");
    describe_counter!(
        WEBHOOK_FAILED,
        "Webhook events that exhausted their retries and were marked FAILED."
    );
    describe_counter!(WEBHOOK_RETRIES, "Webhook delivery retries scheduled.");
    describe_gauge!(
        WEBHOOK_QUEUE_DEPTH,
        "The number of delivery requests queued in-process."
    );

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
