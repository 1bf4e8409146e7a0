//! The webhook delivery engine.
//!
//! Moderation outcomes are written to a durable outbox (`webhook_events`)
//! and delivered at-least-once to the configured endpoint of the external
//! application. A spawned worker drains an in-process queue and posts each
//! event with a bounded timeout; failed attempts are rescheduled on a fixed
//! backoff schedule until the attempt cap, after which the event is marked
//! FAILED. In-process scheduling is best-effort only — the periodic
//! [`retry_sweep`] is the durable backstop that recovers events whose
//! scheduled retry was lost to a process restart, and PENDING events
//! that never reached the worker at all.

use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::WebhookConfig,
    metrics::{
        WEBHOOK_DELIVERED, WEBHOOK_EMITTED, WEBHOOK_FAILED, WEBHOOK_QUEUE_DEPTH, WEBHOOK_RETRIES,
    },
    models::{EventType, WebhookEvent, WebhookStatus},
};

/// Delay before the next attempt, indexed by completed attempts. Attempts
/// past the end of the schedule reuse the last entry.
const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
];

fn backoff_delay(attempts: i64) -> Duration {
    let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(0);
    BACKOFF_SCHEDULE[index.min(BACKOFF_SCHEDULE.len() - 1)]
}

/// The outcome of one delivery attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint acknowledged the event with a 2xx.
    Delivered,
    /// Nothing to do: event missing, already DELIVERED, terminally FAILED,
    /// or no endpoint configured.
    Skipped,
    /// The attempt failed and the event remains eligible for retry.
    Retrying { attempts: i64 },
    /// The attempt failed and the attempt cap is exhausted.
    Failed,
}

/// A handle used to emit events into the outbox. Cheap to clone.
#[derive(Clone)]
pub struct WebhookProducer {
    db: SqlitePool,
    config: WebhookConfig,
    tx: mpsc::Sender<String>,
}

impl WebhookProducer {
    /// Persist one event and schedule an immediate delivery attempt.
    ///
    /// The serialized envelope is stored verbatim; every later delivery
    /// attempt signs exactly these bytes. Returns the event id without
    /// waiting for any delivery outcome.
    pub async fn emit(
        &self,
        event_type: EventType,
        data: impl Serialize,
    ) -> anyhow::Result<String> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&json!({
            "eventType": event_type,
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        }))
        .context("failed to serialize webhook envelope")?;
        let target_url = self
            .config
            .endpoint
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO webhook_events (id, event_type, payload, target_url, status, attempts, created_at)
                VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&id)
        .bind(event_type)
        .bind(&payload)
        .bind(&target_url)
        .bind(WebhookStatus::Pending)
        .bind(now)
        .execute(&self.db)
        .await
        .context("failed to persist webhook event")?;

        counter!(WEBHOOK_EMITTED).increment(1);

        if !target_url.is_empty() {
            // Fire-and-forget; a full queue is recovered by the sweep.
            if self.tx.try_send(id.clone()).is_ok() {
                gauge!(WEBHOOK_QUEUE_DEPTH).increment(1.0);
            } else {
                warn!("webhook queue full, event {id} deferred to retry sweep");
            }
        }

        Ok(id)
    }
}

/// Attempt delivery of one event.
///
/// Idempotent against duplicate scheduling: an event that is missing,
/// already DELIVERED, terminally FAILED, or has no target URL is skipped.
pub async fn deliver(
    db: &SqlitePool,
    client: &reqwest::Client,
    config: &WebhookConfig,
    event_id: &str,
) -> anyhow::Result<DeliveryOutcome> {
    let event = sqlx::query_as::<_, WebhookEvent>("SELECT * FROM webhook_events WHERE id = ?")
        .bind(event_id)
        .fetch_optional(db)
        .await
        .context("failed to load webhook event")?;

    let Some(event) = event else {
        debug!("webhook event {event_id} not found, skipping");
        return Ok(DeliveryOutcome::Skipped);
    };
    if matches!(event.status, WebhookStatus::Delivered | WebhookStatus::Failed)
        || event.target_url.is_empty()
    {
        return Ok(DeliveryOutcome::Skipped);
    }

    let signature = crate::signing::sign(&config.secret, event.payload.as_bytes());
    let response = client
        .post(&event.target_url)
        .timeout(Duration::from_secs(config.timeout))
        .header("Content-Type", "application/json")
        .header("X-Webhook-Signature", signature)
        .header("X-Webhook-Event", event.event_type.as_str())
        .header("X-Webhook-Id", &event.id)
        .body(event.payload.clone())
        .send()
        .await;

    let now = Utc::now();
    let attempts = event.attempts + 1;

    let failure = match response {
        Ok(response) if response.status().is_success() => None,
        Ok(response) => {
            let status = response.status();
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(512)
                .collect();
            Some(format!("HTTP {status}: {body}"))
        }
        Err(e) => Some(format!("{e:#}")),
    };

    match failure {
        None => {
            sqlx::query(
                r#"
                UPDATE webhook_events
                    SET status = ?, attempts = ?, last_attempt_at = ?, delivered_at = ?
                    WHERE id = ?
                "#,
            )
            .bind(WebhookStatus::Delivered)
            .bind(attempts)
            .bind(now)
            .bind(now)
            .bind(&event.id)
            .execute(db)
            .await
            .context("failed to mark webhook event delivered")?;

            counter!(WEBHOOK_DELIVERED).increment(1);
            info!("delivered webhook {} ({})", event.id, event.event_type);
            Ok(DeliveryOutcome::Delivered)
        }
        Some(last_error) => {
            let exhausted = attempts >= i64::from(config.max_attempts);
            let status = if exhausted {
                WebhookStatus::Failed
            } else {
                WebhookStatus::Retrying
            };

            sqlx::query(
                r#"
                UPDATE webhook_events
                    SET status = ?, attempts = ?, last_attempt_at = ?, last_error = ?
                    WHERE id = ?
                "#,
            )
            .bind(status)
            .bind(attempts)
            .bind(now)
            .bind(&last_error)
            .bind(&event.id)
            .execute(db)
            .await
            .context("failed to record webhook delivery failure")?;

            if exhausted {
                counter!(WEBHOOK_FAILED).increment(1);
                warn!(
                    "webhook {} failed terminally after {attempts} attempts: {last_error}",
                    event.id
                );
                Ok(DeliveryOutcome::Failed)
            } else {
                debug!(
                    "webhook {} attempt {attempts} failed: {last_error}",
                    event.id
                );
                Ok(DeliveryOutcome::Retrying { attempts })
            }
        }
    }
}

/// Counts from one [`retry_sweep`] run.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
    pub swept: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Re-attempt up to 100 undelivered events below the attempt cap, oldest
/// first. Covers RETRYING events whose in-process timer was lost and
/// PENDING events that never made it into the worker queue (queue full,
/// or a restart before the first attempt).
pub async fn retry_sweep(
    db: &SqlitePool,
    client: &reqwest::Client,
    config: &WebhookConfig,
) -> anyhow::Result<SweepStats> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM webhook_events
            WHERE status IN (?, ?) AND attempts < ? AND target_url != ''
            ORDER BY created_at ASC
            LIMIT 100
        "#,
    )
    .bind(WebhookStatus::Pending)
    .bind(WebhookStatus::Retrying)
    .bind(i64::from(config.max_attempts))
    .fetch_all(db)
    .await
    .context("failed to select retryable webhook events")?;

    let mut stats = SweepStats::default();
    for id in ids {
        stats.swept += 1;
        match deliver(db, client, config, &id).await? {
            DeliveryOutcome::Delivered => stats.delivered += 1,
            DeliveryOutcome::Failed => stats.failed += 1,
            DeliveryOutcome::Skipped | DeliveryOutcome::Retrying { .. } => {}
        }
    }

    if stats.swept > 0 {
        info!(
            "webhook retry sweep: {} swept, {} delivered, {} failed",
            stats.swept, stats.delivered, stats.failed
        );
    }
    Ok(stats)
}

/// Spawn the delivery worker. Returns its join handle and the producer used
/// to emit events.
pub fn spawn(
    db: SqlitePool,
    client: reqwest::Client,
    config: WebhookConfig,
) -> (tokio::task::JoinHandle<()>, WebhookProducer) {
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let producer = WebhookProducer {
        db: db.clone(),
        config: config.clone(),
        tx: tx.clone(),
    };

    let handle = tokio::spawn(async move {
        while let Some(event_id) = rx.recv().await {
            gauge!(WEBHOOK_QUEUE_DEPTH).decrement(1.0);
            match deliver(&db, &client, &config, &event_id).await {
                Ok(DeliveryOutcome::Retrying { attempts }) => {
                    counter!(WEBHOOK_RETRIES).increment(1);
                    let delay = backoff_delay(attempts);
                    let tx = tx.clone();
                    drop(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if tx.send(event_id).await.is_ok() {
                            gauge!(WEBHOOK_QUEUE_DEPTH).increment(1.0);
                        }
                    }));
                }
                Ok(_) => {}
                Err(e) => error!("webhook delivery error for {event_id}: {e:?}"),
            }
        }
    });

    (handle, producer)
}
