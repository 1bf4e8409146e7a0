//! The moderation engine.
//!
//! Every status-changing operation runs as one sqlite transaction that
//! updates the submission row with a compare-and-swap on the expected
//! current status, appends exactly one audit record, and adjusts the
//! owner's aggregate counters. If any step fails nothing is persisted.
//! Webhook events are emitted after commit and never block the caller.

use anyhow::{anyhow, Context as _};
use chrono::{Duration, Utc};
use metrics::counter;
use serde_json::json;
use sha2::{Digest as _, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    metrics::{
        SUBMISSIONS_APPROVED, SUBMISSIONS_CREATED, SUBMISSIONS_EXPIRED, SUBMISSIONS_FLAGGED,
        SUBMISSIONS_REJECTED,
    },
    models::{
        Admin, AdminRole, EventType, ModerationAction, ModerationActionKind, PlatformUser,
        Submission, SubmissionStatus, Task,
    },
    webhook::WebhookProducer,
    Error, Result,
};

/// Actor id recorded on audit rows for app-initiated and scheduled
/// transitions.
pub const SYSTEM_ACTOR: &str = "system";

/// A confirmed proof upload, ready to become a PENDING submission.
pub struct CreateSubmission {
    pub wallet_address: String,
    pub task_id: String,
    pub proof_file_key: Option<String>,
    pub proof_file_type: Option<String>,
    pub user_note: Option<String>,
}

fn require_moderator(admin: &Admin) -> Result<()> {
    if admin.role == AdminRole::ReadOnly {
        return Err(Error::forbidden(anyhow!(
            "role READ_ONLY may not perform moderation actions"
        )));
    }
    Ok(())
}

fn is_valid_tx_hash(hash: &str) -> bool {
    hash.len() == 66
        && hash.starts_with("0x")
        && hash[2..].chars().all(|c| c.is_ascii_hexdigit())
}

async fn fetch_submission(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Submission> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .context("failed to load submission")?
        .ok_or_else(|| Error::not_found(anyhow!("submission {id} not found")))
}

async fn fetch_owner(conn: &mut SqliteConnection, user_id: &str) -> Result<PlatformUser> {
    Ok(
        sqlx::query_as::<_, PlatformUser>("SELECT * FROM platform_users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(conn)
            .await
            .context("failed to load submission owner")?
            .context("submission owner missing")?,
    )
}

async fn fetch_task(conn: &mut SqliteConnection, task_id: &str) -> Result<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(conn)
        .await
        .context("failed to load task")?
        .ok_or_else(|| Error::not_found(anyhow!("task {task_id} not found")))
}

/// Guard the allowed-from set of a transition.
fn check_transition(current: SubmissionStatus, allowed: &[SubmissionStatus]) -> Result<()> {
    if !allowed.contains(&current) {
        return Err(Error::invalid_transition(current));
    }
    Ok(())
}

/// CAS update of the status column alone. Returns Conflict when the row
/// moved underneath us since the read.
async fn cas_status(
    conn: &mut SqliteConnection,
    id: &str,
    from: SubmissionStatus,
    to: SubmissionStatus,
) -> Result<()> {
    let result = sqlx::query("UPDATE submissions SET status = ? WHERE id = ? AND status = ?")
        .bind(to)
        .bind(id)
        .bind(from)
        .execute(conn)
        .await
        .context("failed to update submission status")?;
    if result.rows_affected() == 0 {
        return Err(Error::conflict(anyhow!(
            "submission {id} was modified concurrently"
        )));
    }
    Ok(())
}

async fn insert_action(
    conn: &mut SqliteConnection,
    submission_id: &str,
    actor: &str,
    action: ModerationActionKind,
    previous: SubmissionStatus,
    new: SubmissionStatus,
    reason: Option<&str>,
    internal_note: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO moderation_actions
            (submission_id, admin_id, action, previous_status, new_status, reason, internal_note, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission_id)
    .bind(actor)
    .bind(action)
    .bind(previous)
    .bind(new)
    .bind(reason)
    .bind(internal_note)
    .bind(Utc::now())
    .execute(conn)
    .await
    .context("failed to append moderation action")?;
    Ok(())
}

/// Adjust the owner's aggregate counters for a `from -> to` transition.
async fn adjust_counters(
    conn: &mut SqliteConnection,
    user_id: &str,
    from: SubmissionStatus,
    to: SubmissionStatus,
) -> Result<()> {
    if from.is_pending_like() && !to.is_pending_like() {
        sqlx::query("UPDATE platform_users SET total_pending = total_pending - 1 WHERE id = ?")
            .bind(user_id)
            .execute(&mut *conn)
            .await
            .context("failed to decrement pending counter")?;
    }
    match to {
        SubmissionStatus::Approved => {
            sqlx::query("UPDATE platform_users SET total_approved = total_approved + 1 WHERE id = ?")
                .bind(user_id)
                .execute(conn)
                .await
                .context("failed to increment approved counter")?;
        }
        SubmissionStatus::Rejected => {
            sqlx::query("UPDATE platform_users SET total_rejected = total_rejected + 1 WHERE id = ?")
                .bind(user_id)
                .execute(conn)
                .await
                .context("failed to increment rejected counter")?;
        }
        _ => {}
    }
    Ok(())
}

/// Emit post-commit; delivery problems never surface to the caller.
async fn emit_event(hooks: &WebhookProducer, event_type: EventType, data: serde_json::Value) {
    if let Err(e) = hooks.emit(event_type, data).await {
        error!("failed to emit {event_type} event: {e:?}");
    }
}

/// Create a PENDING submission from a confirmed upload.
///
/// Guard order: owner lookup (get-or-create, suspended accounts rejected),
/// task existence and activity, then the duplicate check — all before any
/// insert, all inside one transaction.
pub async fn create_submission(db: &SqlitePool, req: CreateSubmission) -> Result<Submission> {
    let wallet = req.wallet_address.trim().to_lowercase();
    if wallet.is_empty() {
        return Err(Error::bad_request(anyhow!("walletAddress must not be empty")));
    }

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let user = sqlx::query_as::<_, PlatformUser>(
        "SELECT * FROM platform_users WHERE wallet_address = ?",
    )
    .bind(&wallet)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to look up user")?;

    let user = match user {
        Some(user) => user,
        None => {
            let user = PlatformUser {
                id: Uuid::new_v4().to_string(),
                wallet_address: wallet.clone(),
                total_approved: 0,
                total_rejected: 0,
                total_pending: 0,
                is_suspended: false,
                created_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO platform_users (id, wallet_address, created_at) VALUES (?, ?, ?)",
            )
            .bind(&user.id)
            .bind(&user.wallet_address)
            .bind(user.created_at)
            .execute(&mut *tx)
            .await
            .context("failed to create user")?;
            user
        }
    };

    if user.is_suspended {
        return Err(Error::forbidden(anyhow!("account is suspended")));
    }

    let task = fetch_task(&mut tx, &req.task_id).await?;
    if !task.is_active {
        return Err(Error::bad_request(anyhow!("task {} is not active", task.id)));
    }

    let duplicates: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM submissions
            WHERE user_id = ? AND task_id = ? AND status IN ('PENDING', 'UNDER_REVIEW')
        "#,
    )
    .bind(&user.id)
    .bind(&task.id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to check for duplicate submissions")?;
    if duplicates > 0 {
        return Err(Error::conflict(anyhow!(
            "a submission for this task is already awaiting review"
        )));
    }

    let now = Utc::now();
    let submission_hash = hex::encode(Sha256::digest(format!(
        "{wallet}|{}|{}",
        task.id,
        now.timestamp_millis()
    )));
    let submission = Submission {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        task_id: task.id.clone(),
        status: SubmissionStatus::Pending,
        submitted_at: now,
        reviewed_at: None,
        reviewed_by: None,
        rejection_reason: None,
        moderator_note: None,
        proof_file_key: req.proof_file_key,
        proof_file_type: req.proof_file_type,
        user_note: req.user_note,
        reward_tx_hash: None,
        reward_paid_at: None,
        submission_hash,
    };

    sqlx::query(
        r#"
        INSERT INTO submissions
            (id, user_id, task_id, status, submitted_at, proof_file_key, proof_file_type, user_note, submission_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&submission.id)
    .bind(&submission.user_id)
    .bind(&submission.task_id)
    .bind(submission.status)
    .bind(submission.submitted_at)
    .bind(&submission.proof_file_key)
    .bind(&submission.proof_file_type)
    .bind(&submission.user_note)
    .bind(&submission.submission_hash)
    .execute(&mut *tx)
    .await
    .context("failed to create submission")?;

    sqlx::query("UPDATE platform_users SET total_pending = total_pending + 1 WHERE id = ?")
        .bind(&user.id)
        .execute(&mut *tx)
        .await
        .context("failed to increment pending counter")?;

    tx.commit().await.context("failed to commit transaction")?;

    counter!(SUBMISSIONS_CREATED).increment(1);
    info!("submission {} created for task {}", submission.id, task.id);
    Ok(submission)
}

/// Load a submission with its audit history, appending the VIEW record.
pub async fn view(
    db: &SqlitePool,
    admin: &Admin,
    id: &str,
) -> Result<(Submission, Vec<ModerationAction>)> {
    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;

    // Read-creates-audit-row: viewing a detail page is itself recorded.
    insert_action(
        &mut tx,
        &submission.id,
        &admin.id,
        ModerationActionKind::View,
        submission.status,
        submission.status,
        None,
        None,
    )
    .await?;
    tx.commit().await.context("failed to commit transaction")?;

    let actions = sqlx::query_as::<_, ModerationAction>(
        "SELECT * FROM moderation_actions WHERE submission_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(id)
    .fetch_all(db)
    .await
    .context("failed to load moderation history")?;

    Ok((submission, actions))
}

/// PENDING -> UNDER_REVIEW. The only admin path into UNDER_REVIEW.
pub async fn start_review(db: &SqlitePool, admin: &Admin, id: &str) -> Result<Submission> {
    require_moderator(admin)?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;
    check_transition(submission.status, &[SubmissionStatus::Pending])?;

    cas_status(&mut tx, id, submission.status, SubmissionStatus::UnderReview).await?;
    insert_action(
        &mut tx,
        id,
        &admin.id,
        ModerationActionKind::StartReview,
        submission.status,
        SubmissionStatus::UnderReview,
        None,
        None,
    )
    .await?;
    adjust_counters(
        &mut tx,
        &submission.user_id,
        submission.status,
        SubmissionStatus::UnderReview,
    )
    .await?;
    tx.commit().await.context("failed to commit transaction")?;

    fetch_fresh(db, id).await
}

/// PENDING/UNDER_REVIEW/FLAGGED -> APPROVED.
pub async fn approve(
    db: &SqlitePool,
    hooks: &WebhookProducer,
    admin: &Admin,
    id: &str,
    internal_note: Option<String>,
    payment_ref: Option<String>,
) -> Result<Submission> {
    require_moderator(admin)?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;
    check_transition(
        submission.status,
        &[
            SubmissionStatus::Pending,
            SubmissionStatus::UnderReview,
            SubmissionStatus::Flagged,
        ],
    )?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE submissions
            SET status = ?, reviewed_by = ?, reviewed_at = ?,
                moderator_note = COALESCE(?, moderator_note)
            WHERE id = ? AND status = ?
        "#,
    )
    .bind(SubmissionStatus::Approved)
    .bind(&admin.id)
    .bind(now)
    .bind(&internal_note)
    .bind(id)
    .bind(submission.status)
    .execute(&mut *tx)
    .await
    .context("failed to approve submission")?;
    if result.rows_affected() == 0 {
        return Err(Error::conflict(anyhow!(
            "submission {id} was modified concurrently"
        )));
    }

    insert_action(
        &mut tx,
        id,
        &admin.id,
        ModerationActionKind::Approve,
        submission.status,
        SubmissionStatus::Approved,
        None,
        internal_note.as_deref(),
    )
    .await?;
    adjust_counters(
        &mut tx,
        &submission.user_id,
        submission.status,
        SubmissionStatus::Approved,
    )
    .await?;

    let user = fetch_owner(&mut tx, &submission.user_id).await?;
    let task = fetch_task(&mut tx, &submission.task_id).await?;
    tx.commit().await.context("failed to commit transaction")?;

    counter!(SUBMISSIONS_APPROVED).increment(1);
    info!("submission {id} approved by {}", admin.username);

    emit_event(
        hooks,
        EventType::SubmissionApproved,
        json!({
            "submissionId": id,
            "userId": user.id,
            "walletAddress": user.wallet_address,
            "taskId": task.id,
            "taskName": task.name,
            "status": SubmissionStatus::Approved,
            "rewardAmount": task.reward_amount,
            "rewardToken": task.reward_token,
            "paymentRef": payment_ref,
        }),
    )
    .await;

    fetch_fresh(db, id).await
}

/// PENDING/UNDER_REVIEW/FLAGGED -> REJECTED. The reason is user-visible and
/// must be non-empty after trimming.
pub async fn reject(
    db: &SqlitePool,
    hooks: &WebhookProducer,
    admin: &Admin,
    id: &str,
    reason: &str,
    internal_note: Option<String>,
) -> Result<Submission> {
    require_moderator(admin)?;

    let reason = reason.trim();
    if reason.is_empty() {
        return Err(Error::bad_request(anyhow!("a rejection reason is required"))
            .with_details(json!({ "field": "reason" })));
    }

    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;
    check_transition(
        submission.status,
        &[
            SubmissionStatus::Pending,
            SubmissionStatus::UnderReview,
            SubmissionStatus::Flagged,
        ],
    )?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE submissions
            SET status = ?, reviewed_by = ?, reviewed_at = ?, rejection_reason = ?,
                moderator_note = COALESCE(?, moderator_note)
            WHERE id = ? AND status = ?
        "#,
    )
    .bind(SubmissionStatus::Rejected)
    .bind(&admin.id)
    .bind(now)
    .bind(reason)
    .bind(&internal_note)
    .bind(id)
    .bind(submission.status)
    .execute(&mut *tx)
    .await
    .context("failed to reject submission")?;
    if result.rows_affected() == 0 {
        return Err(Error::conflict(anyhow!(
            "submission {id} was modified concurrently"
        )));
    }

    insert_action(
        &mut tx,
        id,
        &admin.id,
        ModerationActionKind::Reject,
        submission.status,
        SubmissionStatus::Rejected,
        Some(reason),
        internal_note.as_deref(),
    )
    .await?;
    adjust_counters(
        &mut tx,
        &submission.user_id,
        submission.status,
        SubmissionStatus::Rejected,
    )
    .await?;

    let user = fetch_owner(&mut tx, &submission.user_id).await?;
    let task = fetch_task(&mut tx, &submission.task_id).await?;
    tx.commit().await.context("failed to commit transaction")?;

    counter!(SUBMISSIONS_REJECTED).increment(1);
    info!("submission {id} rejected by {}", admin.username);

    emit_event(
        hooks,
        EventType::SubmissionRejected,
        json!({
            "submissionId": id,
            "userId": user.id,
            "walletAddress": user.wallet_address,
            "taskId": task.id,
            "taskName": task.name,
            "status": SubmissionStatus::Rejected,
            "reason": reason,
        }),
    )
    .await;

    fetch_fresh(db, id).await
}

/// PENDING/UNDER_REVIEW -> FLAGGED.
pub async fn flag(
    db: &SqlitePool,
    hooks: &WebhookProducer,
    admin: &Admin,
    id: &str,
    internal_note: Option<String>,
) -> Result<Submission> {
    require_moderator(admin)?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;
    check_transition(
        submission.status,
        &[SubmissionStatus::Pending, SubmissionStatus::UnderReview],
    )?;

    cas_status(&mut tx, id, submission.status, SubmissionStatus::Flagged).await?;
    insert_action(
        &mut tx,
        id,
        &admin.id,
        ModerationActionKind::Flag,
        submission.status,
        SubmissionStatus::Flagged,
        None,
        internal_note.as_deref(),
    )
    .await?;
    adjust_counters(
        &mut tx,
        &submission.user_id,
        submission.status,
        SubmissionStatus::Flagged,
    )
    .await?;

    let user = fetch_owner(&mut tx, &submission.user_id).await?;
    let task = fetch_task(&mut tx, &submission.task_id).await?;
    tx.commit().await.context("failed to commit transaction")?;

    counter!(SUBMISSIONS_FLAGGED).increment(1);

    emit_event(
        hooks,
        EventType::SubmissionFlagged,
        json!({
            "submissionId": id,
            "userId": user.id,
            "walletAddress": user.wallet_address,
            "taskId": task.id,
            "taskName": task.name,
            "status": SubmissionStatus::Flagged,
        }),
    )
    .await;

    fetch_fresh(db, id).await
}

/// APPROVED -> REWARD_PENDING, initiated by the user application on behalf
/// of the submission's owner.
pub async fn claim(
    db: &SqlitePool,
    hooks: &WebhookProducer,
    wallet_address: &str,
    id: &str,
) -> Result<Submission> {
    let wallet = wallet_address.trim().to_lowercase();

    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;
    let user = fetch_owner(&mut tx, &submission.user_id).await?;
    if user.wallet_address != wallet {
        return Err(Error::forbidden(anyhow!(
            "submission {id} belongs to a different wallet"
        )));
    }
    check_transition(submission.status, &[SubmissionStatus::Approved])?;

    cas_status(&mut tx, id, submission.status, SubmissionStatus::RewardPending).await?;
    insert_action(
        &mut tx,
        id,
        SYSTEM_ACTOR,
        ModerationActionKind::Claim,
        submission.status,
        SubmissionStatus::RewardPending,
        None,
        None,
    )
    .await?;

    let task = fetch_task(&mut tx, &submission.task_id).await?;
    tx.commit().await.context("failed to commit transaction")?;

    emit_event(
        hooks,
        EventType::RewardPending,
        json!({
            "submissionId": id,
            "walletAddress": user.wallet_address,
            "taskId": task.id,
            "rewardAmount": task.reward_amount,
            "rewardToken": task.reward_token,
        }),
    )
    .await;

    fetch_fresh(db, id).await
}

/// REWARD_PENDING -> REWARD_PAID, given a well-formed transaction hash.
pub async fn confirm_payment(
    db: &SqlitePool,
    hooks: &WebhookProducer,
    id: &str,
    tx_hash: &str,
) -> Result<Submission> {
    let tx_hash = tx_hash.trim();
    if !is_valid_tx_hash(tx_hash) {
        return Err(Error::bad_request(anyhow!(
            "txHash must be a 0x-prefixed 32-byte hex string"
        ))
        .with_details(json!({ "field": "txHash" })));
    }

    let mut tx = db.begin().await.context("failed to begin transaction")?;
    let submission = fetch_submission(&mut tx, id).await?;
    check_transition(submission.status, &[SubmissionStatus::RewardPending])?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE submissions
            SET status = ?, reward_tx_hash = ?, reward_paid_at = ?
            WHERE id = ? AND status = ?
        "#,
    )
    .bind(SubmissionStatus::RewardPaid)
    .bind(tx_hash)
    .bind(now)
    .bind(id)
    .bind(submission.status)
    .execute(&mut *tx)
    .await
    .context("failed to confirm reward payment")?;
    if result.rows_affected() == 0 {
        return Err(Error::conflict(anyhow!(
            "submission {id} was modified concurrently"
        )));
    }

    insert_action(
        &mut tx,
        id,
        SYSTEM_ACTOR,
        ModerationActionKind::ConfirmReward,
        submission.status,
        SubmissionStatus::RewardPaid,
        Some(tx_hash),
        None,
    )
    .await?;

    let user = fetch_owner(&mut tx, &submission.user_id).await?;
    tx.commit().await.context("failed to commit transaction")?;

    emit_event(
        hooks,
        EventType::RewardPaid,
        json!({
            "submissionId": id,
            "walletAddress": user.wallet_address,
            "txHash": tx_hash,
        }),
    )
    .await;

    fetch_fresh(db, id).await
}

/// Expire submissions stuck in PENDING/UNDER_REVIEW past the cutoff.
/// Returns the number of rows expired. No webhook: the event vocabulary has
/// no expiry entry, and expiry frees the (user, task) slot silently.
pub async fn expire_stale(db: &SqlitePool, expire_after_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(expire_after_days);
    let stale = sqlx::query_as::<_, Submission>(
        r#"
        SELECT * FROM submissions
            WHERE status IN ('PENDING', 'UNDER_REVIEW') AND submitted_at < ?
        "#,
    )
    .bind(cutoff)
    .fetch_all(db)
    .await
    .context("failed to select stale submissions")?;

    let mut expired = 0;
    for submission in stale {
        let mut tx = db.begin().await.context("failed to begin transaction")?;
        // CAS: an admin may have acted on the row since the select.
        let result = sqlx::query("UPDATE submissions SET status = ? WHERE id = ? AND status = ?")
            .bind(SubmissionStatus::Expired)
            .bind(&submission.id)
            .bind(submission.status)
            .execute(&mut *tx)
            .await
            .context("failed to expire submission")?;
        if result.rows_affected() == 0 {
            continue;
        }

        insert_action(
            &mut tx,
            &submission.id,
            SYSTEM_ACTOR,
            ModerationActionKind::Expire,
            submission.status,
            SubmissionStatus::Expired,
            None,
            None,
        )
        .await?;
        adjust_counters(
            &mut tx,
            &submission.user_id,
            submission.status,
            SubmissionStatus::Expired,
        )
        .await?;
        tx.commit().await.context("failed to commit transaction")?;
        expired += 1;
    }

    if expired > 0 {
        counter!(SUBMISSIONS_EXPIRED).increment(expired);
        info!("expired {expired} stale submissions");
    }
    Ok(expired)
}

/// Suspend a user and notify the external application.
pub async fn suspend_user(
    db: &SqlitePool,
    hooks: &WebhookProducer,
    admin: &Admin,
    wallet_address: &str,
) -> Result<PlatformUser> {
    require_moderator(admin)?;
    let wallet = wallet_address.trim().to_lowercase();

    let user = sqlx::query_as::<_, PlatformUser>(
        "UPDATE platform_users SET is_suspended = 1 WHERE wallet_address = ? RETURNING *",
    )
    .bind(&wallet)
    .fetch_optional(db)
    .await
    .context("failed to suspend user")?
    .ok_or_else(|| Error::not_found(anyhow!("no user with wallet {wallet}")))?;

    info!("user {} suspended by {}", user.wallet_address, admin.username);
    emit_event(
        hooks,
        EventType::UserSuspended,
        json!({
            "userId": user.id,
            "walletAddress": user.wallet_address,
        }),
    )
    .await;

    Ok(user)
}

/// Lift a suspension. No webhook: the vocabulary has no unsuspension entry.
pub async fn unsuspend_user(
    db: &SqlitePool,
    admin: &Admin,
    wallet_address: &str,
) -> Result<PlatformUser> {
    require_moderator(admin)?;
    let wallet = wallet_address.trim().to_lowercase();

    sqlx::query_as::<_, PlatformUser>(
        "UPDATE platform_users SET is_suspended = 0 WHERE wallet_address = ? RETURNING *",
    )
    .bind(&wallet)
    .fetch_optional(db)
    .await
    .context("failed to unsuspend user")?
    .ok_or_else(|| Error::not_found(anyhow!("no user with wallet {wallet}")))
}

async fn fetch_fresh(db: &SqlitePool, id: &str) -> Result<Submission> {
    Ok(
        sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = ?")
            .bind(id)
            .fetch_one(db)
            .await
            .context("failed to reload submission")?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::WebhookConfig, db::test_pool, models::WebhookStatus, webhook};

    fn test_hooks(db: &SqlitePool) -> WebhookProducer {
        let config = WebhookConfig {
            endpoint: None,
            secret: "hook-secret".to_owned(),
            timeout: 5,
            max_attempts: 3,
            sweep_interval: 60,
        };
        webhook::spawn(db.clone(), reqwest::Client::new(), config).1
    }

    async fn seed_task(db: &SqlitePool) -> Task {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            name: "Follow us on X".to_owned(),
            reward_amount: "100".to_owned(),
            reward_token: "BURST".to_owned(),
            is_active: true,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO tasks (id, name, reward_amount, reward_token, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.reward_amount)
        .bind(&task.reward_token)
        .bind(task.is_active)
        .bind(task.created_at)
        .execute(db)
        .await
        .unwrap();
        task
    }

    async fn seed_admin(db: &SqlitePool, role: AdminRole) -> Admin {
        let admin = Admin {
            id: Uuid::new_v4().to_string(),
            username: format!("admin-{}", Uuid::new_v4()),
            password: "unused".to_owned(),
            role,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO admins (id, username, password, role, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&admin.id)
        .bind(&admin.username)
        .bind(&admin.password)
        .bind(admin.role)
        .bind(admin.created_at)
        .execute(db)
        .await
        .unwrap();
        admin
    }

    async fn create(db: &SqlitePool, wallet: &str, task_id: &str) -> Result<Submission> {
        create_submission(
            db,
            CreateSubmission {
                wallet_address: wallet.to_owned(),
                task_id: task_id.to_owned(),
                proof_file_key: None,
                proof_file_type: None,
                user_note: None,
            },
        )
        .await
    }

    async fn owner(db: &SqlitePool, user_id: &str) -> PlatformUser {
        sqlx::query_as("SELECT * FROM platform_users WHERE id = ?")
            .bind(user_id)
            .fetch_one(db)
            .await
            .unwrap()
    }

    async fn actions_for(db: &SqlitePool, submission_id: &str) -> Vec<ModerationAction> {
        sqlx::query_as(
            "SELECT * FROM moderation_actions WHERE submission_id = ? ORDER BY id ASC",
        )
        .bind(submission_id)
        .fetch_all(db)
        .await
        .unwrap()
    }

    async fn set_status(db: &SqlitePool, id: &str, status: SubmissionStatus) {
        sqlx::query("UPDATE submissions SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_starts_pending_and_counts() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;

        let submission = create(&db, "0xWallet1", &task.id).await.unwrap();
        assert_eq!(submission.status, SubmissionStatus::Pending);
        assert_eq!(submission.submission_hash.len(), 64);

        let user = owner(&db, &submission.user_id).await;
        assert_eq!(user.wallet_address, "0xwallet1");
        assert_eq!(user.total_pending, 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_pending_submission_conflicts() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;

        create(&db, "0xwallet1", &task.id).await.unwrap();
        let err = create(&db, "0xwallet1", &task.id).await.unwrap_err();
        assert_eq!(err.code(), "conflict");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&db)
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_submission_frees_the_slot() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let first = create(&db, "0xwallet1", &task.id).await.unwrap();
        reject(&db, &hooks, &admin, &first.id, "blurry photo", None)
            .await
            .unwrap();

        assert!(create(&db, "0xwallet1", &task.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn suspended_user_cannot_create() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        sqlx::query("UPDATE platform_users SET is_suspended = 1 WHERE id = ?")
            .bind(&submission.user_id)
            .execute(&db)
            .await?;

        let err = create(&db, "0xwallet1", &seed_task(&db).await.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_inactive_task_is_rejected() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let err = create(&db, "0xwallet1", "nope").await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        let task = seed_task(&db).await;
        sqlx::query("UPDATE tasks SET is_active = 0 WHERE id = ?")
            .bind(&task.id)
            .execute(&db)
            .await?;
        let err = create(&db, "0xwallet1", &task.id).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");
        Ok(())
    }

    #[tokio::test]
    async fn approve_transitions_audits_and_emits() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        let approved = approve(
            &db,
            &hooks,
            &admin,
            &submission.id,
            Some("looks good".to_owned()),
            Some("abc".to_owned()),
        )
        .await
        .unwrap();

        assert_eq!(approved.status, SubmissionStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some(admin.id.as_str()));
        assert!(approved.reviewed_at.is_some());
        assert_eq!(approved.moderator_note.as_deref(), Some("looks good"));

        let actions = actions_for(&db, &submission.id).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ModerationActionKind::Approve);
        assert_eq!(actions[0].previous_status, SubmissionStatus::Pending);
        assert_eq!(actions[0].new_status, SubmissionStatus::Approved);

        let user = owner(&db, &submission.user_id).await;
        assert_eq!(user.total_pending, 0);
        assert_eq!(user.total_approved, 1);

        let events: Vec<crate::models::WebhookEvent> =
            sqlx::query_as("SELECT * FROM webhook_events")
                .fetch_all(&db)
                .await?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SubmissionApproved);
        assert_eq!(events[0].status, WebhookStatus::Pending);
        let envelope: serde_json::Value = serde_json::from_str(&events[0].payload)?;
        assert_eq!(envelope["data"]["paymentRef"], "abc");
        assert_eq!(envelope["data"]["rewardAmount"], "100");
        Ok(())
    }

    #[tokio::test]
    async fn reject_requires_a_reason() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        let err = reject(&db, &hooks, &admin, &submission.id, "   ", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");

        // Nothing persisted: no status change, no audit row.
        let fresh = fetch_fresh(&db, &submission.id).await.unwrap();
        assert_eq!(fresh.status, SubmissionStatus::Pending);
        assert!(actions_for(&db, &submission.id).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn transitions_from_settled_states_fail() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        for status in [
            SubmissionStatus::Approved,
            SubmissionStatus::Rejected,
            SubmissionStatus::RewardPending,
            SubmissionStatus::RewardPaid,
            SubmissionStatus::Expired,
        ] {
            set_status(&db, &submission.id, status).await;

            let err = approve(&db, &hooks, &admin, &submission.id, None, None)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_transition", "approve from {status}");
            let err = reject(&db, &hooks, &admin, &submission.id, "reason", None)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_transition", "reject from {status}");
            let err = flag(&db, &hooks, &admin, &submission.id, None)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_transition", "flag from {status}");

            // State unchanged by the failed attempts.
            assert_eq!(fetch_fresh(&db, &submission.id).await.unwrap().status, status);
        }
        Ok(())
    }

    #[tokio::test]
    async fn flag_is_only_reachable_from_pending_and_review() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        set_status(&db, &submission.id, SubmissionStatus::Flagged).await;
        let err = flag(&db, &hooks, &admin, &submission.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        Ok(())
    }

    #[tokio::test]
    async fn read_only_role_is_forbidden() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let viewer = seed_admin(&db, AdminRole::ReadOnly).await;
        let hooks = test_hooks(&db);

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        for err in [
            approve(&db, &hooks, &viewer, &submission.id, None, None)
                .await
                .unwrap_err(),
            reject(&db, &hooks, &viewer, &submission.id, "r", None)
                .await
                .unwrap_err(),
            flag(&db, &hooks, &viewer, &submission.id, None)
                .await
                .unwrap_err(),
            start_review(&db, &viewer, &submission.id).await.unwrap_err(),
            suspend_user(&db, &hooks, &viewer, "0xwallet1")
                .await
                .unwrap_err(),
        ] {
            assert_eq!(err.code(), "forbidden");
        }
        Ok(())
    }

    #[tokio::test]
    async fn view_appends_noop_audit_row() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let viewer = seed_admin(&db, AdminRole::ReadOnly).await;

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        let (_detail, history) = view(&db, &viewer, &submission.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, ModerationActionKind::View);
        assert_eq!(history[0].previous_status, history[0].new_status);

        // Counters untouched by viewing.
        let user = owner(&db, &submission.user_id).await;
        assert_eq!(user.total_pending, 1);
        Ok(())
    }

    #[tokio::test]
    async fn start_review_is_the_only_path_into_under_review() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        let reviewed = start_review(&db, &admin, &submission.id).await.unwrap();
        assert_eq!(reviewed.status, SubmissionStatus::UnderReview);

        // total_pending covers UNDER_REVIEW too.
        assert_eq!(owner(&db, &submission.user_id).await.total_pending, 1);

        let err = start_review(&db, &admin, &submission.id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        Ok(())
    }

    #[tokio::test]
    async fn claim_and_confirm_complete_the_reward_flow() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let submission = create(&db, "0xwallet1", &task.id).await.unwrap();
        approve(&db, &hooks, &admin, &submission.id, None, None)
            .await
            .unwrap();

        // Claiming with a different wallet must fail.
        let err = claim(&db, &hooks, "0xother", &submission.id).await.unwrap_err();
        assert_eq!(err.code(), "forbidden");

        let claimed = claim(&db, &hooks, "0xWALLET1", &submission.id).await.unwrap();
        assert_eq!(claimed.status, SubmissionStatus::RewardPending);

        let err = confirm_payment(&db, &hooks, &submission.id, "nothex")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");

        let tx_hash = format!("0x{}", "ab".repeat(32));
        let paid = confirm_payment(&db, &hooks, &submission.id, &tx_hash)
            .await
            .unwrap();
        assert_eq!(paid.status, SubmissionStatus::RewardPaid);
        assert_eq!(paid.reward_tx_hash.as_deref(), Some(tx_hash.as_str()));
        assert!(paid.reward_paid_at.is_some());

        let kinds: Vec<ModerationActionKind> = actions_for(&db, &submission.id)
            .await
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ModerationActionKind::Approve,
                ModerationActionKind::Claim,
                ModerationActionKind::ConfirmReward,
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn counters_match_submission_statuses() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        let mut ids = Vec::new();
        for _ in 0..4 {
            let task = seed_task(&db).await;
            ids.push(create(&db, "0xwallet1", &task.id).await.unwrap().id);
        }
        approve(&db, &hooks, &admin, &ids[0], None, None).await.unwrap();
        reject(&db, &hooks, &admin, &ids[1], "no", None).await.unwrap();
        flag(&db, &hooks, &admin, &ids[2], None).await.unwrap();
        start_review(&db, &admin, &ids[3]).await.unwrap();

        let user: PlatformUser =
            sqlx::query_as("SELECT * FROM platform_users WHERE wallet_address = '0xwallet1'")
                .fetch_one(&db)
                .await?;
        let pending_like: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM submissions WHERE user_id = ? AND status IN ('PENDING', 'UNDER_REVIEW')",
        )
        .bind(&user.id)
        .fetch_one(&db)
        .await?;

        assert_eq!(user.total_pending, pending_like);
        assert_eq!(user.total_pending, 1);
        assert_eq!(user.total_approved, 1);
        assert_eq!(user.total_rejected, 1);
        Ok(())
    }

    #[tokio::test]
    async fn expire_stale_only_touches_old_rows() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let old_task = seed_task(&db).await;
        let fresh_task = seed_task(&db).await;

        let old = create(&db, "0xwallet1", &old_task.id).await.unwrap();
        let fresh = create(&db, "0xwallet1", &fresh_task.id).await.unwrap();

        sqlx::query("UPDATE submissions SET submitted_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::days(30))
            .bind(&old.id)
            .execute(&db)
            .await?;

        let expired = expire_stale(&db, 14).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(
            fetch_fresh(&db, &old.id).await.unwrap().status,
            SubmissionStatus::Expired
        );
        assert_eq!(
            fetch_fresh(&db, &fresh.id).await.unwrap().status,
            SubmissionStatus::Pending
        );

        let user = owner(&db, &old.user_id).await;
        assert_eq!(user.total_pending, 1);

        let actions = actions_for(&db, &old.id).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].admin_id, SYSTEM_ACTOR);
        assert_eq!(actions[0].action, ModerationActionKind::Expire);

        // The slot is free for a resubmission.
        assert!(create(&db, "0xwallet1", &old_task.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn suspension_emits_event_and_unsuspend_restores() -> anyhow::Result<()> {
        let db = test_pool().await?;
        let task = seed_task(&db).await;
        let admin = seed_admin(&db, AdminRole::Moderator).await;
        let hooks = test_hooks(&db);

        create(&db, "0xwallet1", &task.id).await.unwrap();
        let user = suspend_user(&db, &hooks, &admin, "0xwallet1").await.unwrap();
        assert!(user.is_suspended);

        let events: Vec<crate::models::WebhookEvent> = sqlx::query_as(
            "SELECT * FROM webhook_events WHERE event_type = 'user.suspended'",
        )
        .fetch_all(&db)
        .await?;
        assert_eq!(events.len(), 1);

        let user = unsuspend_user(&db, &admin, "0xwallet1").await.unwrap();
        assert!(!user.is_suspended);

        let err = suspend_user(&db, &hooks, &admin, "0xunknown").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
        Ok(())
    }

    #[test]
    fn tx_hash_validation() {
        assert!(is_valid_tx_hash(&format!("0x{}", "ab".repeat(32))));
        assert!(!is_valid_tx_hash("abc"));
        assert!(!is_valid_tx_hash(&format!("0x{}", "zz".repeat(32))));
        assert!(!is_valid_tx_hash(&format!("0x{}", "ab".repeat(31))));
    }
}
