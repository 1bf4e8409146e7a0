//! Row types and closed status enums for the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The submission lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    UnderReview,
    Flagged,
    Approved,
    Rejected,
    RewardPending,
    RewardPaid,
    Expired,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Flagged => "FLAGGED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::RewardPending => "REWARD_PENDING",
            Self::RewardPaid => "REWARD_PAID",
            Self::Expired => "EXPIRED",
        }
    }

    /// No admin-driven transition is defined out of a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Expired | Self::RewardPaid)
    }

    /// Statuses counted by the owner's `total_pending` aggregate.
    pub fn is_pending_like(self) -> bool {
        matches!(self, Self::Pending | Self::UnderReview)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of audit record appended by a moderation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationActionKind {
    View,
    StartReview,
    Approve,
    Reject,
    Flag,
    Claim,
    ConfirmReward,
    Expire,
}

/// Webhook outbox delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookStatus {
    Pending,
    Delivered,
    Retrying,
    Failed,
}

/// The webhook event vocabulary consumed by the external user application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum EventType {
    #[serde(rename = "submission.approved")]
    #[sqlx(rename = "submission.approved")]
    SubmissionApproved,
    #[serde(rename = "submission.rejected")]
    #[sqlx(rename = "submission.rejected")]
    SubmissionRejected,
    #[serde(rename = "submission.flagged")]
    #[sqlx(rename = "submission.flagged")]
    SubmissionFlagged,
    #[serde(rename = "user.suspended")]
    #[sqlx(rename = "user.suspended")]
    UserSuspended,
    #[serde(rename = "reward.pending")]
    #[sqlx(rename = "reward.pending")]
    RewardPending,
    #[serde(rename = "reward.paid")]
    #[sqlx(rename = "reward.paid")]
    RewardPaid,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmissionApproved => "submission.approved",
            Self::SubmissionRejected => "submission.rejected",
            Self::SubmissionFlagged => "submission.flagged",
            Self::UserSuspended => "user.suspended",
            Self::RewardPending => "reward.pending",
            Self::RewardPaid => "reward.paid",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dashboard account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminRole {
    SuperAdmin,
    Moderator,
    ReadOnly,
}

/// One proof submission and its review state. Rows are never deleted.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub moderator_note: Option<String>,
    pub proof_file_key: Option<String>,
    pub proof_file_type: Option<String>,
    pub user_note: Option<String>,
    pub reward_tx_hash: Option<String>,
    pub reward_paid_at: Option<DateTime<Utc>>,
    pub submission_hash: String,
}

/// Immutable audit record. One row per view or state-changing operation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ModerationAction {
    pub id: i64,
    pub submission_id: String,
    pub admin_id: String,
    pub action: ModerationActionKind,
    pub previous_status: SubmissionStatus,
    pub new_status: SubmissionStatus,
    pub reason: Option<String>,
    pub internal_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A rewards-platform user, keyed by wallet. The counters are derived state,
/// adjusted only inside the transaction of the submission change that
/// justifies them.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlatformUser {
    pub id: String,
    pub wallet_address: String,
    pub total_approved: i64,
    pub total_rejected: i64,
    pub total_pending: i64,
    pub is_suspended: bool,
    pub created_at: DateTime<Utc>,
}

/// A rewardable task that submissions reference.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub reward_amount: String,
    pub reward_token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One outbox record for a notification to the external application.
///
/// `payload` holds the exact bytes that are HMAC-signed on every delivery
/// attempt; it is stored verbatim and never re-derived.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: EventType,
    pub payload: String,
    pub target_url: String,
    pub status: WebhookStatus,
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A dashboard account.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: String,
    pub username: String,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password: String,
    pub role: AdminRole,
    pub created_at: DateTime<Utc>,
}
