//! The dashboard surface under `/api/admin`. All routes except login
//! require a bearer session token.

use anyhow::{anyhow, Context as _};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::{Row as _, SqlitePool};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::{
    auth::{self, AdminUser, SessionToken},
    blob::ProofStore,
    config::AppConfig,
    models::{Admin, AdminRole, PlatformUser, Submission, SubmissionStatus, Task, WebhookEvent, WebhookStatus},
    moderation, webhook,
    webhook::WebhookProducer,
    AppState, Error, Result,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(session))
        .route("/submissions", get(list_submissions))
        .route("/submissions/{id}", get(submission_detail))
        .route("/submissions/{id}/approve", post(approve))
        .route("/submissions/{id}/reject", post(reject))
        .route("/submissions/{id}/flag", post(flag))
        .route("/submissions/{id}/review", post(start_review))
        .route("/proofs/{*key}", get(serve_proof).delete(delete_proof))
        .route("/users", get(list_users))
        .route("/users/{wallet}/suspend", post(suspend_user))
        .route("/users/{wallet}/unsuspend", post(unsuspend_user))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}/deactivate", post(deactivate_task))
        .route("/stats", get(stats))
        .route("/webhooks", get(list_webhooks))
        .route("/webhooks/retry", post(retry_webhooks))
        .route("/admins", post(create_admin))
}

fn require_moderator(admin: &Admin) -> Result<()> {
    if admin.role == AdminRole::ReadOnly {
        return Err(Error::forbidden(anyhow!(
            "role READ_ONLY may not perform this action"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(db): State<SqlitePool>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>> {
    let (admin, token, expires_at) = auth::login(&db, &input.username, &input.password).await?;
    Ok(super::ok(json!({
        "token": token,
        "expiresAt": expires_at,
        "admin": admin,
    })))
}

async fn logout(
    State(db): State<SqlitePool>,
    SessionToken(token): SessionToken,
) -> Result<Json<serde_json::Value>> {
    auth::logout(&db, &token).await?;
    Ok(super::ok(json!({})))
}

async fn session(AdminUser(admin): AdminUser) -> Result<Json<serde_json::Value>> {
    Ok(super::ok(admin))
}

#[derive(Deserialize)]
struct PageQuery {
    status: Option<SubmissionStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn page(query: &PageQuery) -> (i64, i64) {
    (
        query.limit.unwrap_or(50).clamp(1, 100),
        query.offset.unwrap_or(0).max(0),
    )
}

async fn list_submissions(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>> {
    let (limit, offset) = page(&query);
    let submissions: Vec<Submission> = match query.status {
        Some(status) => {
            sqlx::query_as(
                "SELECT * FROM submissions WHERE status = ? ORDER BY submitted_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&db)
            .await
        }
        None => {
            sqlx::query_as("SELECT * FROM submissions ORDER BY submitted_at DESC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(&db)
                .await
        }
    }
    .context("failed to list submissions")?;

    Ok(super::ok(json!({
        "submissions": submissions,
        "limit": limit,
        "offset": offset,
    })))
}

async fn submission_detail(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let (submission, history) = moderation::view(&db, &admin, &id).await?;
    Ok(super::ok(json!({
        "submission": submission,
        "history": history,
    })))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    internal_note: Option<String>,
    payment_ref: Option<String>,
}

async fn approve(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    State(hooks): State<WebhookProducer>,
    Path(id): Path<String>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<serde_json::Value>> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let submission =
        moderation::approve(&db, &hooks, &admin, &id, input.internal_note, input.payment_ref)
            .await?;
    Ok(super::ok(submission))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    reason: String,
    internal_note: Option<String>,
}

async fn reject(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    State(hooks): State<WebhookProducer>,
    Path(id): Path<String>,
    Json(input): Json<RejectRequest>,
) -> Result<Json<serde_json::Value>> {
    let submission =
        moderation::reject(&db, &hooks, &admin, &id, &input.reason, input.internal_note).await?;
    Ok(super::ok(submission))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagRequest {
    internal_note: Option<String>,
}

async fn flag(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    State(hooks): State<WebhookProducer>,
    Path(id): Path<String>,
    body: Option<Json<FlagRequest>>,
) -> Result<Json<serde_json::Value>> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let submission = moderation::flag(&db, &hooks, &admin, &id, input.internal_note).await?;
    Ok(super::ok(submission))
}

async fn start_review(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let submission = moderation::start_review(&db, &admin, &id).await?;
    Ok(super::ok(submission))
}

async fn serve_proof(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
    State(proofs): State<ProofStore>,
    Path(key): Path<String>,
) -> Result<Response> {
    let stat = proofs
        .stat(&key)
        .await?
        .ok_or_else(|| Error::not_found(anyhow!("no proof file {key}")))?;
    let file = proofs
        .open(&key)
        .await?
        .ok_or_else(|| Error::not_found(anyhow!("no proof file {key}")))?;

    // Content type travels on the submission row, not the store.
    let content_type: Option<String> = sqlx::query_scalar(
        "SELECT proof_file_type FROM submissions WHERE proof_file_key = ? LIMIT 1",
    )
    .bind(&key)
    .fetch_optional(&db)
    .await
    .context("failed to look up proof content type")?
    .flatten();

    let mut response = Response::builder()
        .header(
            header::CONTENT_TYPE,
            content_type.as_deref().unwrap_or("application/octet-stream"),
        )
        .header(header::CONTENT_LENGTH, stat.size);
    if let Some(modified) = stat.modified {
        response = response.header(
            header::LAST_MODIFIED,
            modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }
    let response = response
        .body(Body::from_stream(ReaderStream::new(file)))
        .context("failed to build proof response")?;
    Ok(response)
}

async fn delete_proof(
    AdminUser(admin): AdminUser,
    State(proofs): State<ProofStore>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>> {
    require_moderator(&admin)?;
    if proofs.stat(&key).await?.is_none() {
        return Err(Error::not_found(anyhow!("no proof file {key}")));
    }
    proofs.delete(&key).await?;
    Ok(super::ok(json!({})))
}

async fn list_users(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>> {
    let (limit, offset) = page(&query);
    let users: Vec<PlatformUser> =
        sqlx::query_as("SELECT * FROM platform_users ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&db)
            .await
            .context("failed to list users")?;
    Ok(super::ok(json!({ "users": users, "limit": limit, "offset": offset })))
}

async fn suspend_user(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    State(hooks): State<WebhookProducer>,
    Path(wallet): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let user = moderation::suspend_user(&db, &hooks, &admin, &wallet).await?;
    Ok(super::ok(user))
}

async fn unsuspend_user(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    Path(wallet): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let user = moderation::unsuspend_user(&db, &admin, &wallet).await?;
    Ok(super::ok(user))
}

async fn list_tasks(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
) -> Result<Json<serde_json::Value>> {
    let tasks: Vec<Task> = sqlx::query_as("SELECT * FROM tasks ORDER BY created_at DESC")
        .fetch_all(&db)
        .await
        .context("failed to list tasks")?;
    Ok(super::ok(json!({ "tasks": tasks })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    name: String,
    reward_amount: String,
    reward_token: String,
}

async fn create_task(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    Json(input): Json<CreateTaskRequest>,
) -> Result<Json<serde_json::Value>> {
    require_moderator(&admin)?;

    let name = input.name.trim();
    if name.is_empty() {
        return Err(Error::bad_request(anyhow!("task name must not be empty"))
            .with_details(json!({ "field": "name" })));
    }
    let amount: f64 = input
        .reward_amount
        .trim()
        .parse()
        .map_err(|_| {
            Error::bad_request(anyhow!("rewardAmount must be a decimal number"))
                .with_details(json!({ "field": "rewardAmount" }))
        })?;
    if amount <= 0.0 {
        return Err(Error::bad_request(anyhow!("rewardAmount must be positive"))
            .with_details(json!({ "field": "rewardAmount" })));
    }
    if input.reward_token.trim().is_empty() {
        return Err(Error::bad_request(anyhow!("rewardToken must not be empty"))
            .with_details(json!({ "field": "rewardToken" })));
    }

    let task = Task {
        id: Uuid::new_v4().to_string(),
        name: name.to_owned(),
        reward_amount: input.reward_amount.trim().to_owned(),
        reward_token: input.reward_token.trim().to_owned(),
        is_active: true,
        created_at: Utc::now(),
    };
    sqlx::query(
        "INSERT INTO tasks (id, name, reward_amount, reward_token, is_active, created_at) VALUES (?, ?, ?, ?, 1, ?)",
    )
    .bind(&task.id)
    .bind(&task.name)
    .bind(&task.reward_amount)
    .bind(&task.reward_token)
    .bind(task.created_at)
    .execute(&db)
    .await
    .context("failed to create task")?;

    Ok(super::ok(task))
}

async fn deactivate_task(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    require_moderator(&admin)?;

    let task: Option<Task> = sqlx::query_as("UPDATE tasks SET is_active = 0 WHERE id = ? RETURNING *")
        .bind(&id)
        .fetch_optional(&db)
        .await
        .context("failed to deactivate task")?;
    let task = task.ok_or_else(|| Error::not_found(anyhow!("task {id} not found")))?;
    Ok(super::ok(task))
}

async fn count_by(
    db: &SqlitePool,
    sql: &str,
) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let rows = sqlx::query(sql).fetch_all(db).await?;
    let mut counts = serde_json::Map::new();
    for row in rows {
        counts.insert(row.get::<String, _>(0), json!(row.get::<i64, _>(1)));
    }
    Ok(counts)
}

async fn stats(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
) -> Result<Json<serde_json::Value>> {
    let submissions = count_by(&db, "SELECT status, COUNT(*) FROM submissions GROUP BY status")
        .await
        .context("failed to count submissions")?;
    // This is the only place FAILED deliveries surface.
    let webhooks = count_by(&db, "SELECT status, COUNT(*) FROM webhook_events GROUP BY status")
        .await
        .context("failed to count webhook events")?;

    let row = sqlx::query(
        r#"
        SELECT COUNT(*), COALESCE(SUM(is_suspended), 0),
               COALESCE(SUM(total_approved), 0), COALESCE(SUM(total_rejected), 0),
               COALESCE(SUM(total_pending), 0)
            FROM platform_users
        "#,
    )
    .fetch_one(&db)
    .await
    .context("failed to count users")?;

    Ok(super::ok(json!({
        "submissions": submissions,
        "webhooks": webhooks,
        "users": {
            "total": row.get::<i64, _>(0),
            "suspended": row.get::<i64, _>(1),
            "totalApproved": row.get::<i64, _>(2),
            "totalRejected": row.get::<i64, _>(3),
            "totalPending": row.get::<i64, _>(4),
        },
    })))
}

#[derive(Deserialize)]
struct WebhookQuery {
    status: Option<WebhookStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_webhooks(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
    Query(query): Query<WebhookQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    let events: Vec<WebhookEvent> = match query.status {
        Some(status) => {
            sqlx::query_as(
                "SELECT * FROM webhook_events WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(&db)
            .await
        }
        None => {
            sqlx::query_as("SELECT * FROM webhook_events ORDER BY created_at DESC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(&db)
                .await
        }
    }
    .context("failed to list webhook events")?;

    Ok(super::ok(json!({ "events": events, "limit": limit, "offset": offset })))
}

async fn retry_webhooks(
    AdminUser(_admin): AdminUser,
    State(db): State<SqlitePool>,
    State(client): State<reqwest::Client>,
    State(config): State<AppConfig>,
) -> Result<Json<serde_json::Value>> {
    let stats = webhook::retry_sweep(&db, &client, &config.webhook).await?;
    Ok(super::ok(stats))
}

#[derive(Deserialize)]
struct CreateAdminRequest {
    username: String,
    password: String,
    role: AdminRole,
}

async fn create_admin(
    AdminUser(admin): AdminUser,
    State(db): State<SqlitePool>,
    Json(input): Json<CreateAdminRequest>,
) -> Result<Json<serde_json::Value>> {
    if admin.role != AdminRole::SuperAdmin {
        return Err(Error::forbidden(anyhow!(
            "only SUPER_ADMIN may create admin accounts"
        )));
    }
    let created = auth::create_admin(&db, &input.username, &input.password, input.role).await?;
    Ok(super::ok(created))
}
