//! Dashboard authentication: argon2 password hashing, bearer-token
//! sessions, and the `AdminUser` extractor.

use anyhow::{anyhow, Context as _};
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::FromRequestParts;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::{distributions::Alphanumeric, Rng as _};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    metrics::AUTH_FAILED,
    models::{Admin, AdminRole},
    AppState, Error, Result,
};

/// Sessions expire this long after login.
const SESSION_TTL_HOURS: i64 = 24;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), salt.as_salt())
        .map_err(|e| anyhow!("failed to hash password: {e}"))?
        .to_string())
}

/// Generate a random alphanumeric secret, used for session tokens and the
/// first-startup admin password.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub async fn create_admin(
    db: &SqlitePool,
    username: &str,
    password: &str,
    role: AdminRole,
) -> Result<Admin> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::bad_request(anyhow!("username must not be empty")));
    }
    if password.len() < 8 {
        return Err(Error::bad_request(anyhow!(
            "password must be at least 8 characters"
        )));
    }

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins WHERE username = ?")
        .bind(username)
        .fetch_one(db)
        .await
        .context("failed to check username")?;
    if exists > 0 {
        return Err(Error::conflict(anyhow!("username {username} is taken")));
    }

    let admin = Admin {
        id: Uuid::new_v4().to_string(),
        username: username.to_owned(),
        password: hash_password(password)?,
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
    .context("failed to create admin")?;

    Ok(admin)
}

/// Verify credentials and open a session.
pub async fn login(
    db: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<(Admin, String, DateTime<Utc>)> {
    let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE username = ?")
        .bind(username.trim())
        .fetch_optional(db)
        .await
        .context("failed to look up admin")?;

    // SEC: Verify against a dummy hash when the account is unknown so the
    // response time does not reveal which usernames exist.
    static DUMMY_HASH: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    let dummy = DUMMY_HASH.get_or_init(|| hash_password("dummy").expect("argon2 works"));
    let hash = admin.as_ref().map_or(dummy.as_str(), |a| a.password.as_str());

    let verified = Argon2::default()
        .verify_password(
            password.as_bytes(),
            &PasswordHash::new(hash).context("invalid password hash in db")?,
        )
        .is_ok();

    let Some(admin) = admin.filter(|_| verified) else {
        counter!(AUTH_FAILED).increment(1);
        return Err(Error::unauthorized(anyhow!("invalid username or password")));
    };

    let token = generate_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
    sqlx::query("INSERT INTO sessions (token, admin_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(&admin.id)
        .bind(now)
        .bind(expires_at)
        .execute(db)
        .await
        .context("failed to create session")?;

    Ok((admin, token, expires_at))
}

pub async fn logout(db: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(db)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Drop expired sessions. Called opportunistically by the maintenance loop.
pub async fn purge_expired_sessions(db: &SqlitePool) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(Utc::now())
        .execute(db)
        .await
        .context("failed to purge sessions")?;
    Ok(result.rows_affected())
}

async fn admin_for_token(db: &SqlitePool, token: &str) -> Result<Option<Admin>> {
    Ok(sqlx::query_as::<_, Admin>(
        r#"
        SELECT a.* FROM admins a
            JOIN sessions s ON s.admin_id = a.id
            WHERE s.token = ? AND s.expires_at > ?
        "#,
    )
    .bind(token)
    .bind(Utc::now())
    .fetch_optional(db)
    .await
    .context("failed to resolve session")?)
}

/// The authenticated dashboard admin, resolved from the bearer token.
pub struct AdminUser(pub Admin);

/// The bearer token itself, for routes that operate on the session.
pub struct SessionToken(pub String);

fn bearer_token(parts: &axum::http::request::Parts) -> Result<String> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::unauthorized(anyhow!("missing authorization header")))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::unauthorized(anyhow!("malformed authorization header")))?;
    Ok(token.to_owned())
}

impl FromRequestParts<AppState> for SessionToken {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &AppState,
    ) -> Result<Self> {
        Ok(Self(bearer_token(parts)?))
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self> {
        let token = bearer_token(parts)?;
        match admin_for_token(&state.db, &token).await? {
            Some(admin) => Ok(Self(admin)),
            None => {
                counter!(AUTH_FAILED).increment(1);
                Err(Error::unauthorized(anyhow!("invalid or expired session")))
            }
        }
    }
}
