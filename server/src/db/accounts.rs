//! Database operations for accounts, sessions and custom tokens.

use beaver_sync::wire::AuthUser;
use sqlx::{PgPool, Row};

/// A stored account row from the database.
#[derive(Debug)]
pub struct StoredAccount {
    pub uid: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub anonymous: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredAccount {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredAccount {
            uid: row.try_get("uid")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            anonymous: row.try_get("anonymous")?,
        })
    }
}

impl StoredAccount {
    /// The principal as reported to clients.
    pub fn to_user(&self) -> AuthUser {
        AuthUser {
            uid: self.uid.clone(),
            anonymous: self.anonymous,
            email: self.email.clone(),
        }
    }
}

/// Insert an account. Fails with a unique violation when the email is taken.
pub async fn insert_account(
    pool: &PgPool,
    uid: &str,
    email: Option<&str>,
    password_hash: Option<&str>,
    anonymous: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO accounts (uid, email, password_hash, anonymous)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(uid)
    .bind(email)
    .bind(password_hash)
    .bind(anonymous)
    .execute(pool)
    .await?;

    Ok(())
}

/// Make sure a non-anonymous account exists for `uid`.
pub async fn ensure_account(pool: &PgPool, uid: &str) -> Result<StoredAccount, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO accounts (uid, anonymous)
        VALUES ($1, FALSE)
        ON CONFLICT (uid) DO NOTHING
        "#,
    )
    .bind(uid)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, StoredAccount>(
        "SELECT uid, email, password_hash, anonymous FROM accounts WHERE uid = $1",
    )
    .bind(uid)
    .fetch_one(pool)
    .await
}

/// Look up an account by email.
pub async fn find_account_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<StoredAccount>, sqlx::Error> {
    sqlx::query_as::<_, StoredAccount>(
        "SELECT uid, email, password_hash, anonymous FROM accounts WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

/// Store a new session token for `uid`.
pub async fn insert_session(pool: &PgPool, token: &str, uid: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO sessions (token, uid) VALUES ($1, $2)")
        .bind(token)
        .bind(uid)
        .execute(pool)
        .await?;

    Ok(())
}

/// Resolve a session token to its account.
pub async fn find_session_account(
    pool: &PgPool,
    token: &str,
) -> Result<Option<StoredAccount>, sqlx::Error> {
    sqlx::query_as::<_, StoredAccount>(
        r#"
        SELECT a.uid, a.email, a.password_hash, a.anonymous
        FROM sessions s
        JOIN accounts a ON a.uid = s.uid
        WHERE s.token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

/// Delete a session token.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

/// Look up the uid a custom token is provisioned for.
pub async fn find_custom_token_uid(
    pool: &PgPool,
    token: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT uid FROM custom_tokens WHERE token = $1")
        .bind(token)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.try_get("uid")).transpose()
}

/// Whether a database error is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
