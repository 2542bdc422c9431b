use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::User,
    error::{AppError, Result},
    services::{
        identity::IdentityProvider,
        mailer::{self, Mailer},
    },
};

const SESSION_TTL_HOURS: i64 = 24;
const VERIFICATION_TTL_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Session,
    EmailVerification,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub kind: TokenKind,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

/// The fields of a user that are safe to hand to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub image: Option<String>,
    pub is_verified: bool,
}

impl From<User> for Profile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            image: user.image,
            is_verified: user.is_verified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub user: Profile,
}

/// What the account flows need beyond the database.
pub struct AccountContext<'a> {
    pub pool: &'a SqlitePool,
    pub jwt_secret: &'a str,
    pub client_url: &'a str,
    pub mailer: &'a dyn Mailer,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn create_token(
    user_id: &str,
    email: &str,
    kind: TokenKind,
    secret: &str,
) -> Result<String> {
    let ttl = match kind {
        TokenKind::Session => chrono::Duration::hours(SESSION_TTL_HOURS),
        TokenKind::EmailVerification => chrono::Duration::hours(VERIFICATION_TTL_HOURS),
    };
    let expiration = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        kind,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

/// Decodes a token and checks it was issued for `kind`.
pub fn decode_token(token: &str, kind: TokenKind, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
    .filter(|claims| claims.kind == kind)
}

async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn send_verification(ctx: &AccountContext<'_>, user_id: &str, email: &str) -> Result<()> {
    let token = create_token(user_id, email, TokenKind::EmailVerification, ctx.jwt_secret)?;
    let link = format!(
        "{}/verify-email?token={token}",
        ctx.client_url.trim_end_matches('/')
    );

    if let Err(e) = ctx.mailer.send(mailer::verification_email(email, &link)).await {
        tracing::warn!(error = %e, user_id, "failed to send verification email");
    }
    Ok(())
}

/// Creates an unverified account and emails a verification link. No session
/// is issued until the address is confirmed.
pub async fn signup(ctx: &AccountContext<'_>, body: SignupRequest) -> Result<Profile> {
    let username = body.username.trim();
    let email = normalize_email(&body.email);

    if username.is_empty() || email.is_empty() || body.password.is_empty() {
        return Err(AppError::Validation("All fields are required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    if find_by_email(ctx.pool, &email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(&body.password)?;
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email,
        password_hash: Some(password_hash),
        image: body.image.filter(|url| !url.trim().is_empty()),
        is_verified: false,
        created_at: Utc::now(),
    };

    // The lookup above is only a fast path; a concurrent signup for the same
    // address is caught by the unique email here.
    let inserted = sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, image, is_verified, created_at) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT (email) DO NOTHING",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.image)
    .bind(user.is_verified)
    .bind(user.created_at)
    .execute(ctx.pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    tracing::info!(user_id = %user.id, "account created");
    send_verification(ctx, &user.id, &user.email).await?;

    Ok(user.into())
}

pub async fn verify_email(pool: &SqlitePool, jwt_secret: &str, token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(AppError::Validation("Token is required".to_string()));
    }

    let claims = decode_token(token, TokenKind::EmailVerification, jwt_secret)
        .ok_or_else(|| AppError::Validation("Invalid or expired token".to_string()))?;

    let result = sqlx::query("UPDATE users SET is_verified = 1 WHERE id = ?")
        .bind(&claims.sub)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = %claims.sub, "email verified");
    Ok(())
}

/// Sends a fresh verification link if `email` belongs to an unverified
/// password account. Silent otherwise.
pub async fn resend_verification(ctx: &AccountContext<'_>, email: &str) -> Result<()> {
    let email = normalize_email(email);
    match find_by_email(ctx.pool, &email).await? {
        Some(user) if !user.is_verified && user.password_hash.is_some() => {
            send_verification(ctx, &user.id, &user.email).await
        }
        _ => Ok(()),
    }
}

pub async fn signin(pool: &SqlitePool, jwt_secret: &str, body: SigninRequest) -> Result<Session> {
    let invalid = || AppError::InvalidCredentials("Invalid email or password".to_string());

    let user = find_by_email(pool, &normalize_email(&body.email))
        .await?
        .ok_or_else(invalid)?;

    let password_hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(&body.password, password_hash)? {
        return Err(invalid());
    }

    if !user.is_verified {
        return Err(AppError::Unverified(
            "Please verify your email before signing in".to_string(),
        ));
    }

    let token = create_token(&user.id, &user.email, TokenKind::Session, jwt_secret)?;
    Ok(Session {
        token,
        user: user.into(),
    })
}

/// Signs in with a third-party assertion, creating the account on first use.
pub async fn identity_login(
    ctx: &AccountContext<'_>,
    identity: &dyn IdentityProvider,
    assertion: &str,
) -> Result<Session> {
    let claims = identity.verify(assertion).await.map_err(|e| {
        tracing::warn!(error = %e, "identity provider login rejected");
        AppError::Unauthorized
    })?;
    let email = normalize_email(&claims.email);

    let user = match find_by_email(ctx.pool, &email).await? {
        Some(mut user) => {
            if !user.is_verified {
                sqlx::query("UPDATE users SET is_verified = 1 WHERE id = ?")
                    .bind(&user.id)
                    .execute(ctx.pool)
                    .await?;
                user.is_verified = true;
            }
            user
        }
        None => {
            let user = User {
                id: Uuid::new_v4().to_string(),
                username: claims
                    .name
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| "Learner".to_string()),
                email,
                password_hash: None,
                image: claims.picture,
                is_verified: true,
                created_at: Utc::now(),
            };

            // A concurrent first login for the same address loses the race
            // on the unique email and falls back to the winner's row.
            let inserted = sqlx::query(
                "INSERT INTO users (id, username, email, image, is_verified, created_at) VALUES (?, ?, ?, ?, 1, ?) ON CONFLICT (email) DO NOTHING",
            )
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.image)
            .bind(user.created_at)
            .execute(ctx.pool)
            .await?
            .rows_affected()
                > 0;

            if inserted {
                tracing::info!(user_id = %user.id, "account created via identity provider");
                if let Err(e) = ctx
                    .mailer
                    .send(mailer::welcome_email(&user.email, &user.username))
                    .await
                {
                    tracing::warn!(error = %e, "failed to send welcome email");
                }
                user
            } else {
                find_by_email(ctx.pool, &user.email)
                    .await?
                    .ok_or_else(|| AppError::Internal("User vanished after insert".to_string()))?
            }
        }
    };

    let token = create_token(&user.id, &user.email, TokenKind::Session, ctx.jwt_secret)?;
    Ok(Session {
        token,
        user: user.into(),
    })
}

pub async fn profile(pool: &SqlitePool, user_id: &str) -> Result<Profile> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(user.into())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::db::Database;
    use crate::services::identity::{IdentityClaims, IdentityError};
    use crate::services::mailer::OutgoingEmail;

    const SECRET: &str = "test-secret";

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _email: OutgoingEmail) -> anyhow::Result<()> {
            anyhow::bail!("smtp down")
        }
    }

    struct StaticIdentity(Option<IdentityClaims>);

    #[async_trait]
    impl IdentityProvider for StaticIdentity {
        async fn verify(&self, _assertion: &str) -> std::result::Result<IdentityClaims, IdentityError> {
            self.0
                .clone()
                .ok_or_else(|| IdentityError::Rejected("bad token".to_string()))
        }
    }

    fn ctx<'a>(db: &'a Database, mailer: &'a dyn Mailer) -> AccountContext<'a> {
        AccountContext {
            pool: &db.pool,
            jwt_secret: SECRET,
            client_url: "http://client.test/",
            mailer,
        }
    }

    fn signup_body(email: &str) -> SignupRequest {
        SignupRequest {
            username: "ada".into(),
            email: email.into(),
            password: "correct horse".into(),
            image: None,
        }
    }

    fn token_from_link(email: &OutgoingEmail) -> String {
        let start = email.text.find("token=").unwrap() + "token=".len();
        email.text[start..].trim().to_string()
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn tokens_are_bound_to_their_kind() {
        let token = create_token("u1", "a@b.c", TokenKind::EmailVerification, SECRET).unwrap();
        assert!(decode_token(&token, TokenKind::Session, SECRET).is_none());
        assert_eq!(
            decode_token(&token, TokenKind::EmailVerification, SECRET)
                .unwrap()
                .sub,
            "u1"
        );
        assert!(decode_token(&token, TokenKind::EmailVerification, "other").is_none());
    }

    #[tokio::test]
    async fn concurrent_signups_for_one_email_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("lectern.db").display());
        let db = Database::connect(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        let mailer = RecordingMailer::default();
        let ctx = ctx(&db, &mailer);

        let (a, b) = tokio::join!(
            signup(&ctx, signup_body("ada@example.com")),
            signup(&ctx, signup_body("ada@example.com")),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::Conflict(_)))));

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        db.close().await;
    }

    #[tokio::test]
    async fn signup_verify_signin_flow() {
        let db = Database::in_memory().await.unwrap();
        let mailer = RecordingMailer::default();
        let ctx = ctx(&db, &mailer);

        let profile = signup(&ctx, signup_body("Ada@Example.com")).await.unwrap();
        assert_eq!(profile.email, "ada@example.com");
        assert!(!profile.is_verified);

        let err = signin(
            &db.pool,
            SECRET,
            SigninRequest {
                email: "ada@example.com".into(),
                password: "correct horse".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unverified(_)));

        let sent = mailer.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("http://client.test/verify-email?token="));
        verify_email(&db.pool, SECRET, &token_from_link(&sent[0]))
            .await
            .unwrap();

        let session = signin(
            &db.pool,
            SECRET,
            SigninRequest {
                email: "ada@example.com".into(),
                password: "correct horse".into(),
            },
        )
        .await
        .unwrap();
        let claims = decode_token(&session.token, TokenKind::Session, SECRET).unwrap();
        assert_eq!(claims.sub, profile.id);

        let err = signin(
            &db.pool,
            SECRET,
            SigninRequest {
                email: "ada@example.com".into(),
                password: "wrong password".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials(_)));
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_survives_mail_failure() {
        let db = Database::in_memory().await.unwrap();
        let mailer = FailingMailer;
        let ctx = ctx(&db, &mailer);

        signup(&ctx, signup_body("ada@example.com")).await.unwrap();
        let err = signup(&ctx, signup_body("ADA@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let mut short = signup_body("bob@example.com");
        short.password = "short".into();
        assert!(matches!(
            signup(&ctx, short).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn identity_login_creates_then_reuses_account() {
        let db = Database::in_memory().await.unwrap();
        let mailer = RecordingMailer::default();
        let ctx = ctx(&db, &mailer);
        let identity = StaticIdentity(Some(IdentityClaims {
            email: "grace@example.com".into(),
            name: Some("Grace".into()),
            picture: Some("http://img.test/grace.png".into()),
        }));

        let first = identity_login(&ctx, &identity, "assertion").await.unwrap();
        assert!(first.user.is_verified);
        assert_eq!(first.user.username, "Grace");

        let second = identity_login(&ctx, &identity, "assertion").await.unwrap();
        assert_eq!(first.user.id, second.user.id);
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);

        let err = identity_login(&ctx, &StaticIdentity(None), "bad")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn identity_login_verifies_existing_password_account() {
        let db = Database::in_memory().await.unwrap();
        let mailer = RecordingMailer::default();
        let ctx = ctx(&db, &mailer);

        let created = signup(&ctx, signup_body("ada@example.com")).await.unwrap();
        let identity = StaticIdentity(Some(IdentityClaims {
            email: "ada@example.com".into(),
            name: None,
            picture: None,
        }));

        let session = identity_login(&ctx, &identity, "assertion").await.unwrap();
        assert_eq!(session.user.id, created.id);
        assert!(profile(&db.pool, &created.id).await.unwrap().is_verified);
    }
}
