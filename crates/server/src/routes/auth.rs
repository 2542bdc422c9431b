use axum::{
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    middleware::auth::{auth_middleware, AuthUser},
    routes::MessageResponse,
    services::accounts::{self, AccountContext, Profile, Session, SigninRequest, SignupRequest},
    AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/user", get(user_profile))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/signup", post(signup))
        .route("/verify-email", post(verify_email))
        .route("/resend-verification", post(resend_verification))
        .route("/signin", post(signin))
        .route("/google", post(google_login))
        .merge(protected)
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub user: SignupUser,
}

#[derive(Debug, Serialize)]
pub struct SignupUser {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: Profile,
}

fn account_context(state: &AppState) -> AccountContext<'_> {
    AccountContext {
        pool: &state.db.pool,
        jwt_secret: &state.config.jwt_secret,
        client_url: &state.config.client_url,
        mailer: state.mailer.as_ref(),
    }
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>)> {
    let profile = accounts::signup(&account_context(&state), body).await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created, check your email to verify your account".to_string(),
            user: SignupUser {
                id: profile.id,
                email: profile.email,
            },
        }),
    ))
}

async fn verify_email(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<MessageResponse>> {
    accounts::verify_email(&state.db.pool, &state.config.jwt_secret, &body.token).await?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

async fn resend_verification(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> Result<Json<MessageResponse>> {
    accounts::resend_verification(&account_context(&state), &body.email).await?;
    Ok(Json(MessageResponse::new(
        "If the account exists and is unverified, a new link has been sent",
    )))
}

async fn signin(
    State(state): State<AppState>,
    Json(body): Json<SigninRequest>,
) -> Result<Json<Session>> {
    let session = accounts::signin(&state.db.pool, &state.config.jwt_secret, body).await?;
    Ok(Json(session))
}

async fn google_login(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<Session>> {
    let session =
        accounts::identity_login(&account_context(&state), state.identity.as_ref(), &body.token)
            .await?;
    Ok(Json(session))
}

async fn user_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>> {
    let profile = accounts::profile(&state.db.pool, &user.id).await?;
    Ok(Json(ProfileResponse { user: profile }))
}
