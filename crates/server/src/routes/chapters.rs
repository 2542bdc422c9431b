use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::{Chapter, UserProgress},
    error::Result,
    middleware::auth::{auth_middleware, AuthUser, MaybeAuthUser},
    routes::MessageResponse,
    services::chapters::{self, ChapterPatch, ChapterView, NewChapter, ReorderItem},
    AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/:id", get(get_chapter));

    let protected = Router::new()
        .route("/", post(create_chapter))
        .route("/course/:course_id", get(list_by_course))
        .route("/reorder", patch(reorder_chapters))
        .route("/:id", patch(update_chapter).delete(delete_chapter))
        .route("/:id/complete", post(mark_complete))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware));

    public.merge(protected)
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub chapters: Vec<ReorderItem>,
}

#[derive(Debug, Serialize)]
pub struct ReorderResponse {
    pub message: String,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub message: String,
    pub progress: UserProgress,
}

async fn create_chapter(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<NewChapter>,
) -> Result<(StatusCode, Json<Chapter>)> {
    let chapter = chapters::create(&state.db.pool, &user.id, body).await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn list_by_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Chapter>>> {
    Ok(Json(
        chapters::list_by_course(&state.db.pool, &user.id, &course_id).await?,
    ))
}

async fn get_chapter(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<Json<ChapterView>> {
    Ok(Json(chapters::get(&state.db.pool, caller.id(), &id).await?))
}

async fn update_chapter(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<ChapterPatch>,
) -> Result<Json<Chapter>> {
    Ok(Json(
        chapters::update(&state.db.pool, &user.id, &id, patch).await?,
    ))
}

async fn delete_chapter(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    chapters::delete(&state.db.pool, &user.id, &id).await?;
    Ok(Json(MessageResponse::new("Chapter deleted successfully")))
}

async fn reorder_chapters(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ReorderRequest>,
) -> Result<Json<ReorderResponse>> {
    let outcome = chapters::reorder(&state.db.pool, &user.id, body.chapters).await?;
    Ok(Json(ReorderResponse {
        message: "Chapters reordered".to_string(),
        updated: outcome.updated,
        skipped: outcome.skipped,
    }))
}

async fn mark_complete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CompletionResponse>)> {
    let outcome = chapters::mark_complete(&state.db.pool, &user.id, &id).await?;

    let (status, message) = if outcome.created {
        (StatusCode::CREATED, "Chapter marked complete")
    } else {
        (StatusCode::OK, "Already marked complete")
    };

    Ok((
        status,
        Json(CompletionResponse {
            message: message.to_string(),
            progress: outcome.progress,
        }),
    ))
}
