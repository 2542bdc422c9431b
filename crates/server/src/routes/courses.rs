use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware as axum_middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    db::models::{Attachment, Course},
    error::{AppError, Result},
    middleware::auth::{auth_middleware, AuthUser, MaybeAuthUser},
    routes::MessageResponse,
    services::{
        courses::{
            self, CategoryWithCount, CourseDetail, CoursePatch, CourseSummary,
            CourseWithRelations, NewAttachment, NewCourse,
        },
        progress::{self, CourseProgress, Dashboard},
    },
    AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/published", get(list_published))
        .route("/search", get(search))
        .route("/:id/detail", get(published_detail));

    let protected = Router::new()
        .route("/", get(list_own).post(create_course))
        .route("/categories", get(list_categories))
        .route("/progress", get(dashboard))
        .route(
            "/:id",
            get(get_course).patch(update_course).delete(delete_course),
        )
        .route("/:id/progress", get(course_progress))
        .route("/:id/attachments", post(create_attachment))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware));

    public.merge(protected)
}

pub fn attachments_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:id", delete(delete_attachment))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware))
}

#[derive(Debug, Deserialize)]
pub struct PublishedQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

async fn create_course(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<NewCourse>,
) -> Result<(StatusCode, Json<Course>)> {
    let course = courses::create(&state.db.pool, &user.id, body).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn list_own(State(state): State<AppState>, user: AuthUser) -> Result<Json<Vec<Course>>> {
    Ok(Json(courses::list_own(&state.db.pool, &user.id).await?))
}

async fn get_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CourseWithRelations>> {
    Ok(Json(courses::get_owned(&state.db.pool, &user.id, &id).await?))
}

async fn update_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<CoursePatch>,
) -> Result<Json<Course>> {
    Ok(Json(courses::update(&state.db.pool, &user.id, &id, patch).await?))
}

async fn delete_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    courses::delete(&state.db.pool, &user.id, &id).await?;
    Ok(Json(MessageResponse::new("Course deleted successfully")))
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<CategoryWithCount>>> {
    Ok(Json(courses::list_categories(&state.db.pool).await?))
}

async fn list_published(
    State(state): State<AppState>,
    Query(query): Query<PublishedQuery>,
) -> Result<Json<Vec<CourseSummary>>> {
    let category = query.category.as_deref().filter(|c| !c.is_empty());
    Ok(Json(courses::list_published(&state.db.pool, category).await?))
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<CourseSummary>>> {
    let query = query.query.ok_or_else(|| {
        AppError::Validation("Query parameter is required".to_string())
    })?;
    Ok(Json(courses::search_published(&state.db.pool, &query).await?))
}

async fn published_detail(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<Json<CourseDetail>> {
    Ok(Json(
        courses::published_detail(&state.db.pool, caller.id(), &id).await?,
    ))
}

async fn course_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CourseProgress>> {
    Ok(Json(
        progress::course_progress(&state.db.pool, &user.id, &id).await?,
    ))
}

async fn dashboard(State(state): State<AppState>, user: AuthUser) -> Result<Json<Dashboard>> {
    Ok(Json(progress::dashboard(&state.db.pool, &user.id).await?))
}

async fn create_attachment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<String>,
    Json(body): Json<NewAttachment>,
) -> Result<(StatusCode, Json<Attachment>)> {
    let attachment =
        courses::create_attachment(&state.db.pool, &user.id, &course_id, body).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

async fn delete_attachment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    courses::delete_attachment(&state.db.pool, &user.id, &id).await?;
    Ok(Json(MessageResponse::new("Attachment deleted successfully")))
}
