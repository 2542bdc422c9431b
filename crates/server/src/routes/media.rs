use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::{auth_middleware, AuthUser},
    services::storage::MediaKind,
    AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:kind", post(upload))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware))
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<UploadedFile>,
    pub errors: Vec<String>,
}

/// Stores every file field of a multipart body and returns their URLs. The
/// caller then saves the URL on a course, chapter or attachment.
async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let kind = MediaKind::parse(&kind)
        .ok_or_else(|| AppError::NotFound(format!("Unknown media kind: {kind}")))?;

    let mut files = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let file_name = match field.file_name() {
            Some(name) => name.to_string(),
            None => {
                errors.push("File field missing filename".to_string());
                continue;
            }
        };

        if !kind.accepts(field.content_type()) {
            errors.push(format!(
                "File {file_name} is not a valid {} upload",
                kind.as_str()
            ));
            continue;
        }

        let data = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                errors.push(format!("Failed to read file {file_name}: {e}"));
                continue;
            }
        };

        match state.media.store(kind, &file_name, &data).await {
            Ok(url) => files.push(UploadedFile {
                name: file_name,
                url,
            }),
            Err(AppError::Validation(message)) => errors.push(message),
            Err(e) => return Err(e),
        }
    }

    if files.is_empty() {
        let message = if errors.is_empty() {
            "No files uploaded".to_string()
        } else {
            errors.join("; ")
        };
        return Err(AppError::Validation(message));
    }

    tracing::info!(user_id = %user.id, kind = kind.as_str(), count = files.len(), "media uploaded");
    Ok((StatusCode::CREATED, Json(UploadResponse { files, errors })))
}
