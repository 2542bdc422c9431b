use std::collections::HashSet;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Chapter, Course, UserProgress},
    error::{AppError, Result},
    policy::{self, Action, Resource},
    services::{courses, nullable},
};

#[derive(Debug, Deserialize)]
pub struct NewChapter {
    pub course_id: String,
    pub title: String,
}

/// Fields an owner may change. Position is only changed through reordering.
/// `null` clears `description` or `video_url`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChapterPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub video_url: Option<Option<String>>,
    pub is_published: Option<bool>,
    pub is_free: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderItem {
    pub id: String,
    pub position: i64,
}

/// Which entries of a reorder batch were applied.
///
/// Skipped entries are chapters that do not exist or belong to a course the
/// caller does not own; the two cases are not distinguished.
#[derive(Debug, Default, Serialize)]
pub struct ReorderOutcome {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChapterView {
    #[serde(flatten)]
    pub chapter: Chapter,
    pub is_completed: bool,
    pub previous_chapter_id: Option<String>,
    pub next_chapter_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompletionOutcome {
    pub progress: UserProgress,
    /// False when the chapter had already been marked complete.
    pub created: bool,
}

async fn find_with_course(pool: &SqlitePool, id: &str) -> Result<Option<(Chapter, Course)>> {
    let chapter = sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(chapter) = chapter else {
        return Ok(None);
    };

    Ok(courses::find(pool, &chapter.course_id)
        .await?
        .map(|course| (chapter, course)))
}

async fn load_authorized(
    pool: &SqlitePool,
    caller: Option<&str>,
    id: &str,
    action: Action,
) -> Result<(Chapter, Course)> {
    let (chapter, course) = find_with_course(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))?;
    policy::authorize(caller, action, &Resource::chapter(&chapter, &course), "Chapter")?;
    Ok((chapter, course))
}

/// Appends a chapter to the end of its course.
pub async fn create(pool: &SqlitePool, caller: &str, input: NewChapter) -> Result<Chapter> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Chapter title is required".to_string()));
    }

    let course =
        courses::load_authorized(pool, Some(caller), &input.course_id, Action::Edit).await?;

    let chapter_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    // The next position is computed inside the insert so concurrent creates
    // cannot read the same maximum.
    sqlx::query(
        r#"
        INSERT INTO chapters (id, course_id, title, position, is_published, is_free, created_at, updated_at)
        SELECT ?, ?, ?, COALESCE(MAX(position), 0) + 1, 0, 0, ?, ?
        FROM chapters WHERE course_id = ?
        "#,
    )
    .bind(&chapter_id)
    .bind(&course.id)
    .bind(title)
    .bind(now)
    .bind(now)
    .bind(&course.id)
    .execute(pool)
    .await?;

    let chapter = sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE id = ?")
        .bind(&chapter_id)
        .fetch_one(pool)
        .await?;

    tracing::debug!(chapter_id = %chapter.id, position = chapter.position, "chapter created");
    Ok(chapter)
}

pub async fn list_by_course(
    pool: &SqlitePool,
    caller: &str,
    course_id: &str,
) -> Result<Vec<Chapter>> {
    let course = courses::load_authorized(pool, Some(caller), course_id, Action::Edit).await?;

    let chapters = sqlx::query_as::<_, Chapter>(
        "SELECT * FROM chapters WHERE course_id = ? ORDER BY position ASC, created_at ASC",
    )
    .bind(&course.id)
    .fetch_all(pool)
    .await?;
    Ok(chapters)
}

/// Reads a single chapter. Anonymous callers and learners only see chapters
/// that are published in a published course.
pub async fn get(pool: &SqlitePool, caller: Option<&str>, id: &str) -> Result<ChapterView> {
    let (chapter, course) = load_authorized(pool, caller, id, Action::Read).await?;

    let is_completed = match caller {
        Some(user_id) => sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_progress WHERE user_id = ? AND chapter_id = ? AND is_completed = 1)",
        )
        .bind(user_id)
        .bind(&chapter.id)
        .fetch_one(pool)
        .await?,
        None => false,
    };

    let previous_chapter_id = sqlx::query_scalar::<_, String>(
        r#"
        SELECT id FROM chapters
        WHERE course_id = ? AND is_published = 1 AND position < ?
        ORDER BY position DESC LIMIT 1
        "#,
    )
    .bind(&course.id)
    .bind(chapter.position)
    .fetch_optional(pool)
    .await?;

    let next_chapter_id = sqlx::query_scalar::<_, String>(
        r#"
        SELECT id FROM chapters
        WHERE course_id = ? AND is_published = 1 AND position > ?
        ORDER BY position ASC LIMIT 1
        "#,
    )
    .bind(&course.id)
    .bind(chapter.position)
    .fetch_optional(pool)
    .await?;

    Ok(ChapterView {
        chapter,
        is_completed,
        previous_chapter_id,
        next_chapter_id,
    })
}

pub async fn update(
    pool: &SqlitePool,
    caller: &str,
    id: &str,
    patch: ChapterPatch,
) -> Result<Chapter> {
    let (chapter, _) = load_authorized(pool, Some(caller), id, Action::Edit).await?;

    let title = match patch.title {
        Some(title) if title.trim().is_empty() => {
            return Err(AppError::Validation("Chapter title cannot be empty".to_string()));
        }
        Some(title) => Some(title.trim().to_string()),
        None => None,
    };

    sqlx::query(
        r#"
        UPDATE chapters SET
            title = COALESCE(?, title),
            description = CASE WHEN ? THEN ? ELSE description END,
            video_url = CASE WHEN ? THEN ? ELSE video_url END,
            is_published = COALESCE(?, is_published),
            is_free = COALESCE(?, is_free),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(title)
    .bind(patch.description.is_some())
    .bind(patch.description.flatten())
    .bind(patch.video_url.is_some())
    .bind(patch.video_url.flatten())
    .bind(patch.is_published)
    .bind(patch.is_free)
    .bind(Utc::now())
    .bind(&chapter.id)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE id = ?")
        .bind(&chapter.id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Chapter not found".to_string()))
}

pub async fn delete(pool: &SqlitePool, caller: &str, id: &str) -> Result<()> {
    let (chapter, _) = load_authorized(pool, Some(caller), id, Action::Delete).await?;

    sqlx::query("DELETE FROM chapters WHERE id = ?")
        .bind(&chapter.id)
        .execute(pool)
        .await?;

    tracing::info!(chapter_id = %chapter.id, "chapter deleted");
    Ok(())
}

/// Applies a client-computed ordering.
///
/// The batch is validated as a whole first; after that every entry is an
/// independent keyed write. Entries the caller may not edit are skipped, and
/// there is no transaction across entries, so concurrent batches converge
/// per chapter to whichever write landed last.
pub async fn reorder(
    pool: &SqlitePool,
    caller: &str,
    items: Vec<ReorderItem>,
) -> Result<ReorderOutcome> {
    validate_reorder(&items)?;

    let results = join_all(
        items
            .iter()
            .map(|item| apply_position(pool, caller, item)),
    )
    .await;

    let mut outcome = ReorderOutcome::default();
    for (item, applied) in items.into_iter().zip(results) {
        if applied? {
            outcome.updated.push(item.id);
        } else {
            outcome.skipped.push(item.id);
        }
    }

    if !outcome.skipped.is_empty() {
        tracing::warn!(
            skipped = outcome.skipped.len(),
            updated = outcome.updated.len(),
            "reorder batch partially applied"
        );
    }
    Ok(outcome)
}

fn validate_reorder(items: &[ReorderItem]) -> Result<()> {
    if items.is_empty() {
        return Err(AppError::Validation("No chapters to reorder".to_string()));
    }

    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if item.position < 1 {
            return Err(AppError::Validation(format!(
                "Invalid position {} for chapter {}",
                item.position, item.id
            )));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(AppError::Validation(format!(
                "Chapter {} appears more than once",
                item.id
            )));
        }
    }
    Ok(())
}

/// Returns whether the position was written.
async fn apply_position(pool: &SqlitePool, caller: &str, item: &ReorderItem) -> Result<bool> {
    let Some((chapter, course)) = find_with_course(pool, &item.id).await? else {
        return Ok(false);
    };

    if !policy::can(Some(caller), Action::Edit, &Resource::chapter(&chapter, &course)) {
        return Ok(false);
    }

    let result = sqlx::query("UPDATE chapters SET position = ?, updated_at = ? WHERE id = ?")
        .bind(item.position)
        .bind(Utc::now())
        .bind(&chapter.id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Records that `caller` finished a chapter. Repeated calls return the
/// existing record.
pub async fn mark_complete(
    pool: &SqlitePool,
    caller: &str,
    chapter_id: &str,
) -> Result<CompletionOutcome> {
    let (chapter, _) = load_authorized(pool, Some(caller), chapter_id, Action::Read).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO user_progress (id, user_id, chapter_id, is_completed, created_at)
        VALUES (?, ?, ?, 1, ?)
        ON CONFLICT (user_id, chapter_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(caller)
    .bind(&chapter.id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let progress = sqlx::query_as::<_, UserProgress>(
        "SELECT * FROM user_progress WHERE user_id = ? AND chapter_id = ?",
    )
    .bind(caller)
    .bind(&chapter.id)
    .fetch_one(pool)
    .await?;

    Ok(CompletionOutcome {
        progress,
        created: result.rows_affected() > 0,
    })
}
