use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Attachment, Category, Chapter, Course},
    error::{AppError, Result},
    policy::{self, Action, Resource},
    services::nullable,
};

#[derive(Debug, Deserialize)]
pub struct NewCourse {
    pub title: String,
}

/// Fields an owner may change. Anything else in the request body is rejected.
///
/// Optional columns take `Option<Option<_>>`: an absent field is left alone,
/// an explicit `null` clears the column.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoursePatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub image_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub price: Option<Option<f64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub category_id: Option<Option<String>>,
    pub is_published: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct NewAttachment {
    pub name: String,
    pub url: String,
}

/// A course as its owner sees it in the editor.
#[derive(Debug, Serialize)]
pub struct CourseWithRelations {
    #[serde(flatten)]
    pub course: Course,
    pub category: Option<Category>,
    pub chapters: Vec<Chapter>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CourseSummary {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub course: Course,
    pub chapter_count: i64,
    #[sqlx(skip)]
    pub category: Option<Category>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct LearnerChapter {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub chapter: Chapter,
    pub is_completed: bool,
}

/// A published course with its published chapters, as a learner sees it.
#[derive(Debug, Serialize)]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub category: Option<Category>,
    pub chapters: Vec<LearnerChapter>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CategoryWithCount {
    pub id: String,
    pub name: String,
    pub course_count: i64,
}

pub async fn find(pool: &SqlitePool, id: &str) -> Result<Option<Course>> {
    let course = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(course)
}

/// Loads a course and checks `action` against it.
pub async fn load_authorized(
    pool: &SqlitePool,
    caller: Option<&str>,
    id: &str,
    action: Action,
) -> Result<Course> {
    let course = find(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;
    policy::authorize(caller, action, &Resource::course(&course), "Course")?;
    Ok(course)
}

pub async fn create(pool: &SqlitePool, owner_id: &str, input: NewCourse) -> Result<Course> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Course title is required".to_string()));
    }

    let course_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO courses (id, user_id, title, is_published, created_at, updated_at) VALUES (?, ?, ?, 0, ?, ?)",
    )
    .bind(&course_id)
    .bind(owner_id)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    tracing::debug!(course_id = %course_id, owner_id, "course created");

    Ok(Course {
        id: course_id,
        user_id: owner_id.to_string(),
        title: title.to_string(),
        description: None,
        image_url: None,
        price: None,
        is_published: false,
        category_id: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_owned(pool: &SqlitePool, caller: &str, id: &str) -> Result<CourseWithRelations> {
    let course = load_authorized(pool, Some(caller), id, Action::Edit).await?;

    let category = match &course.category_id {
        Some(category_id) => find_category(pool, category_id).await?,
        None => None,
    };

    let chapters = sqlx::query_as::<_, Chapter>(
        "SELECT * FROM chapters WHERE course_id = ? ORDER BY position ASC",
    )
    .bind(&course.id)
    .fetch_all(pool)
    .await?;

    let attachments = sqlx::query_as::<_, Attachment>(
        "SELECT * FROM attachments WHERE course_id = ? ORDER BY created_at DESC",
    )
    .bind(&course.id)
    .fetch_all(pool)
    .await?;

    Ok(CourseWithRelations {
        course,
        category,
        chapters,
        attachments,
    })
}

pub async fn update(
    pool: &SqlitePool,
    caller: &str,
    id: &str,
    patch: CoursePatch,
) -> Result<Course> {
    let course = load_authorized(pool, Some(caller), id, Action::Edit).await?;

    let title = match patch.title {
        Some(title) if title.trim().is_empty() => {
            return Err(AppError::Validation("Course title cannot be empty".to_string()));
        }
        Some(title) => Some(title.trim().to_string()),
        None => None,
    };

    if let Some(Some(price)) = patch.price {
        if !price.is_finite() || price < 0.0 {
            return Err(AppError::Validation(
                "Price must be a non-negative number".to_string(),
            ));
        }
    }

    if let Some(Some(category_id)) = &patch.category_id {
        if find_category(pool, category_id).await?.is_none() {
            return Err(AppError::Validation("Unknown category".to_string()));
        }
    }

    sqlx::query(
        r#"
        UPDATE courses SET
            title = COALESCE(?, title),
            description = CASE WHEN ? THEN ? ELSE description END,
            image_url = CASE WHEN ? THEN ? ELSE image_url END,
            price = CASE WHEN ? THEN ? ELSE price END,
            category_id = CASE WHEN ? THEN ? ELSE category_id END,
            is_published = COALESCE(?, is_published),
            updated_at = ?
        WHERE id = ? AND user_id = ?
        "#,
    )
    .bind(title)
    .bind(patch.description.is_some())
    .bind(patch.description.flatten())
    .bind(patch.image_url.is_some())
    .bind(patch.image_url.flatten())
    .bind(patch.price.is_some())
    .bind(patch.price.flatten())
    .bind(patch.category_id.is_some())
    .bind(patch.category_id.flatten())
    .bind(patch.is_published)
    .bind(Utc::now())
    .bind(&course.id)
    .bind(caller)
    .execute(pool)
    .await?;

    find(pool, &course.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))
}

/// Deletes a course; chapters, attachments and their progress rows cascade.
pub async fn delete(pool: &SqlitePool, caller: &str, id: &str) -> Result<()> {
    let course = load_authorized(pool, Some(caller), id, Action::Delete).await?;

    sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(&course.id)
        .execute(pool)
        .await?;

    tracing::info!(course_id = %course.id, "course deleted");
    Ok(())
}

pub async fn list_own(pool: &SqlitePool, caller: &str) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT * FROM courses WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(caller)
    .fetch_all(pool)
    .await?;
    Ok(courses)
}

pub async fn list_published(
    pool: &SqlitePool,
    category: Option<&str>,
) -> Result<Vec<CourseSummary>> {
    let courses = sqlx::query_as::<_, CourseSummary>(
        r#"
        SELECT c.*,
            (SELECT COUNT(*) FROM chapters ch WHERE ch.course_id = c.id AND ch.is_published = 1) AS chapter_count
        FROM courses c
        LEFT JOIN categories cat ON cat.id = c.category_id
        WHERE c.is_published = 1 AND (? IS NULL OR cat.name = ?)
        ORDER BY c.created_at DESC, c.rowid DESC
        "#,
    )
    .bind(category)
    .bind(category)
    .fetch_all(pool)
    .await?;

    attach_categories(pool, courses).await
}

pub async fn search_published(pool: &SqlitePool, query: &str) -> Result<Vec<CourseSummary>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::Validation(
            "Query parameter is required".to_string(),
        ));
    }

    let pattern = format!("%{}%", escape_like(query));
    let courses = sqlx::query_as::<_, CourseSummary>(
        r#"
        SELECT c.*,
            (SELECT COUNT(*) FROM chapters ch WHERE ch.course_id = c.id AND ch.is_published = 1) AS chapter_count
        FROM courses c
        WHERE c.is_published = 1 AND c.title LIKE ? ESCAPE '\'
        ORDER BY c.created_at DESC, c.rowid DESC
        "#,
    )
    .bind(pattern)
    .fetch_all(pool)
    .await?;

    attach_categories(pool, courses).await
}

/// The learner view of a published course. Unpublished courses are reported
/// as missing, even to their owner.
pub async fn published_detail(
    pool: &SqlitePool,
    caller: Option<&str>,
    id: &str,
) -> Result<CourseDetail> {
    let course = find(pool, id)
        .await?
        .filter(|course| course.is_published)
        .ok_or_else(|| AppError::NotFound("Course not found or not published".to_string()))?;

    let category = match &course.category_id {
        Some(category_id) => find_category(pool, category_id).await?,
        None => None,
    };

    let chapters = sqlx::query_as::<_, LearnerChapter>(
        r#"
        SELECT ch.*,
            EXISTS(
                SELECT 1 FROM user_progress p
                WHERE p.chapter_id = ch.id AND p.user_id = ? AND p.is_completed = 1
            ) AS is_completed
        FROM chapters ch
        WHERE ch.course_id = ? AND ch.is_published = 1
        ORDER BY ch.position ASC, ch.created_at ASC
        "#,
    )
    .bind(caller)
    .bind(&course.id)
    .fetch_all(pool)
    .await?;

    Ok(CourseDetail {
        course,
        category,
        chapters,
    })
}

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<CategoryWithCount>> {
    let categories = sqlx::query_as::<_, CategoryWithCount>(
        r#"
        SELECT cat.id, cat.name, COUNT(c.id) AS course_count
        FROM categories cat
        LEFT JOIN courses c ON c.category_id = cat.id
        GROUP BY cat.id, cat.name
        ORDER BY cat.name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(categories)
}

pub async fn create_attachment(
    pool: &SqlitePool,
    caller: &str,
    course_id: &str,
    input: NewAttachment,
) -> Result<Attachment> {
    let name = input.name.trim();
    let url = input.url.trim();
    if name.is_empty() || url.is_empty() {
        return Err(AppError::Validation("Missing required fields".to_string()));
    }

    let course = load_authorized(pool, Some(caller), course_id, Action::Edit).await?;

    let attachment = Attachment {
        id: Uuid::new_v4().to_string(),
        course_id: course.id,
        name: name.to_string(),
        url: url.to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO attachments (id, course_id, name, url, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&attachment.id)
    .bind(&attachment.course_id)
    .bind(&attachment.name)
    .bind(&attachment.url)
    .bind(attachment.created_at)
    .execute(pool)
    .await?;

    Ok(attachment)
}

pub async fn delete_attachment(pool: &SqlitePool, caller: &str, id: &str) -> Result<()> {
    let attachment = sqlx::query_as::<_, Attachment>("SELECT * FROM attachments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Attachment not found".to_string()))?;

    load_authorized(pool, Some(caller), &attachment.course_id, Action::Delete).await?;

    sqlx::query("DELETE FROM attachments WHERE id = ?")
        .bind(&attachment.id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn find_category(pool: &SqlitePool, id: &str) -> Result<Option<Category>> {
    let category = sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(category)
}

async fn attach_categories(
    pool: &SqlitePool,
    mut courses: Vec<CourseSummary>,
) -> Result<Vec<CourseSummary>> {
    let categories: HashMap<String, Category> =
        sqlx::query_as::<_, Category>("SELECT id, name FROM categories")
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|category| (category.id.clone(), category))
            .collect();

    for summary in &mut courses {
        summary.category = summary
            .course
            .category_id
            .as_ref()
            .and_then(|id| categories.get(id))
            .cloned();
    }
    Ok(courses)
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
