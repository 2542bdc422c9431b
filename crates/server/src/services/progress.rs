use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    db::models::Course,
    error::Result,
    policy::Action,
    services::courses,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CourseProgress {
    pub course_id: String,
    pub total_chapters: i64,
    pub completed_chapters: i64,
    /// Rounded down to a whole percent; 0 for courses without chapters.
    pub percentage: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardEntry {
    #[serde(flatten)]
    pub course: Course,
    pub progress: CourseProgress,
}

#[derive(Debug, Default, Serialize)]
pub struct Dashboard {
    pub completed: Vec<DashboardEntry>,
    pub in_progress: Vec<DashboardEntry>,
}

#[derive(sqlx::FromRow)]
struct Counts {
    total: i64,
    completed: i64,
}

fn percentage(completed: i64, total: i64) -> i64 {
    if total == 0 {
        0
    } else {
        completed * 100 / total
    }
}

/// Completion of the published chapters of one course for `caller`.
pub async fn course_progress(
    pool: &SqlitePool,
    caller: &str,
    course_id: &str,
) -> Result<CourseProgress> {
    let course = courses::load_authorized(pool, Some(caller), course_id, Action::Read).await?;
    let counts = counts(pool, caller, &course.id).await?;

    Ok(CourseProgress {
        course_id: course.id,
        total_chapters: counts.total,
        completed_chapters: counts.completed,
        percentage: percentage(counts.completed, counts.total),
    })
}

/// Every published course the caller has started, split by whether all of
/// its published chapters are done.
pub async fn dashboard(pool: &SqlitePool, caller: &str) -> Result<Dashboard> {
    let started = sqlx::query_as::<_, Course>(
        r#"
        SELECT DISTINCT c.*
        FROM courses c
        JOIN chapters ch ON ch.course_id = c.id
        JOIN user_progress p ON p.chapter_id = ch.id
        WHERE p.user_id = ? AND p.is_completed = 1
            AND c.is_published = 1 AND ch.is_published = 1
        ORDER BY c.title ASC
        "#,
    )
    .bind(caller)
    .fetch_all(pool)
    .await?;

    let mut dashboard = Dashboard::default();
    for course in started {
        let counts = counts(pool, caller, &course.id).await?;
        let progress = CourseProgress {
            course_id: course.id.clone(),
            total_chapters: counts.total,
            completed_chapters: counts.completed,
            percentage: percentage(counts.completed, counts.total),
        };

        let entry = DashboardEntry { course, progress };
        if counts.total > 0 && counts.completed >= counts.total {
            dashboard.completed.push(entry);
        } else {
            dashboard.in_progress.push(entry);
        }
    }
    Ok(dashboard)
}

async fn counts(pool: &SqlitePool, user_id: &str, course_id: &str) -> Result<Counts> {
    let counts = sqlx::query_as::<_, Counts>(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(p.id) AS completed
        FROM chapters ch
        LEFT JOIN user_progress p
            ON p.chapter_id = ch.id AND p.user_id = ? AND p.is_completed = 1
        WHERE ch.course_id = ? AND ch.is_published = 1
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(pool)
    .await?;
    Ok(counts)
}
