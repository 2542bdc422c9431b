//! Ownership and visibility rules shared by every course, chapter and
//! attachment operation.
//!
//! Handlers never compare owner ids themselves: they describe the record as a
//! [`Resource`] and ask [`authorize`] whether the caller may perform an
//! [`Action`] on it.

use crate::db::models::{Chapter, Course};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read through a path that may also serve anonymous learners.
    Read,
    /// Change the record or add children (chapters, attachments) to it.
    Edit,
    Delete,
}

/// The parts of a record that authorization depends on.
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    pub owner_id: &'a str,
    /// Whether the record is reachable by non-owners. For chapters this is
    /// the chapter's publish flag combined with its course's.
    pub visible: bool,
}

impl<'a> Resource<'a> {
    pub fn course(course: &'a Course) -> Self {
        Self {
            owner_id: &course.user_id,
            visible: course.is_published,
        }
    }

    pub fn chapter(chapter: &Chapter, course: &'a Course) -> Self {
        Self {
            owner_id: &course.user_id,
            visible: course.is_published && chapter.is_published,
        }
    }
}

pub fn can(caller: Option<&str>, action: Action, resource: &Resource<'_>) -> bool {
    let is_owner = caller.is_some_and(|id| id == resource.owner_id);
    match action {
        Action::Read => is_owner || resource.visible,
        Action::Edit | Action::Delete => is_owner,
    }
}

/// Like [`can`], but turns a denial into the error the caller should see.
///
/// Reads and edits of records the caller may not touch are reported as
/// missing so their existence does not leak; explicit deletes report
/// `Forbidden`.
pub fn authorize(
    caller: Option<&str>,
    action: Action,
    resource: &Resource<'_>,
    kind: &str,
) -> Result<()> {
    if can(caller, action, resource) {
        return Ok(());
    }

    match action {
        Action::Delete => Err(AppError::Forbidden(format!(
            "Only the owner can delete this {}",
            kind.to_lowercase()
        ))),
        Action::Read | Action::Edit => Err(AppError::NotFound(format!("{kind} not found"))),
    }
}
