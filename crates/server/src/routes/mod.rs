pub mod auth;
pub mod chapters;
pub mod courses;
pub mod media;

use serde::{Deserialize, Serialize};

/// Plain acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
