pub mod accounts;
pub mod chapters;
pub mod courses;
pub mod identity;
pub mod mailer;
pub mod progress;
pub mod storage;

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// HTTP client for outbound calls, with every request bounded by `timeout`.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}

/// Deserializes a present field, `null` included, as `Some`. Paired with
/// `#[serde(default)]` so an absent field stays `None`.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
