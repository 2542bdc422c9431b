use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub storage_path: String,
    pub static_dir: String,
    /// Base URL stored media references are built from.
    pub public_url: String,
    /// Base URL of the client application, used in emailed links.
    pub client_url: String,
    pub jwt_secret: String,
    pub google_client_id: Option<String>,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    /// Upper bound on any call to the mail API or identity provider.
    pub outbound_timeout_secs: u64,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let port = parse_or("PORT", 5000);

        Self {
            port,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/lectern.db?mode=rwc".to_string()),
            storage_path: env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/media".to_string()),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| format!("http://localhost:{port}")),
            client_url: env::var("CLIENT_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            google_client_id: non_empty("GOOGLE_CLIENT_ID"),
            mail_api_url: non_empty("MAIL_API_URL"),
            mail_api_key: non_empty("MAIL_API_KEY"),
            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "Lectern <no-reply@lectern.local>".to_string()),
            outbound_timeout_secs: parse_or("OUTBOUND_TIMEOUT_SECS", 10),
            rate_limit_max: parse_or("RATE_LIMIT_MAX", 300),
            rate_limit_window_secs: parse_or("RATE_LIMIT_WINDOW_SECS", 15 * 60),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 512 * 1024 * 1024),
        }
    }

    /// Defaults suitable for tests: in-memory database, no outbound services.
    pub fn for_tests(storage_path: impl Into<String>) -> Self {
        Self {
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            storage_path: storage_path.into(),
            static_dir: "static".to_string(),
            public_url: "http://localhost:5000".to_string(),
            client_url: "http://localhost:5173".to_string(),
            jwt_secret: "test-secret".to_string(),
            google_client_id: None,
            mail_api_url: None,
            mail_api_key: None,
            mail_from: "Lectern <no-reply@lectern.local>".to_string(),
            outbound_timeout_secs: 2,
            rate_limit_max: 10_000,
            rate_limit_window_secs: 60,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {key} value {raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}
