// Outbound transactional email.
//
// Delivery is best-effort from the caller's point of view: account flows log
// a failed send and carry on.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use crate::{config::Config, services::http_client};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()>;
}

/// Posts messages as JSON to a transactional-email HTTP API.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

impl HttpMailer {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        from: String,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.endpoint).json(&SendRequest {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            text: &email.text,
            html: &email.html,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        request.send().await?.error_for_status()?;
        tracing::debug!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them. Used when no mail API
/// is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        tracing::info!(to = %email.to, subject = %email.subject, body = %email.text, "email (not sent)");
        Ok(())
    }
}

pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn Mailer>> {
    match &config.mail_api_url {
        Some(url) => Ok(Arc::new(HttpMailer::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
            Duration::from_secs(config.outbound_timeout_secs),
        )?)),
        None => {
            tracing::warn!("MAIL_API_URL not set, emails will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// Escapes text for interpolation into an HTML body or attribute.
fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn verification_email(to: &str, link: &str) -> OutgoingEmail {
    let href = escape_html(link);
    OutgoingEmail {
        to: to.to_string(),
        subject: "Welcome! Please verify your email".to_string(),
        text: format!("Thank you for registering. Please verify your email:\n\n{link}"),
        html: format!(
            r#"<h2>Welcome to Lectern!</h2>
<p>Thank you for registering. Please click the link below to verify your email:</p>
<p><a href="{href}">Verify email</a></p>
<p>If that doesn't work, copy and paste this link into your browser:</p>
<p>{href}</p>"#
        ),
    }
}

/// `username` may come from an identity provider and is escaped in the HTML.
pub fn welcome_email(to: &str, username: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Thanks for joining Lectern".to_string(),
        text: format!("Hi {username},\n\nThanks for signing up. Happy learning!"),
        html: format!(
            "<p>Hi {},</p><p>Thanks for signing up. Happy learning!</p>",
            escape_html(username)
        ),
    }
}
