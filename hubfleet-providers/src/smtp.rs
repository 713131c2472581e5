use crate::Notifier;
use anyhow::Result;
use async_trait::async_trait;
use hubfleet_common::Secret;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: Option<String>,
}

impl SmtpConfig {
    /// Load SMTP configuration from environment variables
    pub fn from_env() -> Option<Self> {
        let server = std::env::var("SMTP_SERVER").ok()?;
        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(465);
        let username = std::env::var("SMTP_USERNAME").ok()?;
        let password = std::env::var("SMTP_PASSWORD")
            .ok()
            .or_else(|| {
                // Try reading from file (for secrets)
                std::env::var("SMTP_PASSWORD_FILE")
                    .ok()
                    .and_then(|path| std::fs::read_to_string(path).ok())
                    .map(|s| s.trim().to_string())
            })?;
        let from_email = std::env::var("SMTP_FROM_EMAIL")
            .ok()
            .unwrap_or_else(|| username.clone());
        let from_name = std::env::var("SMTP_FROM_NAME").ok();

        Some(Self {
            server,
            port,
            username,
            password: Secret::new(password),
            from_email,
            from_name,
        })
    }

    fn create_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, EmailError> {
        // Port 465 is implicit TLS, 587 STARTTLS; lettre picks based on the relay builder.
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.server)
            .map_err(|e| EmailError::Transport(e.to_string()))?
            .port(self.port)
            .timeout(Some(Duration::from_secs(30)))
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.expose().clone(),
            ))
            .build();
        Ok(transport)
    }

    fn from_mailbox(&self) -> Result<Mailbox, EmailError> {
        let raw = match &self.from_name {
            Some(name) => format!("{} <{}>", name, self.from_email),
            None => self.from_email.clone(),
        };
        raw.parse()
            .map_err(|_| EmailError::InvalidAddress("from".to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
    #[error("Failed to build email: {0}")]
    Build(String),
    #[error("Failed to create SMTP transport: {0}")]
    Transport(String),
    #[error("Failed to send email: {0}")]
    Send(String),
}

/// A rendered transactional message.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn access_url(slug: &str, base_domain: &str) -> String {
    format!("https://{}.{}", slug, base_domain)
}

pub fn render_welcome(slug: &str, base_domain: &str, login_secret: &Secret<String>) -> Rendered {
    let url = access_url(slug, base_domain);
    let password = login_secret.expose();
    Rendered {
        subject: "Your hub is ready".to_string(),
        text: format!(
            "Your hub is live at {url}\n\nPassword: {password}\n\nChange your password in Settings after logging in.\n"
        ),
        html: format!(
            r#"<p>Your hub is live at <a href="{url}">{url}</a></p><p><strong>Password:</strong> <code>{password}</code></p><p style="color:#555">Change your password in Settings after logging in.</p>"#
        ),
    }
}

/// Human wording for a link lifetime, e.g. "24 hours" or "90 minutes".
fn describe_ttl(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    let (n, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

pub fn render_export_ready(download_url: &str, link_ttl: Duration) -> Rendered {
    let ttl = describe_ttl(link_ttl);
    Rendered {
        subject: "Your data export is ready".to_string(),
        text: format!(
            "Your data export is ready for download:\n\n{download_url}\n\nThis link expires in {ttl}.\n"
        ),
        html: format!(
            r#"<p>Your data export is ready: <a href="{download_url}">Download</a></p><p style="color:#555">This link expires in {ttl}.</p>"#
        ),
    }
}

pub struct SmtpNotifier {
    config: SmtpConfig,
    base_domain: String,
    /// Lifetime of the presigned links the exporter hands out.
    link_ttl: Duration,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig, base_domain: impl Into<String>, link_ttl: Duration) -> Self {
        Self {
            config,
            base_domain: base_domain.into(),
            link_ttl,
        }
    }

    async fn send(&self, to: &str, message: Rendered) -> Result<(), EmailError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|_| EmailError::InvalidAddress("to".to_string()))?;

        let email = Message::builder()
            .from(self.config.from_mailbox()?)
            .to(to_mailbox)
            .subject(message.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(message.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(message.html),
                    ),
            )
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.config
            .create_transport()?
            .send(email)
            .await
            .map_err(|e| EmailError::Send(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_welcome(&self, email: &str, slug: &str, login_secret: &Secret<String>) -> Result<()> {
        self.send(email, render_welcome(slug, &self.base_domain, login_secret))
            .await?;
        tracing::info!(slug, "✉️ welcome email sent");
        Ok(())
    }

    async fn send_export_ready(&self, email: &str, download_url: &str) -> Result<()> {
        self.send(email, render_export_ready(download_url, self.link_ttl)).await?;
        tracing::info!("✉️ export-ready email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_carries_url_and_password() {
        let msg = render_welcome("jane-doe", "hubs.example.com", &Secret::new("abc123".to_string()));
        assert!(msg.text.contains("https://jane-doe.hubs.example.com"));
        assert!(msg.text.contains("Password: abc123"));
        assert!(msg.html.contains(r#"href="https://jane-doe.hubs.example.com""#));
    }

    #[test]
    fn export_ready_links_download() {
        let msg = render_export_ready("https://dl.example/x", Duration::from_secs(24 * 3600));
        assert!(msg.html.contains(r#"<a href="https://dl.example/x">"#));
        assert!(msg.text.contains("expires in 24 hours"));
    }

    #[test]
    fn export_ready_states_configured_lifetime() {
        let msg = render_export_ready("https://dl.example/x", Duration::from_secs(2 * 3600));
        assert!(msg.text.contains("expires in 2 hours"));
        assert!(msg.html.contains("expires in 2 hours"));
        assert!(!msg.text.contains("24 hours"));

        let msg = render_export_ready("https://dl.example/x", Duration::from_secs(90 * 60));
        assert!(msg.text.contains("expires in 90 minutes"));
        assert_eq!(describe_ttl(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_ttl(Duration::from_secs(45)), "45 seconds");
    }

    #[tokio::test]
    async fn rejects_malformed_recipient() {
        let notifier = SmtpNotifier::new(
            SmtpConfig {
                server: "smtp.invalid".to_string(),
                port: 465,
                username: "u".to_string(),
                password: Secret::new("p".to_string()),
                from_email: "noreply@example.com".to_string(),
                from_name: Some("Hubfleet".to_string()),
            },
            "hubs.example.com",
            Duration::from_secs(3600),
        );
        let err = notifier
            .send("not-an-address", render_export_ready("https://x", Duration::from_secs(3600)))
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress(_)));
    }
}
