use anyhow::Context;
use axum::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_activation_mail(&self, to: &str, activation_url: &str) -> anyhow::Result<()>;
}

/// Delivers activation mail over SMTP (STARTTLS).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .context("smtp relay config")?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_activation_mail(&self, to: &str, activation_url: &str) -> anyhow::Result<()> {
        let body = format!(
            "<div>\
               <h1>Confirm your email address</h1>\
               <a href=\"{url}\">{url}</a>\
             </div>",
            url = activation_url
        );
        let email = Message::builder()
            .from(self.from.parse().context("parse from address")?)
            .to(to.parse().context("parse recipient address")?)
            .subject("Activate your account")
            .header(ContentType::TEXT_HTML)
            .body(body)
            .context("build activation mail")?;
        self.transport
            .send(email)
            .await
            .context("smtp send activation mail")?;
        Ok(())
    }
}

/// Fallback when SMTP is not configured: logs the activation URL instead of
/// sending it. Useful for local development.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_activation_mail(&self, to: &str, activation_url: &str) -> anyhow::Result<()> {
        info!(%to, %activation_url, "smtp not configured; activation mail logged only");
        Ok(())
    }
}
