//! Outbound email for verification codes and password reset tokens.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::{MailConfig, MailTransportConfig};

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_code(
        &self,
        to_email: &str,
        first_name: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> anyhow::Result<()>;

    async fn send_password_reset(
        &self,
        to_email: &str,
        first_name: &str,
        token: &str,
        ttl_minutes: i64,
    ) -> anyhow::Result<()>;
}

enum MailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct LettreMailer {
    transport: MailTransport,
    sender: Mailbox,
}

impl LettreMailer {
    pub fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let transport = match &config.transport {
            MailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled");
                }
                let builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                        .context("create SMTP transport")?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                };
                MailTransport::Smtp(
                    builder
                        .port(*port)
                        .credentials(Credentials::new(username.clone(), password.clone()))
                        .build(),
                )
            }
            MailTransportConfig::File { dir } => {
                let dir = Path::new(dir);
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create mail dir {}", dir.display()))?;
                MailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(dir))
            }
        };

        let sender = config
            .sender
            .parse::<Mailbox>()
            .with_context(|| format!("parse sender address {:?}", config.sender))?;

        Ok(Self { transport, sender })
    }

    async fn send(&self, to_email: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let to = to_email
            .parse::<Mailbox>()
            .with_context(|| format!("parse recipient {to_email:?}"))?;
        let message = Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email message")?;

        match &self.transport {
            MailTransport::Smtp(smtp) => {
                smtp.send(message).await.context("send SMTP email")?;
            }
            MailTransport::File(file) => {
                file.send(message).await.context("write email file")?;
            }
        }
        Ok(())
    }
}

pub fn verification_body(first_name: &str, code: &str, ttl_minutes: i64) -> String {
    format!(
        "Hello {first_name},\n\n\
         Welcome to Unmask.AI! Please verify your email address by entering the following code:\n\n\
         Verification Code: {code}\n\n\
         This code will expire in {ttl_minutes} minutes.\n\n\
         If you didn't create an account with Unmask.AI, please ignore this email.\n\n\
         Best regards,\nThe Unmask.AI Team\n"
    )
}

pub fn password_reset_body(first_name: &str, token: &str, ttl_minutes: i64) -> String {
    format!(
        "Hello {first_name},\n\n\
         You requested to reset your password for your Unmask.AI account.\n\n\
         Reset Code: {token}\n\n\
         This code will expire in {ttl_minutes} minutes.\n\n\
         If you didn't request a password reset, please ignore this email and your password will remain unchanged.\n\n\
         Best regards,\nThe Unmask.AI Team\n"
    )
}

#[async_trait]
impl Mailer for LettreMailer {
    async fn send_verification_code(
        &self,
        to_email: &str,
        first_name: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> anyhow::Result<()> {
        self.send(
            to_email,
            "Verify your Unmask.AI account",
            verification_body(first_name, code, ttl_minutes),
        )
        .await
    }

    async fn send_password_reset(
        &self,
        to_email: &str,
        first_name: &str,
        token: &str,
        ttl_minutes: i64,
    ) -> anyhow::Result<()> {
        self.send(
            to_email,
            "Reset your Unmask.AI password",
            password_reset_body(first_name, token, ttl_minutes),
        )
        .await
    }
}
