use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::{config::Config, services::captcha::CodePurpose};

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailService {
    /// Returns None if SMTP is not fully configured.
    pub fn new(config: &Config) -> Option<Self> {
        let host = config.smtp_host.as_deref()?;
        let username = config.smtp_username.clone()?;
        let password = config.smtp_password.clone()?;
        let from_addr = config.smtp_from.as_deref()?;

        let port = config.smtp_port.unwrap_or(587);
        let creds = Credentials::new(username, password);

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        };

        let address = from_addr.parse().ok()?;
        let from = Mailbox::new(Some(config.app_name.clone()), address);

        Some(Self { transport, from })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    pub async fn send_mail(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        let to: Mailbox = to.parse().context("Invalid recipient address")?;

        let email = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .context("Failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }

    pub async fn send_captcha(&self, to: &str, purpose: CodePurpose, code: &str) -> anyhow::Result<()> {
        let subject = captcha_subject(purpose);
        let html = captcha_html(code, purpose.ttl_secs() / 60);
        self.send_mail(to, subject, &html).await
    }
}

fn captcha_subject(purpose: CodePurpose) -> &'static str {
    match purpose {
        CodePurpose::Register => "Registration verification code",
        CodePurpose::UpdatePassword => "Password change verification code",
        CodePurpose::UpdateUser => "Profile update verification code",
    }
}

fn captcha_html(code: &str, minutes: u64) -> String {
    format!(
        r#"<p>Your verification code is: <strong>{code}</strong></p>
<p>It expires in {minutes} minutes. If you did not request it, ignore this email.</p>"#
    )
}
