//! Notification mail.

pub mod smtp;

pub use smtp::SmtpMailer;

use crate::errors::OnboardingResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// A plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl MailMessage {
    /// Creates a message.
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Notification sent for every onboarding application.
    pub fn onboarding_notification(
        to: impl Into<String>,
        project: &str,
        company: &str,
        manager: &str,
    ) -> Self {
        let body = format!(
            "A new onboarding application was received:\n\
             \n\
             Project: {}\n\
             Company: {}\n\
             Manager: {}\n\
             \n\
             Open the onboarding sheet for the full details.\n",
            project, company, manager
        );
        Self::new(to, format!("New onboarding application: {}", project), body)
    }
}

/// Sends mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one message.
    async fn send(&self, message: &MailMessage) -> OnboardingResult<()>;
}

/// Mailer that only logs.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> OnboardingResult<()> {
        info!(to = %message.to, subject = %message.subject, "Notification (no relay configured)");
        Ok(())
    }
}

/// Mailer keeping an outbox in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<MailMessage>>,
}

impl MemoryMailer {
    /// Creates an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<MailMessage> {
        self.outbox.lock().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &MailMessage) -> OnboardingResult<()> {
        self.outbox.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_content() {
        let message =
            MailMessage::onboarding_notification("ops@example.com", "Acme Pay", "Acme Ltd", "Alice");
        assert_eq!(message.subject, "New onboarding application: Acme Pay");
        assert!(message.body.contains("Project: Acme Pay"));
        assert!(message.body.contains("Company: Acme Ltd"));
        assert!(message.body.contains("Manager: Alice"));
    }

    #[test]
    fn test_memory_outbox() {
        let mailer = MemoryMailer::new();
        tokio_test::assert_ok!(tokio_test::block_on(
            mailer.send(&MailMessage::new("a@b.c", "hi", "body"))
        ));
        assert_eq!(mailer.sent().len(), 1);
        tokio_test::assert_ok!(tokio_test::block_on(
            LogMailer.send(&MailMessage::new("a@b.c", "hi", ""))
        ));
    }
}
