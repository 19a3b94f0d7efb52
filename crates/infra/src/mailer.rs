//! Outgoing mail.
//!
//! SMTP delivery is not part of this service; `LogMailer` writes each message
//! to the log, and `MemoryMailer` keeps them for inspection.

use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
        tracing::info!(to = %message.to, subject = %message.subject, body = %message.body, "mail");
        Ok(())
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// The most recent message addressed to `to`.
    pub fn last_to(&self, to: &str) -> Option<MailMessage> {
        self.sent().into_iter().rev().find(|m| m.to == to)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("mailbox lock poisoned"))?
            .push(message);
        Ok(())
    }
}

/// The six-digit code embedded in a verification mail body.
pub fn extract_code(body: &str) -> Option<String> {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 6)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_mailer_keeps_messages_in_order() {
        let mailer = MemoryMailer::new();
        for body in ["first 111111", "second 222222"] {
            mailer
                .send(MailMessage {
                    to: "a@b.io".into(),
                    subject: "code".into(),
                    body: body.into(),
                })
                .await
                .unwrap();
        }
        let last = mailer.last_to("a@b.io").unwrap();
        assert_eq!(extract_code(&last.body).as_deref(), Some("222222"));
        assert_eq!(mailer.sent().len(), 2);
    }
}
