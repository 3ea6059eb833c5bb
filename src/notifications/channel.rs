use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::info;

use crate::error::NotifierError;

/// Why a single send attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Provider rejected message: {0}")]
    Rejected(String),
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),
}

impl ChannelError {
    pub fn into_notifier_error(self, channel: &str) -> NotifierError {
        NotifierError::ChannelSendFailure {
            channel: channel.to_string(),
            reason: self.to_string(),
        }
    }
}

/// Outbound SMS/email provider.
///
/// Only success or failure is inspected; provider payloads stay behind this
/// boundary.
#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), ChannelError>;

    async fn send_email(&self, address: &str, subject: &str, body: &str)
        -> Result<(), ChannelError>;

    /// Name used in logs
    fn name(&self) -> &'static str {
        "notification_channel"
    }
}

/// Channel that logs every message and reports success
#[derive(Debug, Default)]
pub struct LoggingChannel {
    sms_sent: AtomicU64,
    emails_sent: AtomicU64,
}

impl LoggingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sms_sent(&self) -> u64 {
        self.sms_sent.load(Ordering::Relaxed)
    }

    pub fn emails_sent(&self) -> u64 {
        self.emails_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationChannel for LoggingChannel {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), ChannelError> {
        if phone.trim().is_empty() {
            return Err(ChannelError::InvalidDestination("empty phone".to_string()));
        }
        self.sms_sent.fetch_add(1, Ordering::Relaxed);
        info!(phone = %phone, chars = message.chars().count(), "📱 SMS: {}", message);
        Ok(())
    }

    async fn send_email(&self, address: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        if !address.contains('@') {
            return Err(ChannelError::InvalidDestination(address.to_string()));
        }
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
        info!(
            address = %address,
            subject = %subject,
            body_len = body.len(),
            "📧 EMAIL: queued"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_channel_counts_sends() {
        let channel = LoggingChannel::new();
        channel.send_sms("+15550100", "hello").await.unwrap();
        channel
            .send_email("a@example.edu", "Subject", "Body")
            .await
            .unwrap();

        assert_eq!(channel.sms_sent(), 1);
        assert_eq!(channel.emails_sent(), 1);
    }

    #[tokio::test]
    async fn test_logging_channel_rejects_bad_destinations() {
        let channel = LoggingChannel::new();
        assert!(matches!(
            channel.send_email("not-an-address", "s", "b").await,
            Err(ChannelError::InvalidDestination(_))
        ));
        assert!(channel.send_sms("  ", "hi").await.is_err());
        assert_eq!(channel.sms_sent() + channel.emails_sent(), 0);
    }

    #[test]
    fn test_channel_error_maps_to_send_failure() {
        let err = ChannelError::Unavailable("503".to_string()).into_notifier_error("sms");
        assert_eq!(
            err,
            NotifierError::ChannelSendFailure {
                channel: "sms".to_string(),
                reason: "Provider unavailable: 503".to_string(),
            }
        );
    }
}
