//! Per-recipient delivery for one sub-batch.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::batch::job::{BatchResults, NotificationKind, Recipient};
use crate::notifications::{MessageTemplates, NotificationChannel, RenderedEmail};

/// Sends one sub-batch through the notification channel.
///
/// A failed send only bumps a failure counter; the rest of the sub-batch
/// still goes out.
pub struct SubBatchProcessor {
    channel: Arc<dyn NotificationChannel>,
    templates: MessageTemplates,
}

impl std::fmt::Debug for SubBatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubBatchProcessor")
            .field("channel", &self.channel.name())
            .finish()
    }
}

impl SubBatchProcessor {
    pub fn new(channel: Arc<dyn NotificationChannel>, templates: MessageTemplates) -> Self {
        Self { channel, templates }
    }

    pub async fn process(
        &self,
        batch_id: &str,
        kind: &NotificationKind,
        recipients: &[Recipient],
    ) -> BatchResults {
        let mut results = BatchResults::default();

        for recipient in recipients {
            match kind {
                NotificationKind::Credentials => {
                    let sms = self.templates.credentials_sms(recipient);
                    self.sms(batch_id, recipient, &sms, &mut results).await;
                    let email = self.templates.credentials_email(recipient);
                    self.email(batch_id, recipient, &email, &mut results).await;
                }
                NotificationKind::EmailOnly { subject, body } => {
                    let email = self.templates.email_only(recipient, subject, body);
                    self.email(batch_id, recipient, &email, &mut results).await;
                }
                NotificationKind::TestNotification(test) => {
                    let sms = self.templates.test_sms(recipient, test);
                    self.sms(batch_id, recipient, &sms, &mut results).await;
                    let email = self.templates.test_email(recipient, test);
                    self.email(batch_id, recipient, &email, &mut results).await;
                }
            }
            results.total_processed += 1;
        }

        debug!(
            batch_id = %batch_id,
            recipients = recipients.len(),
            sms_queued = results.sms_queued,
            sms_failed = results.sms_failed,
            email_queued = results.email_queued,
            email_failed = results.email_failed,
            "📨 BATCH: Sub-batch delivered"
        );
        results
    }

    async fn sms(
        &self,
        batch_id: &str,
        recipient: &Recipient,
        message: &str,
        results: &mut BatchResults,
    ) {
        let Some(phone) = recipient.phone_number() else {
            return;
        };
        match self.channel.send_sms(phone, message).await {
            Ok(()) => results.sms_queued += 1,
            Err(e) => {
                results.sms_failed += 1;
                warn!(
                    batch_id = %batch_id,
                    recipient = %recipient.name,
                    error = %e.into_notifier_error("sms"),
                    "SMS send failed"
                );
            }
        }
    }

    async fn email(
        &self,
        batch_id: &str,
        recipient: &Recipient,
        email: &RenderedEmail,
        results: &mut BatchResults,
    ) {
        let Some(address) = recipient.email_address() else {
            return;
        };
        match self
            .channel
            .send_email(address, &email.subject, &email.body)
            .await
        {
            Ok(()) => results.email_queued += 1,
            Err(e) => {
                results.email_failed += 1;
                warn!(
                    batch_id = %batch_id,
                    recipient = %recipient.name,
                    error = %e.into_notifier_error("email"),
                    "Email send failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::job::TestReference;
    use crate::config::NotificationConfig;
    use crate::notifications::ChannelError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sms: Mutex<Vec<(String, String)>>,
        emails: Mutex<Vec<(String, String)>>,
        failing_phone: Option<String>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send_sms(&self, phone: &str, message: &str) -> Result<(), ChannelError> {
            if self.failing_phone.as_deref() == Some(phone) {
                return Err(ChannelError::Rejected("blocked number".to_string()));
            }
            self.sms.lock().push((phone.to_string(), message.to_string()));
            Ok(())
        }

        async fn send_email(&self, address: &str, _subject: &str, body: &str) -> Result<(), ChannelError> {
            self.emails.lock().push((address.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn processor(channel: Arc<RecordingChannel>) -> SubBatchProcessor {
        SubBatchProcessor::new(channel, MessageTemplates::new(&NotificationConfig::default()))
    }

    #[tokio::test]
    async fn test_missing_email_skips_channel_without_error() {
        let channel = Arc::new(RecordingChannel::default());
        let processor = processor(channel.clone());
        let recipients = vec![Recipient::new("Phone Only")
            .with_phone("+15550100")
            .with_credentials("p1", "pw")];

        let results = processor
            .process("credentials_1", &NotificationKind::Credentials, &recipients)
            .await;

        assert_eq!(results.sms_queued, 1);
        assert_eq!(results.email_queued, 0);
        assert_eq!(results.email_failed, 0);
        assert_eq!(results.total_processed, 1);
        assert!(channel.emails.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_counts_and_continues() {
        let channel = Arc::new(RecordingChannel {
            failing_phone: Some("+1000".to_string()),
            ..RecordingChannel::default()
        });
        let processor = processor(channel.clone());
        let test = TestReference::new("QZ7", "rec-42", "Quiz");
        let recipients = vec![
            Recipient::new("a").with_phone("+1000").with_email("a@x.edu"),
            Recipient::new("b").with_phone("+2000").with_email("b@x.edu"),
        ];

        let results = processor
            .process("test_rec-42_1", &NotificationKind::TestNotification(test), &recipients)
            .await;

        assert_eq!(results.sms_failed, 1);
        assert_eq!(results.sms_queued, 1);
        assert_eq!(results.email_queued, 2);
        assert_eq!(results.total_processed, 2);
        assert!(channel.sms.lock()[0].1.contains("/t/QZ7"));
        assert!(channel.emails.lock()[0].1.contains("/tests/rec-42"));
    }

    #[tokio::test]
    async fn test_email_only_never_sends_sms() {
        let channel = Arc::new(RecordingChannel::default());
        let processor = processor(channel.clone());
        let kind = NotificationKind::EmailOnly {
            subject: "Notice".to_string(),
            body: "Hello {name}".to_string(),
        };
        let recipients = vec![Recipient::new("c").with_phone("+3").with_email("c@x.edu")];

        let results = processor.process("email_1", &kind, &recipients).await;
        assert_eq!(results.sms_queued + results.sms_failed, 0);
        assert_eq!(channel.emails.lock()[0].1, "Hello c");
    }
}
