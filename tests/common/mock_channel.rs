use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

use batch_notify::notifications::{ChannelError, NotificationChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub address: String,
    pub subject: String,
    pub body: String,
}

/// Channel that records every send and can be told to fail specific destinations
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sms: Mutex<Vec<(String, String)>>,
    emails: Mutex<Vec<SentEmail>>,
    failing: Mutex<HashSet<String>>,
    send_delay: Option<Duration>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            send_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_destination(&self, destination: &str) {
        self.failing.lock().insert(destination.to_string());
    }

    pub fn sms(&self) -> Vec<(String, String)> {
        self.sms.lock().clone()
    }

    pub fn emails(&self) -> Vec<SentEmail> {
        self.emails.lock().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), ChannelError> {
        self.pause().await;
        if self.failing.lock().contains(phone) {
            return Err(ChannelError::Rejected(format!("{phone} blocked")));
        }
        self.sms.lock().push((phone.to_string(), message.to_string()));
        Ok(())
    }

    async fn send_email(&self, address: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        self.pause().await;
        if self.failing.lock().contains(address) {
            return Err(ChannelError::Unavailable("smtp relay down".to_string()));
        }
        self.emails.lock().push(SentEmail {
            address: address.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
