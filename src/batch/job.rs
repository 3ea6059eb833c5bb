//! Batch job data model and recipient partitioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NotifierError, Result};
use crate::state_machine::BatchStatus;

/// One person to notify. An empty or missing contact field skips that channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Recipient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn email_address(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn phone_number(&self) -> Option<&str> {
        non_blank(self.phone.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The test a test notification refers to.
///
/// SMS links use the short human-facing code to stay within message length;
/// email links use the internal record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReference {
    pub short_code: String,
    pub record_id: String,
    pub title: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
}

impl TestReference {
    pub fn new(
        short_code: impl Into<String>,
        record_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            short_code: short_code.into(),
            record_id: record_id.into(),
            title: title.into(),
            starts_at: None,
            duration_minutes: None,
        }
    }
}

/// What a job sends to each recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    Credentials,
    EmailOnly { subject: String, body: String },
    TestNotification(TestReference),
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::EmailOnly { .. } => "email_only",
            Self::TestNotification(_) => "test_notification",
        }
    }

    /// Batch id prefix for this job family
    pub fn id_prefix(&self) -> String {
        match self {
            Self::Credentials => "credentials_".to_string(),
            Self::EmailOnly { .. } => "email_".to_string(),
            Self::TestNotification(test) => format!("test_{}_", test.record_id),
        }
    }
}

/// Running per-channel totals for a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResults {
    pub sms_queued: u64,
    pub sms_failed: u64,
    pub email_queued: u64,
    pub email_failed: u64,
    pub total_processed: u64,
}

impl BatchResults {
    pub fn merge(&mut self, other: &BatchResults) {
        self.sms_queued += other.sms_queued;
        self.sms_failed += other.sms_failed;
        self.email_queued += other.email_queued;
        self.email_failed += other.email_failed;
        self.total_processed += other.total_processed;
    }
}

/// A notification campaign split into time-spaced sub-batches
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub batch_id: String,
    pub kind: NotificationKind,
    pub sub_batches: Vec<Vec<Recipient>>,
    pub current_sub_batch_index: usize,
    pub interval: Duration,
    pub status: BatchStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub results: BatchResults,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl BatchJob {
    pub fn new(
        batch_id: String,
        kind: NotificationKind,
        recipients: Vec<Recipient>,
        batch_size: usize,
        interval: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let sub_batches = partition(recipients, batch_size)?;
        Ok(Self {
            batch_id,
            kind,
            sub_batches,
            current_sub_batch_index: 0,
            interval,
            status: BatchStatus::Pending,
            retry_count: 0,
            max_retries,
            results: BatchResults::default(),
            created_at: Utc::now(),
            last_processed_at: None,
            finished_at: None,
            last_error: None,
        })
    }

    pub fn total_sub_batches(&self) -> usize {
        self.sub_batches.len()
    }

    pub fn total_recipients(&self) -> usize {
        self.sub_batches.iter().map(Vec::len).sum()
    }

    /// Pending and either never processed or spaced at least one interval
    /// past the last dispatch
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != BatchStatus::Pending {
            return false;
        }
        match self.last_processed_at {
            None => true,
            Some(last) => elapsed_since(last, now) >= self.interval,
        }
    }

    /// Processing for longer than `timeout`
    pub fn is_stalled(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.status == BatchStatus::Processing
            && self
                .last_processed_at
                .is_some_and(|last| elapsed_since(last, now) > timeout)
    }

    pub fn snapshot(&self) -> BatchStatusSnapshot {
        let total = self.total_sub_batches();
        let progress_percent = if total == 0 {
            100.0
        } else {
            self.current_sub_batch_index as f64 / total as f64 * 100.0
        };
        BatchStatusSnapshot {
            batch_id: self.batch_id.clone(),
            notification_kind: self.kind.as_str().to_string(),
            status: self.status,
            current_sub_batch_index: self.current_sub_batch_index,
            total_sub_batches: total,
            total_recipients: self.total_recipients(),
            progress_percent,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            interval_seconds: self.interval.as_secs(),
            results: self.results,
            created_at: self.created_at,
            last_processed_at: self.last_processed_at,
            finished_at: self.finished_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time view of a job for status endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatusSnapshot {
    pub batch_id: String,
    pub notification_kind: String,
    pub status: BatchStatus,
    pub current_sub_batch_index: usize,
    pub total_sub_batches: usize,
    pub total_recipients: usize,
    pub progress_percent: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub interval_seconds: u64,
    pub results: BatchResults,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Split recipients into contiguous groups of at most `size`, preserving order
pub fn partition(recipients: Vec<Recipient>, size: usize) -> Result<Vec<Vec<Recipient>>> {
    if size == 0 {
        return Err(NotifierError::InvalidInput(
            "batch size must be greater than zero".to_string(),
        ));
    }
    let mut groups = Vec::with_capacity(recipients.len().div_ceil(size));
    let mut iter = recipients.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(size).collect());
    }
    Ok(groups)
}

pub(crate) fn elapsed_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or_default()
}
