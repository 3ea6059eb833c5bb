//! Message bodies for batch notifications.

use crate::batch::job::{Recipient, TestReference};
use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Renders SMS and email content with the portal URL and organization name
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    portal_base_url: String,
    organization_name: String,
}

impl MessageTemplates {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            portal_base_url: config.portal_base_url.trim_end_matches('/').to_string(),
            organization_name: config.organization_name.clone(),
        }
    }

    pub fn credentials_sms(&self, recipient: &Recipient) -> String {
        format!(
            "{}: Hi {}, your login is {} / {}. Sign in at {}",
            self.organization_name,
            recipient.name,
            recipient.username.as_deref().unwrap_or_default(),
            recipient.password.as_deref().unwrap_or_default(),
            self.portal_base_url
        )
    }

    pub fn credentials_email(&self, recipient: &Recipient) -> RenderedEmail {
        RenderedEmail {
            subject: format!("Your {} login credentials", self.organization_name),
            body: format!(
                "Dear {},\n\n\
                 Your account has been created.\n\n\
                 Username: {}\n\
                 Password: {}\n\n\
                 Sign in at {}/login and change your password after the first login.\n\n\
                 Regards,\n{}",
                recipient.name,
                recipient.username.as_deref().unwrap_or_default(),
                recipient.password.as_deref().unwrap_or_default(),
                self.portal_base_url,
                self.organization_name
            ),
        }
    }

    /// Caller-supplied subject and body with `{name}` substituted
    pub fn email_only(&self, recipient: &Recipient, subject: &str, body: &str) -> RenderedEmail {
        RenderedEmail {
            subject: subject.replace("{name}", &recipient.name),
            body: body.replace("{name}", &recipient.name),
        }
    }

    /// Short alert; links by the short test code
    pub fn test_sms(&self, recipient: &Recipient, test: &TestReference) -> String {
        format!(
            "{}: Hi {}, new test \"{}\" is available. Open {}/t/{}",
            self.organization_name,
            recipient.name,
            test.title,
            self.portal_base_url,
            test.short_code
        )
    }

    /// Full notice; links by the internal record id
    pub fn test_email(&self, recipient: &Recipient, test: &TestReference) -> RenderedEmail {
        let schedule = match (test.starts_at, test.duration_minutes) {
            (Some(start), Some(minutes)) => format!(
                "Starts: {}\nDuration: {minutes} minutes\n",
                start.format("%Y-%m-%d %H:%M UTC")
            ),
            (Some(start), None) => format!("Starts: {}\n", start.format("%Y-%m-%d %H:%M UTC")),
            (None, Some(minutes)) => format!("Duration: {minutes} minutes\n"),
            (None, None) => String::new(),
        };
        RenderedEmail {
            subject: format!("New test available: {}", test.title),
            body: format!(
                "Dear {},\n\n\
                 A new test has been assigned to you.\n\n\
                 Test: {}\n{}\n\
                 View the test at {}/tests/{}\n\n\
                 Regards,\n{}",
                recipient.name,
                test.title,
                schedule,
                self.portal_base_url,
                test.record_id,
                self.organization_name
            ),
        }
    }
}
