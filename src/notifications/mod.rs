//! # Notification Channels
//!
//! - [`channel`] - the [`NotificationChannel`] boundary to SMS/email providers
//! - [`templates`] - message bodies for each batch notification kind

pub mod channel;
pub mod templates;

pub use channel::{ChannelError, LoggingChannel, NotificationChannel};
pub use templates::{MessageTemplates, RenderedEmail};
