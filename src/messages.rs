//! One-shot user notifications ("flash messages")
//!
//! Messages are queued on the session and drained by the next page
//! that renders them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::SessionData;

/// Severity of a flash message, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl MessageLevel {
    /// CSS class / tag used when rendering
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Debug => "debug",
            MessageLevel::Info => "info",
            MessageLevel::Success => "success",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        }
    }
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Queue a message on the session.
///
/// Messages below `min_level` are dropped.
pub fn add(
    session: &mut SessionData,
    min_level: MessageLevel,
    level: MessageLevel,
    text: impl Into<String>,
) {
    if level < min_level {
        return;
    }

    session.messages.push(FlashMessage {
        level,
        text: text.into(),
    });
}

/// Take every pending message, leaving the queue empty.
pub fn drain(session: &mut SessionData) -> Vec<FlashMessage> {
    std::mem::take(&mut session.messages)
}
