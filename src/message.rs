use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One turn of a conversation: who spoke, what they said, and when.
///
/// Turns are the unit of conversation history carried through the pipeline.
/// The inbound message under processing is held separately on
/// [`ConversationState`](crate::state::ConversationState); `history` holds the
/// prior turns loaded from storage.
///
/// # Examples
///
/// ```
/// use leadflow::message::{Role, Turn};
///
/// let turn = Turn::user("Do you have anything under 300k?");
/// assert_eq!(turn.role, Role::User);
/// assert!(turn.at <= chrono::Utc::now());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    /// Creates a turn with the given role, stamped with the current time.
    #[must_use]
    pub fn new(role: Role, text: &str) -> Self {
        Self {
            role,
            text: text.to_string(),
            at: Utc::now(),
        }
    }

    /// Creates a user turn.
    #[must_use]
    pub fn user(text: &str) -> Self {
        Self::new(Role::User, text)
    }

    /// Creates an assistant turn.
    #[must_use]
    pub fn assistant(text: &str) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Creates a system turn.
    #[must_use]
    pub fn system(text: &str) -> Self {
        Self::new(Role::System, text)
    }

    /// Replaces the timestamp, preserving role and text.
    #[must_use]
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Returns true if this turn was spoken by the given role.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound channel a message arrived on.
///
/// The engine treats channels as opaque tags; adapters map provider webhooks
/// onto these before enqueueing a message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelTag {
    Web,
    Sms,
    WhatsApp,
    Email,
    Other(String),
}

impl std::fmt::Display for ChannelTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelTag::Web => f.write_str("web"),
            ChannelTag::Sms => f.write_str("sms"),
            ChannelTag::WhatsApp => f.write_str("whatsapp"),
            ChannelTag::Email => f.write_str("email"),
            ChannelTag::Other(name) => f.write_str(name),
        }
    }
}
