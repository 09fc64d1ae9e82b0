//! Display message types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Conversation role of a display message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Where a display message came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// A message of the raw transcript.
    #[default]
    Transcript,
    /// Synthesized from the `module` field of a values snapshot.
    ValuesModule,
}

/// A transcript entry ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub streaming: bool,
    /// Raw `type` (or `role`) tag of the originating message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub source: MessageSource,
}

impl NormalizedMessage {
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
