//! Channel identifiers and channel-native message types.

pub mod mail;

pub use mail::MailMessage;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A known data-source channel.
///
/// Closed set — parsing an unknown label is an explicit `Unsupported` error
/// rather than an implicit fallback, so every later stage of the pipeline can
/// be total over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Gmail,
    #[serde(rename = "Google_Calendar")]
    GoogleCalendar,
    #[serde(rename = "Google_Drive")]
    GoogleDrive,
    Notion,
    #[serde(rename = "Google_Tasks")]
    GoogleTasks,
}

impl Channel {
    /// The wire label stored in the DB and used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gmail => "Gmail",
            Self::GoogleCalendar => "Google_Calendar",
            Self::GoogleDrive => "Google_Drive",
            Self::Notion => "Notion",
            Self::GoogleTasks => "Google_Tasks",
        }
    }

    /// All known channels, in label order.
    pub fn all() -> &'static [Channel] {
        &[
            Self::Gmail,
            Self::GoogleCalendar,
            Self::GoogleDrive,
            Self::Notion,
            Self::GoogleTasks,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Gmail" => Ok(Self::Gmail),
            "Google_Calendar" => Ok(Self::GoogleCalendar),
            "Google_Drive" => Ok(Self::GoogleDrive),
            "Notion" => Ok(Self::Notion),
            "Google_Tasks" => Ok(Self::GoogleTasks),
            other => Err(ChannelError::Unsupported(other.to_string())),
        }
    }
}
