//! Lines sent from the relay to its clients.

use std::fmt;

use thiserror::Error;

use crate::name::DisplayName;

/// Marker prefixing a join announcement.
pub const JOINED_MARKER: &str = "🟢";

/// Marker prefixing a leave announcement.
pub const LEFT_MARKER: &str = "🔴";

const JOINED_SUFFIX: &str = " joined the chat";
const LEFT_SUFFIX: &str = " left the chat";
const CHAT_SEPARATOR: &str = ": ";

/// A line generated by the relay.
///
/// The `Display` impl renders the exact wire text without the trailing
/// delimiter. Rendered lines are never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// A client joined
    Joined {
        /// Name of the joining client
        name: String,
    },

    /// A client sent a message
    Chat {
        /// Name of the sender
        name: String,
        /// Message text, without line ending
        text: String,
    },

    /// A client left
    Left {
        /// Name of the departing client
        name: String,
    },
}

impl ServerLine {
    /// Creates a join announcement.
    pub fn joined(name: &DisplayName) -> Self {
        Self::Joined {
            name: name.to_string(),
        }
    }

    /// Creates a chat line.
    pub fn chat(name: &DisplayName, text: &str) -> Self {
        Self::Chat {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    /// Creates a leave announcement.
    pub fn left(name: &DisplayName) -> Self {
        Self::Left {
            name: name.to_string(),
        }
    }

    /// Parses a line received from the relay (line ending already stripped).
    ///
    /// Announcements are recognised by marker and suffix first; anything
    /// else is split at the first `": "`. A sender whose name itself
    /// contains `": "` is therefore split early.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if let Some(name) = announcement_name(line, JOINED_MARKER, JOINED_SUFFIX) {
            return Ok(Self::Joined {
                name: name.to_string(),
            });
        }

        if let Some(name) = announcement_name(line, LEFT_MARKER, LEFT_SUFFIX) {
            return Ok(Self::Left {
                name: name.to_string(),
            });
        }

        match line.split_once(CHAT_SEPARATOR) {
            Some((name, text)) => Ok(Self::Chat {
                name: name.to_string(),
                text: text.to_string(),
            }),
            None => Err(ParseError::Unrecognized(line.to_string())),
        }
    }
}

fn announcement_name<'a>(line: &'a str, marker: &str, suffix: &str) -> Option<&'a str> {
    line.strip_prefix(marker)?
        .strip_prefix(' ')?
        .strip_suffix(suffix)
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined { name } => write!(f, "{JOINED_MARKER} {name}{JOINED_SUFFIX}"),
            Self::Chat { name, text } => write!(f, "{name}{CHAT_SEPARATOR}{text}"),
            Self::Left { name } => write!(f, "{LEFT_MARKER} {name}{LEFT_SUFFIX}"),
        }
    }
}

/// Errors from parsing relay lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unrecognized relay line: {0:?}")]
    Unrecognized(String),
}
