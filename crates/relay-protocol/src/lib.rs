//! Relay Protocol - Wire lines exchanged with relay clients
//!
//! The protocol is plain UTF-8 text, one message per `\n`-terminated line:
//! - client to server: a display name, then free-form message lines
//! - server to client: join announcements, chat lines, leave announcements

pub mod line;
pub mod message;
pub mod name;

pub use line::{strip_line_ending, LINE_DELIMITER};
pub use message::{ParseError, ServerLine, JOINED_MARKER, LEFT_MARKER};
pub use name::DisplayName;
