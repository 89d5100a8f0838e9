//! Line framing helpers.

/// Delimiter terminating every line on the wire.
pub const LINE_DELIMITER: &str = "\n";

/// Strips one trailing line ending (`\n` or `\r\n`) from a line read off the wire.
///
/// Only the terminator is removed; any other whitespace is part of the message.
pub fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix(LINE_DELIMITER).unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
