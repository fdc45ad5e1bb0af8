//! Scrubbing of free text before it reaches argv or an error message.

/// Longest display string produced by [`sanitize_for_display`].
pub const MAX_DISPLAY_CHARS: usize = 200;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    /// After ESC.
    Escape,
    /// Inside `ESC <intermediates>` waiting for the final byte.
    EscapeIntermediate,
    /// Control sequence (`ESC [` or 8-bit CSI).
    Csi,
    /// Operating system command, terminated by BEL or ST.
    Osc,
    /// DCS/SOS/PM/APC string, terminated by ST.
    Str,
    /// ESC seen inside an OSC or string; `\` completes ST.
    StrEscape,
}

/// Remove terminal escape sequences and neutralise control characters.
///
/// ANSI CSI, OSC, DCS/SOS/PM/APC sequences (7-bit and 8-bit introducers) are
/// dropped entirely. Every other control character except tab, newline and
/// carriage return is replaced with a space.
pub fn sanitize_argument(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut state = State::Normal;

    for ch in input.chars() {
        let mut current = Some(ch);
        while let Some(ch) = current.take() {
            state = match state {
                State::Normal => match ch {
                    '\u{1b}' => State::Escape,
                    '\u{9b}' => State::Csi,
                    '\u{9d}' => State::Osc,
                    '\u{90}' | '\u{98}' | '\u{9e}' | '\u{9f}' => State::Str,
                    '\t' | '\n' | '\r' => {
                        output.push(ch);
                        State::Normal
                    }
                    ch if ch.is_control() => {
                        output.push(' ');
                        State::Normal
                    }
                    ch => {
                        output.push(ch);
                        State::Normal
                    }
                },
                State::Escape => match ch {
                    '[' => State::Csi,
                    ']' => State::Osc,
                    'P' | 'X' | '^' | '_' => State::Str,
                    ' '..='/' => State::EscapeIntermediate,
                    '0'..='~' => State::Normal,
                    _ => {
                        current = Some(ch);
                        State::Normal
                    }
                },
                State::EscapeIntermediate => match ch {
                    ' '..='/' => State::EscapeIntermediate,
                    '0'..='~' => State::Normal,
                    _ => {
                        current = Some(ch);
                        State::Normal
                    }
                },
                State::Csi => match ch {
                    '0'..='?' | ' '..='/' => State::Csi,
                    '@'..='~' => State::Normal,
                    _ => {
                        current = Some(ch);
                        State::Normal
                    }
                },
                State::Osc => match ch {
                    '\u{7}' | '\u{9c}' => State::Normal,
                    '\u{1b}' => State::StrEscape,
                    _ => State::Osc,
                },
                State::Str => match ch {
                    '\u{9c}' => State::Normal,
                    '\u{1b}' => State::StrEscape,
                    _ => State::Str,
                },
                State::StrEscape => match ch {
                    '\\' => State::Normal,
                    _ => {
                        current = Some(ch);
                        State::Escape
                    }
                },
            };
        }
    }

    output
}

/// Single-line, length-capped form of untrusted text for error messages.
pub fn sanitize_for_display(input: &str, max_chars: usize) -> String {
    let cleaned = sanitize_argument(input).replace(['\t', '\n', '\r'], " ");
    let trimmed = cleaned.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut truncated: String = trimmed.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
