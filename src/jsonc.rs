//! Comment-tolerant JSON
//!
//! Worker configs are JSONC: `//` and `/* */` comments plus trailing commas.
//! The text is normalized to plain JSON in one pass and handed to serde_json.

use serde_json::Value;

/// Strip comments and trailing commas, leaving string contents untouched.
///
/// Comments are replaced by whitespace (newlines kept) so serde_json error
/// positions still point at the right line.
pub fn strip(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    // Index in `out` of a comma that may turn out to be trailing
    let mut pending_comma: Option<usize> = None;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => {
                pending_comma = None;
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                chars.next();
                out.push_str("  ");
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                    out.push(' ');
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str("  ");
                let mut prev = '\0';
                for c in chars.by_ref() {
                    out.push(if c == '\n' { '\n' } else { ' ' });
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ',' => {
                pending_comma = Some(out.len());
                out.push(ch);
            }
            '}' | ']' => {
                if let Some(idx) = pending_comma.take() {
                    out.replace_range(idx..idx + 1, " ");
                }
                out.push(ch);
            }
            c if c.is_whitespace() => out.push(c),
            c => {
                pending_comma = None;
                out.push(c);
            }
        }
    }

    out
}

/// Parse JSONC text into a value
pub fn parse(input: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(&strip(input))
}
