//! Markdown removal for plain-prose reports
//!
//! Removed marker classes:
//! - ATX headings (`#` to `######` at line start)
//! - Thematic breaks (`---`, `***`, `___` lines)
//! - Blockquote markers (`>` at line start)
//! - Bullet list markers (`-`, `*`, `+`) and numbered list markers (`1.`, `1)`)
//! - Bold and italic emphasis with `*` or `_`
//! - Inline code backticks
//!
//! The text inside a marker is always kept.

use once_cell::sync::Lazy;
use regex::Regex;

static THEMATIC_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*([-*_])([ \t]*[-*_]){2,}[ \t]*$").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").unwrap());
static BLOCKQUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+").unwrap());
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d{1,3}[.)][ \t]+").unwrap());
static BOLD_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*\n]+?)\*\*").unwrap());
static BOLD_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__([^_\n]+?)__").unwrap());
static ITALIC_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*").unwrap());
// Underscores inside words (snake_case) are left alone
static ITALIC_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\w])_([^_\s](?:[^_\n]*[^_\s])?)_([^\w]|$)").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+)`").unwrap());

/// Strip markdown structure from `text`, keeping the prose.
pub fn strip_markdown(text: &str) -> String {
    // Breaks first, or `* * *` would be read as a bullet
    let text = THEMATIC_BREAK.replace_all(text, "");
    let text = HEADING.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = NUMBERED.replace_all(&text, "");
    let text = BOLD_STAR.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORE.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = strip_underscore_italics(text.into_owned());
    INLINE_CODE.replace_all(&text, "$1").into_owned()
}

// Each match consumes the boundary after its closing `_`, so adjacent spans
// (`_one_ _two_`) need another pass
fn strip_underscore_italics(mut text: String) -> String {
    loop {
        let next = ITALIC_UNDERSCORE
            .replace_all(&text, "${1}${2}${3}")
            .into_owned();
        if next == text {
            return text;
        }
        text = next;
    }
}

/// Whitespace-delimited word count
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
