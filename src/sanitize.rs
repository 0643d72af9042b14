use once_cell::sync::Lazy;
use regex::Regex;

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Clean up a model reply for plain-text display.
///
/// Drops every `*` (which covers both `**bold**` and `*italic*` markers),
/// collapses any run of blank or whitespace-only lines into one blank line,
/// and trims the ends.
pub fn sanitize(text: impl AsRef<str>) -> String {
    let without_emphasis = text.as_ref().replace("**", "").replace('*', "");
    let collapsed = BLANK_LINES.replace_all(&without_emphasis, "\n\n");

    collapsed.trim().to_string()
}
