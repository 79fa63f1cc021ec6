//! Formatting utilities (admin Markdown → Telegram HTML, size/duration labels).

use std::sync::OnceLock;

use regex::Regex;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`\n]+)`").expect("valid regex"))
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*\n]+)\*\*|\*([^*\n]+)\*").expect("valid regex"))
}

fn italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|[^\w])_([^_\n]+)_([^\w]|$)").expect("valid regex"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("valid regex"))
}

/// Convert the Markdown subset admins use in welcome texts to Telegram HTML.
///
/// Supports `**bold**` / `*bold*`, `_italic_`, `` `code` `` and `[text](url)`.
/// Everything else is escaped and passed through.
pub fn markdown_to_html(input: &str) -> String {
    // Pull inline code out first so its contents are never reinterpreted.
    let mut codes = Vec::new();
    let text = inline_code_re()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            codes.push(caps[1].to_string());
            format!("\u{0}{}\u{0}", codes.len() - 1)
        })
        .to_string();

    let mut html = escape_html(&text);
    html = link_re()
        .replace_all(&html, r#"<a href="$2">$1</a>"#)
        .to_string();
    html = bold_re()
        .replace_all(&html, |caps: &regex::Captures<'_>| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("<b>{inner}</b>")
        })
        .to_string();
    html = italic_re()
        .replace_all(&html, "$1<i>$2</i>$3")
        .to_string();

    for (i, code) in codes.iter().enumerate() {
        html = html.replace(
            &format!("\u{0}{i}\u{0}"),
            &format!("<code>{}</code>", escape_html(code)),
        );
    }
    html
}

/// `734003200` → `"700.0 MB"`.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// `125` → `"2 min 5 sec"`.
pub fn format_duration(secs: u64) -> String {
    format!("{} min {} sec", secs / 60, secs % 60)
}
