//! Text helpers used when turning feed entries into HTML.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use feed_core::FeedEntry;
use html2text::render::text_renderer::TrivialDecorator;
use regex::Regex;

pub const DATETIME_FORMAT: &str = "%e %B %Y at %H:%M";

fn url_regex() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(http|https)://[a-z0-9]+([\-.][a-z0-9]+)*\.[a-z]{2,5}(:[0-9]{1,5})?(/.*)?$",
        )
        .expect("url pattern compiles")
    })
}

pub fn valid_url(candidate: &str) -> bool {
    url_regex().is_match(candidate)
}

/// Best link for an entry: its id when that is a URL, then its link, then `/`.
pub fn find_url(entry: &FeedEntry) -> &str {
    [entry.id.as_deref(), entry.link.as_deref()]
        .into_iter()
        .flatten()
        .find(|candidate| valid_url(candidate))
        .unwrap_or("/")
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Strips markup and entities from feed-supplied HTML and escapes the result.
pub fn clean(html: &str) -> String {
    let text = html2text::from_read_with_decorator(html.as_bytes(), 10_000, TrivialDecorator::new());
    escape(text.trim())
}

/// Turns a feed key such as `rtl.lu` or `wort_lu-news` into a display title.
pub fn uppercase(key: Option<&str>) -> String {
    let Some(key) = key else {
        return String::new();
    };
    let key = key.replace('.', " ");
    let mut out = String::with_capacity(key.len());
    let mut word_start = true;
    for c in key.chars() {
        if matches!(c, ' ' | '_' | '-') {
            out.push(c);
            word_start = true;
        } else if word_start {
            out.extend(c.to_uppercase());
            word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

pub fn timestamp(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.format(DATETIME_FORMAT).to_string(),
        None => "n.a.".to_owned(),
    }
}

pub fn remove_trailing_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

/// First line of a multi-line text, `None` for single-line text.
pub fn first_line(text: &str) -> Option<&str> {
    text.split_once('\n')
        .map(|(line, _)| line)
        .filter(|line| !line.is_empty())
}

/// Renders tab-indented show notes as a dashed list.
pub fn enumerate(text: &str) -> String {
    text.trim()
        .split("\n\t")
        .map(|item| format!("- {item}\n"))
        .collect()
}
