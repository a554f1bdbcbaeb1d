use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// A normalized feed entry.
///
/// Field values are kept as the feed provided them; only `summary` is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Display title, empty when the entry has none.
    pub title: String,
    /// Canonical URL of the full post.
    pub link: String,
    /// Publication timestamp exactly as it appeared in the feed.
    pub published_at: String,
    /// `dc:creator`, falling back to `author`, else empty.
    pub author: String,
    /// Full HTML body.
    pub content: String,
    /// Plain-text preview with markup removed, bounded in length.
    pub summary: String,
    /// Identifier unique within one fetch and stable across fetches.
    pub guid: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Enclosure>,
}

/// Media attached to a post (typically its cover image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
}

impl Post {
    /// Formats `published_at` for display, e.g. `July 26, 2025`.
    ///
    /// Understands RFC 2822 (RSS `pubDate`), RFC 3339 (Atom, `dc:date`) and
    /// bare `YYYY-MM-DD` dates. Anything else is returned unchanged.
    pub fn display_date(&self) -> String {
        const FORMAT: &str = "%B %-d, %Y";
        let raw = self.published_at.trim();

        if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
            return dt.format(FORMAT).to_string();
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return dt.format(FORMAT).to_string();
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return date.format(FORMAT).to_string();
        }
        raw.to_string()
    }
}
