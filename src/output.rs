//! Rendering of post lists for the terminal and for machine consumers.
use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::{FeedState, Post};
use crate::util::{strip_control_chars, truncate_to_width};

/// Column budget for titles in text output.
pub const TITLE_WIDTH: usize = 78;

/// Writes posts as a human-readable list.
///
/// Each post is its title, a `date • author` line, the summary and the link,
/// separated by a blank line. Feed text is stripped of control characters
/// before it reaches the terminal.
pub fn write_text<W: Write>(out: &mut W, posts: &[Post]) -> io::Result<()> {
    if posts.is_empty() {
        writeln!(out, "No posts.")?;
        return Ok(());
    }

    for (i, post) in posts.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }

        let title = strip_control_chars(&post.title);
        let title = if title.trim().is_empty() {
            "(untitled)".into()
        } else {
            title
        };
        writeln!(out, "{}", truncate_to_width(&title, TITLE_WIDTH))?;

        let date = post.display_date();
        let author = strip_control_chars(&post.author);
        match (date.is_empty(), author.is_empty()) {
            (false, false) => writeln!(out, "  {} • {}", strip_control_chars(&date), author)?,
            (false, true) => writeln!(out, "  {}", strip_control_chars(&date))?,
            (true, false) => writeln!(out, "  {}", author)?,
            (true, true) => {}
        }

        if !post.summary.is_empty() {
            writeln!(out, "  {}", strip_control_chars(&post.summary))?;
        }
        if !post.link.is_empty() {
            writeln!(out, "  {}", strip_control_chars(&post.link))?;
        }
    }
    Ok(())
}

/// One-line status for a state snapshot, e.g. `12 posts (stale): relay down`.
pub fn status_line(state: &FeedState, now: DateTime<Utc>) -> String {
    let mut line = match state.posts.len() {
        1 => "1 post".to_string(),
        n => format!("{n} posts"),
    };

    if let Some(fetched_at) = state.fetched_at {
        let minutes = (now - fetched_at).num_minutes().max(0);
        line.push_str(&format!(", fetched {minutes} min ago"));
    }
    if state.loading {
        line.push_str(", refreshing");
    }
    if let Some(error) = &state.error {
        line.push_str(&format!(" (stale): {error}"));
    }
    if let Some(delay) = state.retry_in {
        line.push_str(&format!(", retrying in {}s", delay.as_secs()));
    }
    line
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    fetched_at: Option<DateTime<Utc>>,
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    posts: &'a [Post],
}

/// Writes posts as a JSON document with fetch metadata.
pub fn write_json<W: Write>(
    out: &mut W,
    posts: &[Post],
    fetched_at: Option<DateTime<Utc>>,
    error: Option<&str>,
) -> io::Result<()> {
    let doc = JsonDocument {
        fetched_at,
        stale: error.is_some(),
        error,
        posts,
    };
    serde_json::to_writer_pretty(&mut *out, &doc)?;
    writeln!(out)
}
