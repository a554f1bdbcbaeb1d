use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::feed::post::{Enclosure, Post};
use crate::util::{strip_control_chars, summarize};

/// Default upper bound on `Post::summary`, in characters.
pub const DEFAULT_SUMMARY_CHARS: usize = 200;

/// Errors raised while turning a feed document into posts.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),
    /// The document is XML but neither RSS nor Atom.
    #[error("Unrecognized feed format: {0}")]
    Format(String),
}

/// Parses an RSS 2.0 or Atom document into normalized posts.
///
/// RSS is read with a streaming reader so that raw values survive untouched:
/// `pubDate` stays a string and a missing `<guid>` can be told apart from a
/// present one. Atom documents go through `feed-rs`.
///
/// Entries whose guid repeats an earlier entry in the same document are dropped.
pub fn parse_feed(bytes: &[u8], summary_chars: usize) -> Result<Vec<Post>, ParseError> {
    let posts = match root_element(bytes)?.as_str() {
        "feed" => parse_atom(bytes, summary_chars)?,
        _ => parse_rss(bytes, summary_chars)?,
    };

    let mut seen = HashSet::with_capacity(posts.len());
    let total = posts.len();
    let unique: Vec<Post> = posts
        .into_iter()
        .filter(|p| seen.insert(p.guid.clone()))
        .collect();

    if unique.len() < total {
        tracing::debug!(
            dropped = total - unique.len(),
            "Dropped entries with duplicate guids"
        );
    }

    Ok(unique)
}

/// Returns the local name of the document element.
fn root_element(bytes: &[u8]) -> Result<String, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(ParseError::Format("document has no root element".into())),
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    PubDate,
    DcDate,
    Creator,
    Author,
    Encoded,
    Description,
    Guid,
    Category,
}

impl Field {
    fn from_tag(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"pubDate" => Some(Field::PubDate),
            b"dc:date" => Some(Field::DcDate),
            b"dc:creator" => Some(Field::Creator),
            b"author" => Some(Field::Author),
            b"content:encoded" => Some(Field::Encoded),
            b"description" => Some(Field::Description),
            b"guid" => Some(Field::Guid),
            b"category" => Some(Field::Category),
            _ => None,
        }
    }
}

/// Raw values collected for one `<item>` before normalization.
#[derive(Debug, Default)]
struct RawItem {
    title: Option<String>,
    link: Option<String>,
    pub_date: Option<String>,
    dc_date: Option<String>,
    creator: Option<String>,
    author: Option<String>,
    encoded: Option<String>,
    description: Option<String>,
    guid: Option<String>,
    categories: Vec<String>,
    enclosure: Option<Enclosure>,
}

impl RawItem {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
            Field::DcDate => &mut self.dc_date,
            Field::Creator => &mut self.creator,
            Field::Author => &mut self.author,
            Field::Encoded => &mut self.encoded,
            Field::Description => &mut self.description,
            Field::Guid => &mut self.guid,
            Field::Category => {
                let tag = value.trim();
                if !tag.is_empty() {
                    self.categories.push(clean(tag));
                }
                return;
            }
        };
        // First occurrence wins
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn into_post(self, summary_chars: usize) -> Post {
        let title = self.title.as_deref().map(clean).unwrap_or_default();
        let link = self.link.as_deref().map(|l| l.trim().to_string()).unwrap_or_default();
        let published_at = non_blank(self.pub_date)
            .or(non_blank(self.dc_date))
            .map(|d| d.trim().to_string())
            .unwrap_or_default();
        let author = non_blank(self.creator)
            .or(non_blank(self.author))
            .map(|a| clean(&a))
            .unwrap_or_default();

        let summary_source = self.description.as_deref().or(self.encoded.as_deref());
        let summary = summary_source
            .map(|html| clean(&summarize(html, summary_chars)))
            .unwrap_or_default();
        let content = self.encoded.or(self.description).unwrap_or_default();

        let guid = generate_guid(self.guid.as_deref(), &link, &title, &published_at);

        Post {
            title,
            link,
            published_at,
            author,
            content,
            summary,
            guid,
            categories: self.categories,
            enclosure: self.enclosure,
        }
    }
}

fn parse_rss(bytes: &[u8], summary_chars: usize) -> Result<Vec<Post>, ParseError> {
    // quick-xml 0.37 never expands <!ENTITY> declarations; only the five XML
    // builtins and character references are resolved by `unescape()`.
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    let mut posts = Vec::new();
    let mut item: Option<RawItem> = None;
    let mut field: Option<(Field, Vec<u8>)> = None;
    let mut text = String::new();
    let mut saw_channel = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.name();
                match name.as_ref() {
                    b"channel" => saw_channel = true,
                    b"item" => item = Some(RawItem::default()),
                    b"enclosure" => {
                        if let Some(item) = item.as_mut() {
                            item.enclosure = item.enclosure.take().or(read_enclosure(&e));
                        }
                    }
                    tag if item.is_some() && field.is_none() => {
                        if let Some(f) = Field::from_tag(tag) {
                            field = Some((f, tag.to_vec()));
                            text.clear();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"enclosure" {
                    if let Some(item) = item.as_mut() {
                        item.enclosure = item.enclosure.take().or(read_enclosure(&e));
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let unescaped = t.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(c)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == b"item" {
                    if let Some(done) = item.take() {
                        posts.push(done.into_post(summary_chars));
                    }
                    field = None;
                } else if let Some((f, tag)) = field.as_ref() {
                    if name.as_ref() == tag.as_slice() {
                        if let Some(item) = item.as_mut() {
                            item.set(*f, std::mem::take(&mut text));
                        }
                        field = None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_channel {
        return Err(ParseError::Format("expected an RSS <channel> or Atom <feed>".into()));
    }

    Ok(posts)
}

fn read_enclosure(e: &BytesStart<'_>) -> Option<Enclosure> {
    let mut url = None;
    let mut mime_type = String::new();

    for attr in e.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            tracing::warn!("Skipping enclosure attribute with invalid escape");
            continue;
        };
        match attr.key.as_ref() {
            b"url" => url = Some(value.trim().to_string()),
            b"type" => mime_type = value.trim().to_string(),
            _ => {}
        }
    }

    url.filter(|u| !u.is_empty())
        .map(|url| Enclosure { url, mime_type })
}

fn parse_atom(bytes: &[u8], summary_chars: usize) -> Result<Vec<Post>, ParseError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| ParseError::Format(e.to_string()))?;

    let posts = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry.title.map(|t| clean(&t.content)).unwrap_or_default();
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            let author = entry
                .authors
                .first()
                .map(|p| clean(&p.name))
                .unwrap_or_default();
            let body = entry.content.and_then(|c| c.body);
            let summary_html = entry.summary.map(|s| s.content);
            let summary = summary_html
                .as_deref()
                .or(body.as_deref())
                .map(|html| clean(&summarize(html, summary_chars)))
                .unwrap_or_default();
            let enclosure = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| {
                    c.url.as_ref().map(|url| Enclosure {
                        url: url.to_string(),
                        mime_type: c
                            .content_type
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_default(),
                    })
                });
            let categories = entry
                .categories
                .into_iter()
                .map(|c| clean(&c.term))
                .filter(|t| !t.is_empty())
                .collect();
            let guid = generate_guid(Some(&entry.id), &link, &title, &published_at);

            Post {
                title,
                link,
                published_at,
                author,
                content: body.or(summary_html).unwrap_or_default(),
                summary,
                guid,
                categories,
                enclosure,
            }
        })
        .collect();

    Ok(posts)
}

/// Explicit identifier when present, else the link, else a digest of the
/// title and date so the guid is never empty.
fn generate_guid(existing: Option<&str>, link: &str, title: &str, published_at: &str) -> String {
    if let Some(guid) = existing.map(str::trim).filter(|g| !g.is_empty()) {
        return guid.to_string();
    }
    if !link.is_empty() {
        return link.to_string();
    }

    let hash = Sha256::digest(format!("{}|{}", title, published_at).as_bytes());
    format!("{:x}", hash)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn clean(s: &str) -> String {
    strip_control_chars(s.trim()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SUBSTACK_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/" version="2.0">
  <channel>
    <title><![CDATA[Shiroko's Notes]]></title>
    <link>https://shirokokun.substack.com</link>
    <item>
      <title><![CDATA[My Top 5 Principles for Clean UI Design]]></title>
      <description><![CDATA[Simplicity &amp; focus. <b>Always</b>.]]></description>
      <link>https://shirokokun.substack.com/p/clean-ui</link>
      <guid isPermaLink="false">https://shirokokun.substack.com/p/clean-ui-guid</guid>
      <dc:creator><![CDATA[Swastik Gupta]]></dc:creator>
      <pubDate>Sat, 26 Jul 2025 14:03:00 GMT</pubDate>
      <enclosure url="https://substackcdn.com/image/cover.jpg" length="0" type="image/jpeg"/>
      <content:encoded><![CDATA[<p>Full <em>body</em> here</p>]]></content:encoded>
      <category>design</category>
      <category>ui</category>
    </item>
    <item>
      <title>Why Manual Mode is a Game Changer</title>
      <description>Taking control &amp; telling stories.</description>
      <link>https://shirokokun.substack.com/p/manual-mode</link>
      <author>someone@example.com</author>
      <pubDate>Sun, 20 Jul 2025 09:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_substack_items() {
        let posts = parse_feed(SUBSTACK_RSS.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts.len(), 2);

        let first = &posts[0];
        assert_eq!(first.title, "My Top 5 Principles for Clean UI Design");
        assert_eq!(first.link, "https://shirokokun.substack.com/p/clean-ui");
        assert_eq!(first.published_at, "Sat, 26 Jul 2025 14:03:00 GMT");
        assert_eq!(first.author, "Swastik Gupta");
        assert_eq!(first.content, "<p>Full <em>body</em> here</p>");
        assert_eq!(first.summary, "Simplicity & focus. Always.");
        assert_eq!(first.categories, vec!["design".to_string(), "ui".to_string()]);
        assert_eq!(
            first.enclosure,
            Some(Enclosure {
                url: "https://substackcdn.com/image/cover.jpg".into(),
                mime_type: "image/jpeg".into(),
            })
        );
    }

    #[test]
    fn test_explicit_guid_is_used() {
        let posts = parse_feed(SUBSTACK_RSS.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts[0].guid, "https://shirokokun.substack.com/p/clean-ui-guid");
    }

    #[test]
    fn test_missing_guid_falls_back_to_link() {
        let posts = parse_feed(SUBSTACK_RSS.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts[1].guid, posts[1].link);
    }

    #[test]
    fn test_author_falls_back_and_content_uses_description() {
        let posts = parse_feed(SUBSTACK_RSS.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        let second = &posts[1];
        assert_eq!(second.author, "someone@example.com");
        assert_eq!(second.content, "Taking control & telling stories.");
        assert!(second.categories.is_empty());
        assert_eq!(second.enclosure, None);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let rss = r#"<rss version="2.0"><channel><item><description>only text</description></item></channel></rss>"#;
        let posts = parse_feed(rss.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "");
        assert_eq!(posts[0].link, "");
        assert_eq!(posts[0].author, "");
        assert_eq!(posts[0].published_at, "");
        // No guid and no link: digest keeps the identifier non-empty
        assert_eq!(posts[0].guid.len(), 64);
    }

    #[test]
    fn test_blank_guid_ignored() {
        let rss = r#"<rss><channel><item><guid>   </guid><link>https://e.com/a</link></item></channel></rss>"#;
        let posts = parse_feed(rss.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts[0].guid, "https://e.com/a");
    }

    #[test]
    fn test_duplicate_guids_keep_first() {
        let rss = r#"<rss><channel>
            <item><guid>same</guid><title>First</title></item>
            <item><guid>same</guid><title>Second</title></item>
            <item><guid>other</guid><title>Third</title></item>
        </channel></rss>"#;
        let posts = parse_feed(rss.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        let titles: Vec<_> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Third"]);
    }

    #[test]
    fn test_summary_is_bounded() {
        let long = "lorem ipsum ".repeat(100);
        let rss = format!(
            "<rss><channel><item><guid>1</guid><description>{long}</description></item></channel></rss>"
        );
        let posts = parse_feed(rss.as_bytes(), 50).unwrap();
        assert!(posts[0].summary.chars().count() <= 50);
        assert!(posts[0].summary.ends_with("..."));
        // Content keeps the full body
        assert_eq!(posts[0].content, long);
    }

    #[test]
    fn test_control_chars_stripped_from_title() {
        let rss = "<rss><channel><item><guid>1</guid><title>Hi\u{1b}[31m there</title></item></channel></rss>";
        let posts = parse_feed(rss.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts[0].title, "Hi there");
    }

    #[test]
    fn test_empty_channel_yields_no_posts() {
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
        assert!(parse_feed(rss.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap().is_empty());
    }

    #[test]
    fn test_html_document_is_format_error() {
        let html = "<html><body><p>Rate limited</p></body></html>";
        assert!(matches!(
            parse_feed(html.as_bytes(), DEFAULT_SUMMARY_CHARS),
            Err(ParseError::Format(_))
        ));
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let broken = "<rss><channel><item><title>oops</item></channel></rss>";
        assert!(parse_feed(broken.as_bytes(), DEFAULT_SUMMARY_CHARS).is_err());
    }

    #[test]
    fn test_not_xml_is_error() {
        assert!(parse_feed(b"", DEFAULT_SUMMARY_CHARS).is_err());
    }

    #[test]
    fn test_parse_atom_feed() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <id>urn:uuid:feed</id>
  <updated>2025-07-26T14:03:00Z</updated>
  <entry>
    <title>Atom Post</title>
    <link href="https://example.com/atom-post"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2025-07-26T14:03:00Z</updated>
    <author><name>Jane</name></author>
    <summary>Short &lt;b&gt;summary&lt;/b&gt;</summary>
    <category term="atom"/>
  </entry>
</feed>"#;
        let posts = parse_feed(atom.as_bytes(), DEFAULT_SUMMARY_CHARS).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Atom Post");
        assert_eq!(posts[0].link, "https://example.com/atom-post");
        assert_eq!(posts[0].guid, "urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a");
        assert_eq!(posts[0].author, "Jane");
        assert_eq!(posts[0].summary, "Short summary");
        assert_eq!(posts[0].categories, vec!["atom".to_string()]);
        assert!(posts[0].published_at.starts_with("2025-07-26T14:03:00"));
    }
}
