use std::fmt;

use thiserror::Error;
use url::Url;

use crate::util::{validate_url, UrlValidationError};

/// Placeholder replaced by the percent-encoded feed URL in relay templates.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Query parameter carrying the per-attempt cache buster.
pub const CACHE_BUST_PARAM: &str = "t";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay template '{0}' has no {{url}} placeholder")]
    MissingPlaceholder(String),
    #[error("Relay template '{template}' does not expand to a valid URL: {source}")]
    InvalidUrl {
        template: String,
        #[source]
        source: UrlValidationError,
    },
}

/// An intermediary the feed is fetched through.
///
/// `Direct` requests the feed URL itself. `Template` is a relay endpoint such
/// as `https://api.allorigins.win/raw?url={url}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relay {
    Direct,
    Template(String),
}

impl Relay {
    /// Parses a relay entry from configuration: `direct` or a template URL.
    ///
    /// Templates are expanded against a placeholder target and validated so a
    /// typo surfaces at startup rather than as a failed attempt.
    pub fn parse(entry: &str, allow_local: bool) -> Result<Self, RelayError> {
        let entry = entry.trim();
        if entry.eq_ignore_ascii_case("direct") {
            return Ok(Relay::Direct);
        }
        if !entry.contains(URL_PLACEHOLDER) {
            return Err(RelayError::MissingPlaceholder(entry.to_string()));
        }

        let probe = entry.replace(URL_PLACEHOLDER, "https%3A%2F%2Fexample.com%2Ffeed");
        validate_url(&probe, allow_local).map_err(|source| RelayError::InvalidUrl {
            template: entry.to_string(),
            source,
        })?;

        Ok(Relay::Template(entry.to_string()))
    }

    /// Builds the URL for one attempt.
    ///
    /// `bust` is appended to the feed URL as `t=<bust>` before it is wrapped,
    /// so neither the relay nor any cache in between can serve a stale copy.
    pub fn request_url(&self, feed_url: &Url, bust: i64) -> String {
        let mut target = feed_url.clone();
        target
            .query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &bust.to_string());

        match self {
            Relay::Direct => target.into(),
            Relay::Template(template) => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(target.as_str().as_bytes()).collect();
                template.replace(URL_PLACEHOLDER, &encoded)
            }
        }
    }

    /// Host used to identify the relay in logs.
    pub fn label(&self) -> String {
        match self {
            Relay::Direct => "direct".to_string(),
            Relay::Template(template) => Url::parse(&template.replace(URL_PLACEHOLDER, ""))
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned))
                .unwrap_or_else(|| template.clone()),
        }
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relay::Direct => f.write_str("direct"),
            Relay::Template(template) => f.write_str(template),
        }
    }
}
