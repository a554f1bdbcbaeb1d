//! Utility functions shared by the parser, configuration and output layers.
//!
//! - **URL validation**: keeps the feed and relay endpoints on HTTP(S) hosts
//! - **Text processing**: HTML-to-text previews, control character stripping
//!   and Unicode-aware truncation for terminal output

mod text;
mod url_validator;

pub use text::{
    display_width, strip_control_chars, strip_html, summarize, truncate_chars,
    truncate_to_width,
};
pub use url_validator::{validate_url, UrlValidationError};
