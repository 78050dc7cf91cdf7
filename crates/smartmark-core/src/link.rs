//! Url normalization and the derived display fields of a bookmark.
//!
//! Input without a scheme defaults to `https://`. Only http(s) links with a
//! host are accepted. The stored url is the normalized absolute form; the
//! display host drops a leading `www.` and keys the favicon lookup.

use url::Url;

use crate::bookmark::BookmarkDraft;
use crate::config::LinkConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Url is empty")]
    Empty,

    #[error("Url could not be parsed: {0}")]
    Parse(String),

    #[error("Unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Url has no host: {0}")]
    MissingHost(String),
}

/// Normalize user input into an absolute http(s) url.
pub fn normalize_url(input: &str, config: &LinkConfig) -> Result<Url, LinkError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LinkError::Empty);
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{}://{}", config.default_scheme, trimmed)
    };

    let url = Url::parse(&candidate).map_err(|e| LinkError::Parse(format!("{}: {}", trimmed, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(LinkError::UnsupportedScheme(other.to_string())),
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(LinkError::MissingHost(trimmed.to_string())),
    }
}

/// Host of `url` with a leading `www.` removed.
pub fn display_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

pub fn favicon_url(host: &str, config: &LinkConfig) -> String {
    format!(
        "{}?sz={}&domain={}",
        config.favicon_service, config.favicon_size, host
    )
}

impl BookmarkDraft {
    /// Build a create payload from raw title and url input.
    ///
    /// A blank title falls back to the display host.
    pub fn derive(title: &str, url: &str, config: &LinkConfig) -> Result<Self, LinkError> {
        let url = normalize_url(url, config)?;
        let host = display_host(&url);
        let title = match title.trim() {
            "" => host.clone(),
            t => t.to_string(),
        };
        Ok(Self {
            title,
            favicon: Some(favicon_url(&host, config)),
            url: url.into(),
        })
    }
}
