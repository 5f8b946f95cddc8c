//! HTTP helpers shared by the remote fetchers.
//!
//! All fetchers should use [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so every request gets the
//! same status and body validation. Requests are never retried: a failed
//! page halts the run.
//!
//! # Usage
//!
//! ```ignore
//! // GET with query params
//! let body = http::send_json(client.get(&url).query(&params)).await?;
//!
//! // POST with JSON body
//! let body = http::send_json(client.post(&url).json(&payload)).await?;
//! ```

use std::time::Duration;

use crate::SourceError;

/// Maximum length of the response body preview included in errors.
const BODY_PREVIEW_LEN: usize = 500;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// User-Agent sent with every request.
const USER_AGENT: &str = concat!("planning_etl/", env!("CARGO_PKG_VERSION"));

/// Builds a `reqwest::Client` with the given per-request timeout.
///
/// # Errors
///
/// Returns [`SourceError`] if the client cannot be built.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(Into::into)
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// # Errors
///
/// Returns [`SourceError::Http`] on connection errors and timeouts,
/// [`SourceError::Status`] on any non-2xx status (with a body preview),
/// and [`SourceError::Json`] if the body is not valid JSON.
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, SourceError> {
    let response = request.send().await?;

    let url = response.url().to_string();
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        log::warn!(
            "HTTP {status} from {url}. Response body: {}",
            truncate_for_log(&text, BODY_PREVIEW_LEN)
        );
        return Err(SourceError::Status {
            url,
            status,
            body: truncate_for_log(&text, BODY_PREVIEW_LEN),
        });
    }

    serde_json::from_str(&text).map_err(|e| {
        log::error!(
            "JSON parse failed.\n  \
             url: {url}\n  \
             status: {status}\n  \
             received: {} bytes\n  \
             parse error: {e}\n  \
             body preview: {}",
            text.len(),
            truncate_for_log(&text, BODY_PREVIEW_LEN),
        );
        SourceError::Json(e)
    })
}

/// Truncates a string for logging, appending "..." if it exceeds `max_len`.
#[must_use]
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_are_untouched() {
        assert_eq!(truncate_for_log("ok", 10), "ok");
    }

    #[test]
    fn long_strings_are_cut_on_char_boundary() {
        assert_eq!(truncate_for_log("abcdef", 3), "abc...");
        assert_eq!(truncate_for_log("aé", 2), "a...");
    }
}
