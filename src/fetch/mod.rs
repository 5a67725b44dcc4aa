//! Feed retrieval over HTTP.
//!
//! [`HttpClient`] is the transport seam; [`auth::UrlParam`] layers query
//! parameters (API key, agency) onto any client. [`FeedSource`] is what the
//! ingestion scheduler pulls payloads from.

mod basic;
mod client;
mod source;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use source::{FeedSource, HttpFeedSource};

use bytes::Bytes;
use tracing::debug;

use crate::error::FetchError;

/// Issues a GET against `url` and returns the body of a successful response.
///
/// # Errors
///
/// [`FetchError::InvalidUrl`] if `url` does not parse, [`FetchError::Status`]
/// for non-2xx responses, [`FetchError::Http`] for transport failures
/// (including client-side timeouts).
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FetchError> {
    let url: reqwest::Url = url
        .parse()
        .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let body = resp.bytes().await?;
    debug!(bytes = body.len(), "Feed body received");
    Ok(body)
}
