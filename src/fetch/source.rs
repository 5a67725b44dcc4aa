use async_trait::async_trait;
use bytes::Bytes;

use super::{HttpClient, fetch_bytes};
use crate::error::FetchError;

/// Somewhere a raw vehicle-positions payload can be pulled from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, FetchError>;
}

/// The upstream feed endpoint, reached through any [`HttpClient`].
pub struct HttpFeedSource<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpFeedSource<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<C: HttpClient> FeedSource for HttpFeedSource<C> {
    async fn fetch(&self) -> Result<Bytes, FetchError> {
        fetch_bytes(&self.client, &self.url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[tokio::test]
    async fn test_invalid_url_is_reported() {
        let source = HttpFeedSource::new(BasicClient::new(), "not a url");
        let result = source.fetch().await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
