use async_trait::async_trait;
use reqwest::{Request, Response};

/// Sends a prepared feed request.
///
/// Decorators such as [`super::auth::UrlParam`] wrap an inner client and
/// rewrite the request before handing it on, so credentials and agency
/// scoping never leak into the scheduler.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
