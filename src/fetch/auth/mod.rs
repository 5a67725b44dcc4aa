//! Request decorators that add credentials or scoping to a feed request.

mod url_param;

pub use url_param::UrlParam;
