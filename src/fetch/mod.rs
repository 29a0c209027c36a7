mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::header::{ACCEPT, HeaderValue, USER_AGENT};
use reqwest::{Method, Request, Response, Url};
use tracing::debug;

/// Issues a GET for `url` and returns the response with its body unread.
///
/// # Errors
///
/// Returns the transport error, or a status error when the upstream answers
/// with a 4xx/5xx.
pub async fn open_feed<C: HttpClient>(client: &C, url: &Url) -> reqwest::Result<Response> {
    let mut req = Request::new(Method::GET, url.clone());
    let headers = req.headers_mut();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("onibus_rio/", env!("CARGO_PKG_VERSION"))),
    );

    let resp = client.execute(req).await?;
    debug!(status = %resp.status(), "Upstream responded");
    resp.error_for_status()
}
