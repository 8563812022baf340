//! HTTP fetch seam used by the archiver and the stops compiler.
//!
//! [`HttpClient`] keeps the transport swappable in tests; [`UrlParam`] wraps a
//! client and appends an access key as a query parameter, which is how the
//! realtime endpoint authenticates.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Request, Response, StatusCode};
use std::time::Duration;

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// An [`HttpClient`] wrapper that appends an access key as a URL query
/// parameter on every request.
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

/// Issues a GET for `url` and returns the status code and raw body bytes.
///
/// Does not error on non-success statuses; callers that care (the archiver's
/// sentinel detection) inspect the status themselves.
pub async fn fetch_response<C: HttpClient>(client: &C, url: &str) -> Result<(StatusCode, Bytes)> {
    let req = Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    let body = resp.bytes().await?;
    Ok((status, body))
}

/// Issues a GET for `url`, erroring on any non-success status.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes> {
    let (status, body) = fetch_response(client, url).await?;
    if !status.is_success() {
        anyhow::bail!("GET {url} returned status {status}");
    }
    Ok(body)
}
