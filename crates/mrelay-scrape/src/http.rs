use std::time::Duration;

use async_trait::async_trait;
use mrelay_core::{
    domain::SubResource,
    errors::Error,
    fetch::{FetchError, PageSource},
    Result,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::debug;

/// Plain GET transport with browser-like headers, a per-request timeout and a
/// cap on how many body bytes one response may carry.
#[derive(Clone, Debug)]
pub struct HttpPageSource {
    http: reqwest::Client,
    max_body: usize,
}

impl HttpPageSource {
    pub fn new(user_agent: &str, timeout: Duration, max_body: usize) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { http, max_body })
    }

    async fn get(&self, url: &str) -> std::result::Result<reqwest::Response, FetchError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::unreachable(format!("GET {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::unreachable(format!("GET {url}: HTTP {status}")));
        }
        Ok(resp)
    }

    /// Read the body, giving up as soon as it exceeds `max_body`.
    async fn read_body(
        &self,
        mut resp: reqwest::Response,
        url: &str,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let cap = self.max_body;
        if let Some(declared) = resp.content_length() {
            if declared > cap as u64 {
                return Err(FetchError::unreachable(format!(
                    "GET {url}: body of {declared} bytes exceeds {cap}"
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| FetchError::unreachable(format!("reading {url}: {e}")))?
        {
            if body.len() + chunk.len() > cap {
                return Err(FetchError::unreachable(format!(
                    "GET {url}: body exceeds {cap} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn get_page(&self, url: &str) -> std::result::Result<String, FetchError> {
        let resp = self.get(url).await?;
        let body = self.read_body(resp, url).await?;
        let html = String::from_utf8_lossy(&body).into_owned();
        debug!(url, bytes = html.len(), "page fetched");
        Ok(html)
    }

    async fn get_resource(&self, url: &str) -> std::result::Result<SubResource, FetchError> {
        let resp = self.get(url).await?;
        let media_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type_of)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let content = self.read_body(resp, url).await?;

        Ok(SubResource {
            locator: url.to_string(),
            content,
            media_type,
        })
    }
}

/// `image/jpeg; charset=binary` -> `image/jpeg`
fn media_type_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
