//! Response views handed to the detector.

use http::HeaderMap;
use url::Url;

/// Borrowed view over a single HTTP-like response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub body: &'a str,
    pub status: u16,
    pub headers: &'a HeaderMap,
    pub url: Option<&'a Url>,
}

impl<'a> ResponseView<'a> {
    pub fn new(body: &'a str, status: u16, headers: &'a HeaderMap) -> Self {
        Self {
            body,
            status,
            headers,
            url: None,
        }
    }

    pub fn with_url(mut self, url: &'a Url) -> Self {
        self.url = Some(url);
        self
    }
}

/// Owned response returned by a retry action.
#[derive(Debug, Clone, Default)]
pub struct CapturedResponse {
    pub body: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub url: Option<Url>,
}

impl CapturedResponse {
    pub fn new(body: impl Into<String>, status: u16) -> Self {
        Self {
            body: body.into(),
            status,
            headers: HeaderMap::new(),
            url: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn view(&self) -> ResponseView<'_> {
        ResponseView {
            body: &self.body,
            status: self.status,
            headers: &self.headers,
            url: self.url.as_ref(),
        }
    }
}
