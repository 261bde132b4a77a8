//! Test utilities and mocks for Kiln unit tests.
//!
//! [`MockTransport`] serves canned responses and counts requests, so tests
//! can assert how many transfers a stage performed.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = MockTransport::new().with_body(url, tarball_bytes);
//! let fetcher = Fetcher::new(cache_dir, &transport);
//! fetcher.fetch(url, &sha)?;
//! assert_eq!(transport.request_count(url), 1);
//! ```

pub mod fixtures;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::error::{PipelineError, PipelineResult};
use crate::sources::transport::Transport;

pub use fixtures::*;

/// Mock HTTP response.
#[derive(Debug, Clone)]
pub struct MockHttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl MockHttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        MockHttpResponse {
            status: 200,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        MockHttpResponse {
            status: 404,
            body: b"Not Found".to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport serving canned responses and recording every request.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: HashMap<String, MockHttpResponse>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    /// Serve `body` with status 200 for `url`.
    pub fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_response(url, MockHttpResponse::ok(body))
    }

    pub fn with_response(mut self, url: &str, response: MockHttpResponse) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    /// Every requested URL, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// How many times `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| *u == url).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests().len()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> PipelineResult<Vec<u8>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        match self.responses.get(url) {
            Some(response) if response.is_success() => Ok(response.body.clone()),
            Some(response) => Err(PipelineError::fetch(url, format!("HTTP {}", response.status))),
            None => Err(PipelineError::fetch(url, "no mock response for URL")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transport_counts_requests() {
        let transport = MockTransport::new()
            .with_body("https://a.invalid/x", b"x".to_vec())
            .with_response("https://a.invalid/gone", MockHttpResponse::not_found());

        assert_eq!(transport.get("https://a.invalid/x").unwrap(), b"x");
        assert!(transport.get("https://a.invalid/gone").is_err());
        assert!(transport.get("https://a.invalid/other").is_err());

        assert_eq!(transport.request_count("https://a.invalid/x"), 1);
        assert_eq!(transport.total_requests(), 3);
    }
}
