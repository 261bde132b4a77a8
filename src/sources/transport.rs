//! Byte transports for artifact downloads.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use crate::core::error::{PipelineError, PipelineResult};

const DEFAULT_USER_AGENT: &str = concat!("kiln/", env!("CARGO_PKG_VERSION"));

/// Something that can turn a URL into bytes.
pub trait Transport {
    /// Retrieve the full body behind `url`.
    fn get(&self, url: &str) -> PipelineResult<Vec<u8>>;
}

/// Transport for `http(s)://` and `file://` URLs.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(user_agent: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(HttpTransport { client })
    }

    fn get_file(&self, url: &Url) -> PipelineResult<Vec<u8>> {
        let path: PathBuf = url
            .to_file_path()
            .map_err(|_| PipelineError::fetch(url.as_str(), "not a local file path"))?;

        std::fs::read(&path).map_err(|e| PipelineError::fetch(url.as_str(), e))
    }

    fn get_http(&self, url: &Url) -> PipelineResult<Vec<u8>> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| PipelineError::fetch(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(url.as_str(), format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .map_err(|e| PipelineError::fetch(url.as_str(), e))?;

        Ok(bytes.to_vec())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|e| PipelineError::fetch(url, e))?;

        match parsed.scheme() {
            "file" => self.get_file(&parsed),
            "http" | "https" => self.get_http(&parsed),
            other => Err(PipelineError::fetch(
                url,
                format!("unsupported URL scheme `{}`", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transport() -> HttpTransport {
        HttpTransport::new(None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_file_url() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"payload").unwrap();

        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(transport().get(url.as_str()).unwrap(), b"payload");
    }

    #[test]
    fn test_missing_file_is_fetch_error() {
        let tmp = TempDir::new().unwrap();
        let url = Url::from_file_path(tmp.path().join("absent")).unwrap();

        let err = transport().get(url.as_str()).unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { .. }));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = transport().get("ftp://example.invalid/x").unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }
}
