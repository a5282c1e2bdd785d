//! Cell endpoint URL resolution.
//!
//! The mapping table stores each tenant's cell as a URL of the form
//! `https://<hostname>/<path>`. The router splits it into the origin
//! hostname and origin path it rewrites requests to.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEndpoint {
    pub hostname: String,
    pub port: Option<u16>,
    /// Origin path without a trailing slash. Empty for a bare host.
    pub path: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid cell endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported cell endpoint scheme: {0}")]
    UnsupportedScheme(String),
    #[error("cell endpoint has no hostname: {0}")]
    MissingHost(String),
}

impl CellEndpoint {
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(raw.trim()).map_err(|e| EndpointError::InvalidUrl(format!("{raw}: {e}")))?;
        if url.scheme() != "https" {
            return Err(EndpointError::UnsupportedScheme(url.scheme().to_string()));
        }
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(raw.to_string()))?
            .to_string();

        let path = url.path().trim_end_matches('/').to_string();

        Ok(Self {
            hostname,
            port: url.port(),
            path,
        })
    }

    /// Render back to the URL form stored in the mapping table.
    pub fn to_url(&self) -> String {
        match self.port {
            Some(port) => format!("https://{}:{}{}", self.hostname, port, self.path),
            None => format!("https://{}{}", self.hostname, self.path),
        }
    }
}

impl std::fmt::Display for CellEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_path() {
        let ep = CellEndpoint::parse("https://cell-a.example.com/app").unwrap();
        assert_eq!(ep.hostname, "cell-a.example.com");
        assert_eq!(ep.path, "/app");
        assert_eq!(ep.port, None);
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let ep = CellEndpoint::parse("https://abc123.execute-api.us-east-1.amazonaws.com/prod/").unwrap();
        assert_eq!(ep.hostname, "abc123.execute-api.us-east-1.amazonaws.com");
        assert_eq!(ep.path, "/prod");
    }

    #[test]
    fn bare_host_has_empty_path() {
        let ep = CellEndpoint::parse("https://cell-b.example.com").unwrap();
        assert_eq!(ep.path, "");
        assert_eq!(ep.to_url(), "https://cell-b.example.com");
    }

    #[test]
    fn keeps_explicit_port() {
        let ep = CellEndpoint::parse("https://cell-c.example.com:8443/v1").unwrap();
        assert_eq!(ep.port, Some(8443));
        assert_eq!(ep.to_url(), "https://cell-c.example.com:8443/v1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            CellEndpoint::parse("not a url"),
            Err(EndpointError::InvalidUrl(_))
        ));
        assert!(matches!(
            CellEndpoint::parse("http://cell.example.com/x"),
            Err(EndpointError::UnsupportedScheme(_))
        ));
    }
}
