//! HTTP fetch seam for document handlers.
//!
//! Network access is behind the [`HttpFetch`] trait so handlers can be
//! exercised offline. The default implementation uses `ureq` with a
//! 30-second timeout and the `Accept` header matching the document kind.

use std::io::Read;
use std::time::Duration;

use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum FetchError {
    /// The HTTP request failed or returned a non-success status.
    #[snafu(display("could not fetch {url}"))]
    Request {
        url: String,
        source: Box<ureq::Error>,
    },

    /// The response body could not be read.
    #[snafu(display("could not read response body from {url}"))]
    Body {
        url: String,
        source: std::io::Error,
    },
}

/// Minimal HTTP client interface used by the document handlers.
pub trait HttpFetch {
    /// Fetches a text document, force-decoded as UTF-8.
    fn fetch_text(&self, url: &str) -> Result<String, FetchError>;

    /// Fetches a binary document.
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// `ureq`-backed fetcher with the timeout required by the standard's
/// servers.
#[derive(Debug, Clone)]
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        UreqFetcher {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
        }
    }

    fn read_body(&self, url: &str, accept: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .agent
            .get(url)
            .set("Accept", accept)
            .call()
            .map_err(Box::new)
            .context(RequestSnafu { url })?;
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .context(BodySnafu { url })?;
        Ok(body)
    }
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetch for UreqFetcher {
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let body = self.read_body(url, "text/html")?;
        // Force UTF-8: server charset declarations are unreliable here.
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.read_body(url, "application/pdf")
    }
}
