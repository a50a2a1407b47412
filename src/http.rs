use std::time::Duration;

use wreq::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER},
    Client,
};
use wreq_util::{Emulation, EmulationOS, EmulationOption};

use crate::error::{PersonaError, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// HTTP client with a browser-like request signature.
///
/// Wiki farms and the enhancement sources serve degraded or blocked pages to
/// obvious bots, so every outbound request goes through a TLS-emulating
/// client with ordinary browser headers.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));

        let emulation = EmulationOption::builder()
            .emulation(Emulation::Chrome143)
            .emulation_os(EmulationOS::Windows)
            .build();

        let client = Client::builder()
            .emulation(emulation)
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PersonaError::NetworkError(e.to_string()))?;

        Ok(Self { client })
    }

    /// Fetch a page body as text. Non-2xx statuses are errors: callers in
    /// the scrape/enhance pipeline absorb them into defaults.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(PersonaError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                408 | 504 => PersonaError::Timeout(format!("HTTP {}", status)),
                _ => PersonaError::NetworkError(format!("HTTP {}", status)),
            });
        }

        response
            .text()
            .await
            .map_err(|e| PersonaError::NetworkError(e.to_string()))
    }

    /// Fetch and deserialize a JSON body.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| PersonaError::InvalidJson(e.to_string()))
    }
}
