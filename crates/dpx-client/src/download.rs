use dpx_core::error::AppError;
use dpx_core::models::FormatFamily;
use dpx_core::table::Table;
use dpx_core::{HttpConfig, TableFetcher};
use reqwest::{Client, Url};
use tracing::debug;

use crate::ckan::map_transport_error;
use crate::tabular::parse_table;

/// Downloads resource payloads over HTTP and parses them into tables.
///
/// Downloads are not retried: a resource that fails once is recorded as
/// failed on the resource itself.
#[derive(Clone)]
pub struct HttpTableFetcher {
    client: Client,
    http: HttpConfig,
}

impl HttpTableFetcher {
    pub fn new(http: HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("dpx/", env!("CARGO_PKG_VERSION")))
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::Connection(e.to_string()))?;
        Ok(Self { client, http })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let parsed = Url::parse(url.trim()).map_err(|_| AppError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidUrl(url.to_string()));
        }

        debug!(%url, "Downloading resource");
        let mut resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, &self.http))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::RemoteApi(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let cap = self.http.max_download_bytes;
        if let Some(declared) = resp.content_length() {
            if declared > cap {
                return Err(oversized(url, cap));
            }
        }

        // Content-Length can be absent or wrong, so the cap is enforced while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| map_transport_error(&e, &self.http))?
        {
            if (bytes.len() + chunk.len()) as u64 > cap {
                return Err(oversized(url, cap));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(AppError::Parse(format!("empty payload from {}", url)));
        }
        Ok(bytes)
    }
}

fn oversized(url: &str, cap: u64) -> AppError {
    AppError::Parse(format!("payload from {} exceeds {} bytes", url, cap))
}

impl TableFetcher for HttpTableFetcher {
    async fn fetch_table(&self, url: &str, family: FormatFamily) -> Result<Table, AppError> {
        let bytes = self.download(url).await?;
        tokio::task::spawn_blocking(move || parse_table(&bytes, family))
            .await
            .map_err(|e| AppError::Generic(format!("parser task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_malformed_url() {
        let fetcher = HttpTableFetcher::new(HttpConfig::default()).unwrap();
        let err = fetcher
            .fetch_table("not a url", FormatFamily::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = HttpTableFetcher::new(HttpConfig::default()).unwrap();
        let err = fetcher
            .fetch_table("file:///etc/passwd", FormatFamily::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidUrl(_)));
    }
}
