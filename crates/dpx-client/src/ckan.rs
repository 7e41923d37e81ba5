use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dpx_core::error::AppError;
use dpx_core::models::{Package, Portal};
use dpx_core::{CatalogClient, CatalogClientFactory, HttpConfig};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::debug;

/// Generic wrapper for CKAN API responses.
///
/// CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
///
/// CKAN always returns responses with the structure:
/// ```json
/// {
///     "success": bool,
///     "result": T
/// }
/// ```
/// On failure `result` is absent and `error` describes the problem.
#[derive(Deserialize, Debug)]
struct CkanResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<Value>,
}

/// `package_search` result payload.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SearchResult {
    count: u64,
    results: Vec<Package>,
    facets: BTreeMap<String, BTreeMap<String, u64>>,
}

/// `status_show` result payload.
#[derive(Deserialize, Debug)]
struct StatusResult {
    #[serde(default)]
    extensions: Vec<String>,
}

/// HTTP client for interacting with one CKAN open data portal.
///
/// Paging parameter names come from the [`Portal`] definition, since some
/// portals proxy `package_search` behind non-standard names.
///
/// # Examples
///
/// ```no_run
/// use dpx_client::CkanClient;
/// use dpx_core::{CatalogClient, Portal};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let portal = Portal::new("uk", "https://ckan.publishing.service.gov.uk", "theme-primary");
/// let client = CkanClient::new(&portal)?;
/// println!("{} packages", client.count_packages().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanClient {
    client: Client,
    base_url: Url,
    portal: Arc<Portal>,
    http: HttpConfig,
}

impl CkanClient {
    /// Creates a new CKAN client with the default HTTP settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidPortalUrl` if the portal URL is malformed.
    pub fn new(portal: &Portal) -> Result<Self, AppError> {
        Self::with_config(portal, HttpConfig::default())
    }

    /// Creates a new CKAN client with explicit HTTP settings.
    pub fn with_config(portal: &Portal, http: HttpConfig) -> Result<Self, AppError> {
        // `join` drops the last path segment unless the base ends with '/'
        let mut raw = portal.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url =
            Url::parse(&raw).map_err(|_| AppError::InvalidPortalUrl(portal.base_url.clone()))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidPortalUrl(portal.base_url.clone()));
        }

        let client = Client::builder()
            .user_agent(concat!("dpx/", env!("CARGO_PKG_VERSION")))
            .timeout(http.timeout)
            .build()
            .map_err(|e| AppError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            portal: Arc::new(portal.clone()),
            http,
        })
    }

    /// Returns the normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the portal this client talks to.
    pub fn portal(&self) -> &Portal {
        &self.portal
    }

    fn action_url(&self, action: &str, params: &[(&str, String)]) -> Result<Url, AppError> {
        let mut url = self
            .base_url
            .join(&format!("api/3/action/{}", action))
            .map_err(|e| AppError::InvalidPortalUrl(e.to_string()))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Calls a CKAN action and unwraps the response envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<T, AppError> {
        let url = self.action_url(action, params)?;
        debug!(portal = %self.portal.id, %url, "CKAN request");

        let resp = self.request_with_retry(&url).await?;
        let body = resp.bytes().await.map_err(|e| map_transport_error(&e, &self.http))?;

        let ckan_resp: CkanResponse<T> = serde_json::from_slice(&body).map_err(|e| {
            AppError::RemoteApi(format!("Malformed {} response from {}: {}", action, url, e))
        })?;

        if !ckan_resp.success {
            let detail = ckan_resp
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no details".to_string());
            return Err(AppError::RemoteApi(format!(
                "CKAN {} returned success: false ({})",
                action, detail
            )));
        }

        ckan_resp.result.ok_or(AppError::EmptyResponse)
    }

    /// Makes an HTTP GET request with automatic retry on transient failures.
    ///
    /// Retries on:
    /// - Connection errors and timeouts
    /// - Server errors (5xx)
    /// - Rate limiting (429), with exponential backoff
    async fn request_with_retry(&self, url: &Url) -> Result<reqwest::Response, AppError> {
        let attempts = self.http.max_retries.max(1);
        let base_delay = self.http.retry_base_delay;
        let mut last_error = AppError::Generic("No attempts made".to_string());

        for attempt in 1..=attempts {
            match self.client.get(url.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        return Ok(resp);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = AppError::RateLimitExceeded;
                        if attempt < attempts {
                            sleep(base_delay * 2_u32.pow(attempt)).await;
                            continue;
                        }
                        break;
                    }

                    if status.is_server_error() {
                        last_error = AppError::RemoteApi(format!(
                            "Server error: HTTP {} from {}",
                            status.as_u16(),
                            url
                        ));
                        if attempt < attempts {
                            sleep(base_delay * attempt).await;
                            continue;
                        }
                        break;
                    }

                    // Client error (4xx except 429) - don't retry
                    return Err(AppError::RemoteApi(format!(
                        "HTTP {} from {}",
                        status.as_u16(),
                        url
                    )));
                }
                Err(e) => {
                    last_error = map_transport_error(&e, &self.http);
                    if attempt < attempts && last_error.is_retryable() {
                        sleep(base_delay * attempt).await;
                        continue;
                    }
                    break;
                }
            }
        }

        Err(last_error)
    }

    async fn search(&self, params: Vec<(&str, String)>) -> Result<SearchResult, AppError> {
        self.call("package_search", &params).await
    }
}

/// Maps a reqwest transport error onto the pipeline's error kinds.
pub(crate) fn map_transport_error(e: &reqwest::Error, http: &HttpConfig) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(http.timeout.as_secs())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        AppError::Connection(e.to_string())
    } else if e.is_decode() {
        AppError::RemoteApi(e.to_string())
    } else {
        AppError::Connection(e.to_string())
    }
}

impl CatalogClient for CkanClient {
    async fn count_packages(&self) -> Result<u64, AppError> {
        let result = self.search(vec![("rows", "0".to_string())]).await?;
        Ok(result.count)
    }

    async fn search_packages(&self, offset: u64, page_size: u64) -> Result<Vec<Package>, AppError> {
        let params = vec![
            (self.portal.offset_param.as_str(), offset.to_string()),
            (self.portal.limit_param.as_str(), page_size.to_string()),
        ];
        let result = self.search(params).await?;
        Ok(result.results)
    }

    async fn facet_counts(&self, facet_field: &str) -> Result<BTreeMap<String, u64>, AppError> {
        let params = vec![
            ("rows", "0".to_string()),
            ("facet.field", format!("[\"{}\"]", facet_field)),
            ("facet.limit", "-1".to_string()),
        ];
        let mut result = self.search(params).await?;
        // A portal without the facet field answers with no entry at all
        Ok(result.facets.remove(facet_field).unwrap_or_default())
    }

    async fn extensions(&self) -> Result<BTreeSet<String>, AppError> {
        let status: StatusResult = self.call("status_show", &[]).await?;
        Ok(status.extensions.into_iter().collect())
    }
}

/// Builds one [`CkanClient`] per portal, sharing HTTP settings.
#[derive(Debug, Clone, Default)]
pub struct CkanClientFactory {
    http: HttpConfig,
}

impl CkanClientFactory {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

impl CatalogClientFactory for CkanClientFactory {
    type Client = CkanClient;

    fn create(&self, portal: &Portal) -> Result<Self::Client, AppError> {
        CkanClient::with_config(portal, self.http.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(url: &str) -> Portal {
        Portal::new("test", url, "theme")
    }

    #[test]
    fn test_new_with_valid_url() {
        let client = CkanClient::new(&portal("https://dati.gov.it")).unwrap();
        assert_eq!(client.base_url().as_str(), "https://dati.gov.it/");
    }

    #[test]
    fn test_new_keeps_path_prefix() {
        let client = CkanClient::new(&portal("https://example.org/data")).unwrap();
        let url = client.action_url("status_show", &[]).unwrap();
        assert_eq!(url.as_str(), "https://example.org/data/api/3/action/status_show");
    }

    #[test]
    fn test_new_with_invalid_url() {
        let result = CkanClient::new(&portal("not-a-valid-url"));
        assert!(matches!(result, Err(AppError::InvalidPortalUrl(_))));

        let result = CkanClient::new(&portal("ftp://example.org"));
        assert!(matches!(result, Err(AppError::InvalidPortalUrl(_))));
    }

    #[test]
    fn test_action_url_encodes_params() {
        let client = CkanClient::new(&portal("https://example.org")).unwrap();
        let url = client
            .action_url(
                "package_search",
                &[("facet.field", "[\"tags\"]".to_string()), ("rows", "0".to_string())],
            )
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("facet.field".to_string(), "[\"tags\"]".to_string()));
        assert_eq!(pairs[1], ("rows".to_string(), "0".to_string()));
    }

    #[test]
    fn test_ckan_response_deserialization() {
        let json = r#"{
            "success": true,
            "result": {"count": 2, "results": [{"id": "a", "name": "a"}, {"id": "b", "name": "b"}]}
        }"#;

        let response: CkanResponse<SearchResult> = serde_json::from_str(json).unwrap();
        assert!(response.success);
        let result = response.result.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.results.len(), 2);
        assert!(result.facets.is_empty());
    }

    #[test]
    fn test_ckan_error_response_deserialization() {
        let json = r#"{
            "success": false,
            "error": {"__type": "Validation Error", "rows": ["Must be a natural number"]}
        }"#;

        let response: CkanResponse<SearchResult> = serde_json::from_str(json).unwrap();
        assert!(!response.success);
        assert!(response.result.is_none());
        assert!(response.error.is_some());
    }

    #[test]
    fn test_status_result_without_extensions() {
        let status: StatusResult = serde_json::from_str(r#"{"ckan_version": "2.9.5"}"#).unwrap();
        assert!(status.extensions.is_empty());
    }

    #[test]
    fn test_factory_uses_portal_url() {
        let factory = CkanClientFactory::default();
        let client = factory.create(&portal("https://example.org")).unwrap();
        assert_eq!(client.portal().id, "test");
    }
}
