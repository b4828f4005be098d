//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream, RetryPolicy},
};
use futures_util::TryStreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("dj-usb/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based HTTP client implementation
///
/// There is no client-wide total timeout: song downloads can legitimately
/// take minutes, so every request carries its own bound through
/// `HttpRequest::timeout` and streams are bounded by their reader.
pub struct ReqwestHttpClient {
    client: Client,
    default_policy: RetryPolicy,
}

impl ReqwestHttpClient {
    /// Create a client that performs a single attempt per request.
    pub fn new() -> Self {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    /// Create a client with a custom connection-establishment timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(4)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default reqwest client");
                Client::new()
            });

        Self::with_client(client)
    }

    /// Wrap a preconfigured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            default_policy: RetryPolicy::none(),
        }
    }

    /// Policy used by [`HttpClient::execute`].
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    fn map_transport_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::OperationFailed("Request timed out".to_string())
        } else if e.is_connect() {
            BridgeError::NotAvailable(format!("Connection failed: {}", e))
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }

    fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }

    async fn execute_with_retry_internal(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < max_attempts {
            debug!(
                attempt = attempt + 1,
                max_attempts,
                url = %request.url,
                "Executing HTTP request"
            );

            match self.build_request(request.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if (status >= 500 || status == 429) && attempt + 1 < max_attempts {
                        warn!(status, attempt = attempt + 1, "Retryable HTTP status");
                        last_error = Some(BridgeError::OperationFailed(format!(
                            "HTTP {} error",
                            status
                        )));
                    } else {
                        let headers = Self::collect_headers(response.headers());
                        let body = response.bytes().await.map_err(Self::map_transport_error)?;

                        return Ok(HttpResponse {
                            status,
                            headers,
                            body,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt + 1, "HTTP request failed");
                    last_error = Some(Self::map_transport_error(e));
                }
            }

            attempt += 1;

            if attempt < max_attempts {
                let delay = policy.delay_for(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
                sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::OperationFailed("All retry attempts exhausted".to_string())
        }))
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, self.default_policy.clone())
            .await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        self.execute_with_retry_internal(request, policy).await
    }

    async fn download_stream(&self, request: HttpRequest) -> Result<HttpStream> {
        // The per-request timeout would also cut off the body, so it is
        // applied to the response headers only.
        let header_timeout = request.timeout;
        let url = request.url.clone();
        let pending = self
            .build_request(HttpRequest {
                timeout: None,
                ..request
            })
            .send();

        let response = match header_timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                BridgeError::OperationFailed(format!("Timed out waiting for {}", url))
            })?,
            None => pending.await,
        }
        .map_err(Self::map_transport_error)?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        debug!(%url, status, ?content_length, "Opened download stream");

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(HttpStream {
            status,
            content_length,
            reader: Box::new(reader),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = ReqwestHttpClient::new();
        assert_eq!(client.default_policy.max_attempts, 1);

        let client = client.with_retry_policy(RetryPolicy::default());
        assert_eq!(client.default_policy.max_attempts, 3);
    }

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Post),
            reqwest::Method::POST
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Delete),
            reqwest::Method::DELETE
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_reported() {
        let client = ReqwestHttpClient::with_connect_timeout(Duration::from_millis(200));
        let request = HttpRequest::get("http://127.0.0.1:9/songs")
            .timeout(Duration::from_millis(500));

        assert!(client.execute(request).await.is_err());
    }
}
