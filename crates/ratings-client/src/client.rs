// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP client for the ratings API.
//!
//! One request per call, no pagination. Each attempt is bounded by a timeout
//! and the whole call can be aborted through a [`CancellationToken`]. Retries
//! are opt-in via [`ClientConfig::max_retries`].

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::establishment::{Establishment, EstablishmentsResponse};
use crate::error::FetchError;
use crate::features::FeatureCollection;

/// Public endpoint of the UK food hygiene ratings API
pub const DEFAULT_BASE_URL: &str = "https://api.ratings.food.gov.uk";

/// Value of the mandatory `x-api-version` header
pub const DEFAULT_API_VERSION: &str = "2";

/// Configuration for [`RatingsClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme and host, without trailing slash.
    pub base_url: String,
    /// Sent as `x-api-version`.
    pub api_version: String,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Extra attempts after the first failure. Zero means single-shot.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(15),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Async client for `GET /Establishments`.
#[derive(Debug, Clone)]
pub struct RatingsClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RatingsClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// URL for establishments near `(longitude, latitude)`.
    pub fn establishments_url(&self, longitude: f64, latitude: f64) -> String {
        format!(
            "{}/Establishments?longitude={}&latitude={}",
            self.config.base_url.trim_end_matches('/'),
            longitude,
            latitude
        )
    }

    /// Fetch establishments near the given coordinate.
    pub async fn fetch_establishments(
        &self,
        longitude: f64,
        latitude: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Establishment>, FetchError> {
        let url = self.establishments_url(longitude, latitude);
        let mut attempt = 0;
        let mut backoff = self.config.retry_backoff;

        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.attempt(&url) => result,
            };

            match result {
                Ok(establishments) => {
                    info!("Fetched {} establishments", establishments.len());
                    return Ok(establishments);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "Establishment fetch failed ({}), retry {}/{} in {:?}",
                        e, attempt, self.config.max_retries, backoff
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(FetchError::Cancelled),
                        () = sleep(backoff) => {}
                    }
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch and shape the result into a feature collection.
    pub async fn load_feature_collection(
        &self,
        longitude: f64,
        latitude: f64,
        cancel: &CancellationToken,
    ) -> Result<FeatureCollection, FetchError> {
        let establishments = self.fetch_establishments(longitude, latitude, cancel).await?;
        Ok(FeatureCollection::from_establishments(&establishments))
    }

    async fn attempt(&self, url: &str) -> Result<Vec<Establishment>, FetchError> {
        debug!("GET {}", url);

        let request = async {
            let response = self
                .http
                .get(url)
                .header("x-api-version", &self.config.api_version)
                .header("accept", "application/json")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let body = response.bytes().await?;
            let parsed: EstablishmentsResponse = serde_json::from_slice(&body)?;
            Ok(parsed.establishments)
        };

        match timeout(self.config.request_timeout, request).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FetchError::Timeout(self.config.request_timeout)),
        }
    }
}

impl Default for RatingsClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve the canned responses in order, one per connection, and report
    /// each raw request head.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::UnboundedReceiver<String>, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_task = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                hits_task.fetch_add(1, Ordering::SeqCst);

                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());

                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), rx, hits)
    }

    fn client(base_url: String, max_retries: u32) -> RatingsClient {
        RatingsClient::new(ClientConfig {
            base_url,
            max_retries,
            retry_backoff: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    const TWO_PLACES: &str = r#"{"establishments":[
        {"BusinessName":"Golden Dragon","RatingValue":"5","geocode":{"longitude":"-0.1277","latitude":"51.5073"}},
        {"BusinessName":"Chip Shop","RatingValue":"3","geocode":{"longitude":-1.5491,"latitude":53.8008}}
    ]}"#;

    #[test]
    fn test_establishments_url() {
        let client = client("https://example.test/".to_string(), 0);
        assert_eq!(
            client.establishments_url(-0.5, 51.25),
            "https://example.test/Establishments?longitude=-0.5&latitude=51.25"
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_version_header_and_parses() {
        let (base, mut requests, _) = serve(vec![(200, TWO_PLACES)]).await;
        let client = client(base, 0);

        let features = client
            .load_feature_collection(-0.1277, 51.5073, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(features.len(), 2);
        assert_eq!(features.features[0].properties.title, "Golden Dragon");
        assert_eq!(features.features[1].properties.rating, "3");

        let request = requests.recv().await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /establishments?longitude=-0.1277&latitude=51.5073 "));
        assert!(request.contains("x-api-version: 2"));
    }

    #[tokio::test]
    async fn test_empty_result() {
        let (base, _, _) = serve(vec![(200, r#"{"establishments":[]}"#)]).await;
        let features = client(base, 0)
            .load_feature_collection(0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap();
        assert!(features.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_body_is_decode_error() {
        let (base, _, _) = serve(vec![(200, "<html>maintenance</html>")]).await;
        let err = client(base, 2)
            .fetch_establishments(0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (base, _, hits) = serve(vec![(503, "{}"), (200, TWO_PLACES)]).await;
        let establishments = client(base, 1)
            .fetch_establishments(0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(establishments.len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_when_disabled() {
        let (base, _, hits) = serve(vec![(503, "{}"), (200, TWO_PLACES)]).await;
        let err = client(base, 0)
            .fetch_establishments(0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client("http://127.0.0.1:9".to_string(), 3)
            .fetch_establishments(0.0, 0.0, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }
}
