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

//! Background establishment fetch.
//!
//! The fetch runs on the tokio runtime and hands its result back through a
//! oneshot channel that the UI thread polls once per frame.

use log::debug;
use ratings_client::{FeatureCollection, FetchError, RatingsClient};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::engine::LngLat;

pub type LoadResult = Result<FeatureCollection, FetchError>;

/// Starts establishment fetches for the view.
pub trait EstablishmentLoader {
    fn load(&self, center: LngLat, cancel: CancellationToken) -> PendingLoad;
}

/// Result of a fetch that may still be running.
#[derive(Debug)]
pub struct PendingLoad {
    rx: oneshot::Receiver<LoadResult>,
}

impl PendingLoad {
    pub fn new(rx: oneshot::Receiver<LoadResult>) -> Self {
        Self { rx }
    }

    /// Already completed load.
    pub fn ready(result: LoadResult) -> Self {
        let (tx, rx) = oneshot::channel();
        // Receiver is alive, send cannot fail
        let _ = tx.send(result);
        Self { rx }
    }

    /// Non-blocking check. A dropped sender reads as cancellation.
    pub fn poll(&mut self) -> Option<LoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(FetchError::Cancelled)),
        }
    }
}

/// Loader backed by the ratings API.
#[derive(Debug, Clone)]
pub struct RatingsLoader {
    client: RatingsClient,
    runtime: tokio::runtime::Handle,
    repaint: Option<egui::Context>,
}

impl RatingsLoader {
    pub fn new(client: RatingsClient, runtime: tokio::runtime::Handle) -> Self {
        Self {
            client,
            runtime,
            repaint: None,
        }
    }

    /// Wake the UI when a result arrives.
    #[must_use]
    pub fn with_repaint(mut self, ctx: egui::Context) -> Self {
        self.repaint = Some(ctx);
        self
    }
}

impl EstablishmentLoader for RatingsLoader {
    fn load(&self, center: LngLat, cancel: CancellationToken) -> PendingLoad {
        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let repaint = self.repaint.clone();

        self.runtime.spawn(async move {
            let result = client.load_feature_collection(center.lng, center.lat, &cancel).await;
            if tx.send(result).is_err() {
                debug!("Establishment load finished after the view went away");
            }
            if let Some(ctx) = repaint {
                ctx.request_repaint();
            }
        });

        PendingLoad::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratings_client::ClientConfig;
    use std::time::Duration;

    async fn wait(mut pending: PendingLoad) -> LoadResult {
        for _ in 0..200 {
            if let Some(result) = pending.poll() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("load never completed");
    }

    #[test]
    fn test_ready_load_polls_once() {
        let mut pending = PendingLoad::ready(Ok(FeatureCollection::new()));
        assert!(matches!(pending.poll(), Some(Ok(fc)) if fc.is_empty()));
    }

    #[test]
    fn test_dropped_sender_reads_as_cancelled() {
        let (tx, rx) = oneshot::channel::<LoadResult>();
        let mut pending = PendingLoad::new(rx);
        assert!(pending.poll().is_none());
        drop(tx);
        assert!(matches!(pending.poll(), Some(Err(FetchError::Cancelled))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_cancelled_load_reports_cancelled() {
        let client = RatingsClient::new(ClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            ..ClientConfig::default()
        });
        let loader = RatingsLoader::new(client, tokio::runtime::Handle::current());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = wait(loader.load(LngLat::new(-0.1276, 51.5072), cancel)).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
