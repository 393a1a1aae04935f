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

//! Recording engine and canned loader for view tests.

use std::cell::{Cell, RefCell};

use ratings_client::{FeatureCollection, FetchError};
use tokio_util::sync::CancellationToken;

use super::loader::{EstablishmentLoader, LoadResult, PendingLoad};
use crate::engine::{
    CameraOptions, ClusterId, Control, Cursor, EngineError, EventKind, GeoJsonSource, IconImage, LayerSpec,
    LngLat, LngLatBounds, MapEngine, MapEvent, MapOptions, Popup, RenderedFeature, ScreenPoint,
    Subscription, SubscriptionId,
};

#[derive(Debug)]
pub struct FakeEngine {
    pub options: MapOptions,
    pub controls: Vec<Control>,
    pub max_bounds: Option<LngLatBounds>,
    pub resizes: usize,
    pub subscriptions: Vec<Subscription>,
    next_id: u64,
    pub images: Vec<String>,
    pub sources: Vec<(String, GeoJsonSource)>,
    pub layers: Vec<LayerSpec>,
    /// Returned from every `query_rendered_features` call.
    pub rendered: Vec<RenderedFeature>,
    /// `None` makes the expansion query fail.
    pub expansion_zoom: Option<u8>,
    pub expansion_queries: Cell<usize>,
    pub feature_queries: RefCell<Vec<Vec<String>>>,
    pub eases: Vec<CameraOptions>,
    pub center: LngLat,
    pub zoom: f64,
    pub cursor: Cursor,
    pub popups: Vec<Popup>,
    pending: Vec<MapEvent>,
    pub destroyed: bool,
}

impl FakeEngine {
    pub fn new(options: MapOptions) -> Self {
        Self {
            center: options.center,
            zoom: options.zoom,
            options,
            controls: Vec::new(),
            max_bounds: None,
            resizes: 0,
            subscriptions: Vec::new(),
            next_id: 1,
            images: Vec::new(),
            sources: Vec::new(),
            layers: Vec::new(),
            rendered: Vec::new(),
            expansion_zoom: Some(14),
            expansion_queries: Cell::new(0),
            feature_queries: RefCell::new(Vec::new()),
            eases: Vec::new(),
            cursor: Cursor::Default,
            popups: Vec::new(),
            pending: Vec::new(),
            destroyed: false,
        }
    }

    /// Queue an event for every subscription of `kind` bound to `layer`.
    pub fn fire(&mut self, kind: EventKind, layer: Option<&str>, features: Vec<RenderedFeature>) {
        for sub in self.subscriptions.iter().filter(|s| s.kind == kind) {
            if sub.layer.is_some() && sub.layer.as_deref() != layer {
                continue;
            }
            self.pending.push(MapEvent {
                subscription: sub.id,
                kind,
                point: Some(ScreenPoint::new(100.0, 100.0)),
                lng_lat: Some(self.center),
                features: features.clone(),
            });
        }
    }

    pub fn subscribed(&self, kind: EventKind, layer: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.kind == kind && s.layer.as_deref() == Some(layer))
    }
}

impl MapEngine for FakeEngine {
    fn add_control(&mut self, control: Control) {
        self.controls.push(control);
    }

    fn set_max_bounds(&mut self, bounds: LngLatBounds) {
        self.max_bounds = Some(bounds);
    }

    fn resize(&mut self) {
        self.resizes += 1;
    }

    fn on(&mut self, kind: EventKind, layer: Option<&str>) -> Subscription {
        let sub = Subscription {
            id: SubscriptionId(self.next_id),
            kind,
            layer: layer.map(str::to_string),
        };
        self.next_id += 1;
        self.subscriptions.push(sub.clone());
        sub
    }

    fn off(&mut self, subscription: &Subscription) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != subscription.id);
        before != self.subscriptions.len()
    }

    fn add_image(&mut self, name: &str, _image: IconImage) -> Result<(), EngineError> {
        self.images.push(name.to_string());
        Ok(())
    }

    fn add_source(&mut self, id: &str, source: GeoJsonSource) -> Result<(), EngineError> {
        if self.sources.iter().any(|(existing, _)| existing == id) {
            return Err(EngineError::DuplicateSource(id.to_string()));
        }
        self.sources.push((id.to_string(), source));
        Ok(())
    }

    fn add_layer(&mut self, layer: LayerSpec) -> Result<(), EngineError> {
        if !self.sources.iter().any(|(id, _)| *id == layer.source) {
            return Err(EngineError::UnknownSource(layer.source));
        }
        self.layers.push(layer);
        Ok(())
    }

    fn cluster_expansion_zoom(&self, _source: &str, cluster: ClusterId) -> Result<u8, EngineError> {
        self.expansion_queries.set(self.expansion_queries.get() + 1);
        self.expansion_zoom.ok_or(EngineError::UnknownCluster(cluster.0))
    }

    fn query_rendered_features(&self, _point: ScreenPoint, layers: &[&str]) -> Vec<RenderedFeature> {
        self.feature_queries
            .borrow_mut()
            .push(layers.iter().map(|l| (*l).to_string()).collect());
        self.rendered
            .iter()
            .filter(|f| layers.contains(&f.layer.as_str()))
            .cloned()
            .collect()
    }

    fn ease_to(&mut self, camera: CameraOptions) {
        self.eases.push(camera);
        if let Some(center) = camera.center {
            self.center = center;
        }
        if let Some(zoom) = camera.zoom {
            self.zoom = zoom;
        }
    }

    fn center(&self) -> LngLat {
        self.center
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    fn open_popup(&mut self, popup: Popup) {
        self.popups.push(popup);
    }

    fn drain_events(&mut self) -> Vec<MapEvent> {
        std::mem::take(&mut self.pending)
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}

/// Loader that answers every request with a canned result.
#[derive(Debug)]
pub struct StubLoader {
    result: RefCell<Option<LoadResult>>,
    pub calls: Cell<usize>,
    pub last_cancel: RefCell<Option<CancellationToken>>,
    /// Keep the load pending instead of completing it.
    hold: bool,
}

impl StubLoader {
    pub fn ok(features: FeatureCollection) -> Self {
        Self::with(Ok(features), false)
    }

    pub fn err(error: FetchError) -> Self {
        Self::with(Err(error), false)
    }

    pub fn pending() -> Self {
        Self::with(Ok(FeatureCollection::new()), true)
    }

    fn with(result: LoadResult, hold: bool) -> Self {
        Self {
            result: RefCell::new(Some(result)),
            calls: Cell::new(0),
            last_cancel: RefCell::new(None),
            hold,
        }
    }
}

impl EstablishmentLoader for StubLoader {
    fn load(&self, _center: LngLat, cancel: CancellationToken) -> PendingLoad {
        self.calls.set(self.calls.get() + 1);
        *self.last_cancel.borrow_mut() = Some(cancel);

        if self.hold {
            let (tx, rx) = tokio::sync::oneshot::channel();
            // Leak the sender so the load never completes or closes
            std::mem::forget(tx);
            return PendingLoad::new(rx);
        }

        let result = self
            .result
            .borrow_mut()
            .take()
            .unwrap_or(Err(FetchError::Cancelled));
        PendingLoad::ready(result)
    }
}
