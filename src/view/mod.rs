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

//! Establishment map view.
//!
//! Owns the map engine for as long as the view is mounted and drives the
//! single-shot startup sequence:
//!
//! 1. `mount` creates the engine, adds navigation, restricts panning and
//!    subscribes to `Load`
//! 2. on `Load` the engine is resized and the establishment fetch starts
//! 3. when the fetch completes the source and layers are registered and the
//!    click/hover handlers attached
//!
//! `unmount` detaches every subscription, cancels an in-flight fetch and
//! destroys the engine.

pub mod interaction;
pub mod layers;
pub mod loader;

#[cfg(test)]
mod testing;

use log::{error, info, warn};
use ratings_client::FeatureCollection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    Control, EguiMap, EngineError, EventKind, LngLat, LngLatBounds, MapEngine, MapOptions, Subscription,
};
use crate::icon::IconError;
use loader::{EstablishmentLoader, PendingLoad};

pub const DEFAULT_STYLE: &str = "mapbox://styles/mapbox/streets-v12";
pub const DEFAULT_CENTER: LngLat = LngLat::new(-0.1276, 51.5072);
pub const DEFAULT_ZOOM: f64 = 12.0;
pub const UK_BOUNDS: LngLatBounds =
    LngLatBounds::from_corners([[-7.572_167_934_59, 49.959_999_905], [1.681_530_795_91, 58.635_000_108_5]]);
pub const DEFAULT_CLUSTER_RADIUS: f64 = 80.0;
pub const DEFAULT_CLUSTER_MAX_ZOOM: u8 = 15;
/// Layer the hover-leave handler binds to. Matches no declared layer, so
/// the cursor is never restored unless configured otherwise.
pub const DEFAULT_HOVER_LEAVE_LAYER: &str = "cluster";

/// Target zoom after clicking a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterZoomMode {
    /// One level deeper than the current zoom.
    #[default]
    CurrentPlusOne,
    /// The engine-reported zoom at which the cluster splits.
    ExpansionZoom,
}

/// Everything the view needs to know up front.
#[derive(Debug, Clone, PartialEq)]
pub struct MapViewConfig {
    pub access_token: String,
    pub style: String,
    pub center: LngLat,
    pub zoom: f64,
    pub max_bounds: LngLatBounds,
    pub cluster_radius: f64,
    pub cluster_max_zoom: u8,
    pub cluster_zoom_mode: ClusterZoomMode,
    pub hover_leave_layer: String,
}

impl Default for MapViewConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            style: DEFAULT_STYLE.to_string(),
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            max_bounds: UK_BOUNDS,
            cluster_radius: DEFAULT_CLUSTER_RADIUS,
            cluster_max_zoom: DEFAULT_CLUSTER_MAX_ZOOM,
            cluster_zoom_mode: ClusterZoomMode::default(),
            hover_leave_layer: DEFAULT_HOVER_LEAVE_LAYER.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("map engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("marker icon error: {0}")]
    Icon(#[from] IconError),
}

/// Progress of the establishment load, for display.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    NotStarted,
    Loading,
    Loaded { count: usize },
    Failed(String),
}

#[derive(Debug)]
struct Handlers {
    cluster_click: Subscription,
    marker_click: Subscription,
    cluster_enter: Subscription,
    hover_leave: Subscription,
}

impl Handlers {
    fn all(&self) -> [&Subscription; 4] {
        [
            &self.cluster_click,
            &self.marker_click,
            &self.cluster_enter,
            &self.hover_leave,
        ]
    }
}

#[derive(Debug)]
struct Mounted<E> {
    engine: E,
    load: Subscription,
    handlers: Option<Handlers>,
    pending: Option<PendingLoad>,
    cancel: CancellationToken,
}

pub struct EstablishmentMapView<E: MapEngine, L: EstablishmentLoader> {
    config: MapViewConfig,
    loader: L,
    mounted: Option<Mounted<E>>,
    status: LoadStatus,
}

impl<E: MapEngine, L: EstablishmentLoader> std::fmt::Debug for EstablishmentMapView<E, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishmentMapView")
            .field("config", &self.config)
            .field("mounted", &self.mounted.is_some())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<E: MapEngine, L: EstablishmentLoader> EstablishmentMapView<E, L> {
    pub fn new(config: MapViewConfig, loader: L) -> Self {
        Self {
            config,
            loader,
            mounted: None,
            status: LoadStatus::NotStarted,
        }
    }

    /// Create the engine if there is none yet.
    ///
    /// Returns `Ok(false)` without calling `create` when already mounted.
    pub fn mount<F>(&mut self, create: F) -> Result<bool, ViewError>
    where
        F: FnOnce(MapOptions) -> Result<E, EngineError>,
    {
        if self.mounted.is_some() {
            return Ok(false);
        }

        let mut engine = create(MapOptions {
            style: self.config.style.clone(),
            access_token: self.config.access_token.clone(),
            center: self.config.center,
            zoom: self.config.zoom,
        })?;

        engine.add_control(Control::Navigation);
        engine.set_max_bounds(self.config.max_bounds);
        let load = engine.on(EventKind::Load, None);

        info!(
            "Map view mounted at {:.4},{:.4} zoom {}",
            self.config.center.lat, self.config.center.lng, self.config.zoom
        );

        self.mounted = Some(Mounted {
            engine,
            load,
            handlers: None,
            pending: None,
            cancel: CancellationToken::new(),
        });
        self.status = LoadStatus::NotStarted;
        Ok(true)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    pub fn engine(&self) -> Option<&E> {
        self.mounted.as_ref().map(|m| &m.engine)
    }

    pub fn engine_mut(&mut self) -> Option<&mut E> {
        self.mounted.as_mut().map(|m| &mut m.engine)
    }

    pub fn status(&self) -> &LoadStatus {
        &self.status
    }

    /// Dispatch queued engine events and collect a finished fetch.
    /// Call once per frame.
    pub fn process_events(&mut self) {
        let Some(mounted) = self.mounted.as_mut() else {
            return;
        };

        for event in mounted.engine.drain_events() {
            if event.subscription == mounted.load.id {
                mounted.engine.resize();
                if self.status == LoadStatus::NotStarted {
                    info!("Map loaded, fetching establishments");
                    mounted.pending = Some(self.loader.load(self.config.center, mounted.cancel.clone()));
                    self.status = LoadStatus::Loading;
                }
                continue;
            }

            let Some(handlers) = &mounted.handlers else {
                continue;
            };
            let engine = &mut mounted.engine;

            if event.subscription == handlers.cluster_click.id {
                interaction::expand_cluster(engine, &event, self.config.cluster_zoom_mode);
            } else if event.subscription == handlers.marker_click.id {
                interaction::open_marker_popup(engine, &event);
            } else if event.subscription == handlers.cluster_enter.id {
                interaction::pointer_cursor(engine);
            } else if event.subscription == handlers.hover_leave.id {
                interaction::default_cursor(engine);
            }
        }

        let Some(result) = mounted.pending.as_mut().and_then(PendingLoad::poll) else {
            return;
        };
        mounted.pending = None;

        match result {
            Ok(features) => self.status = Self::populate(mounted, features, &self.config),
            Err(e) => {
                error!("Failed to load establishments: {}", e);
                self.status = LoadStatus::Failed(e.to_string());
            }
        }
    }

    fn populate(mounted: &mut Mounted<E>, features: FeatureCollection, config: &MapViewConfig) -> LoadStatus {
        let count = features.len();
        if let Err(e) = layers::configure(&mut mounted.engine, features, config) {
            error!("Failed to configure establishment layers: {}", e);
            return LoadStatus::Failed(e.to_string());
        }

        let engine = &mut mounted.engine;
        mounted.handlers = Some(Handlers {
            cluster_click: engine.on(EventKind::Click, Some(layers::CLUSTERS_LAYER)),
            marker_click: engine.on(EventKind::Click, Some(layers::MARKER_LAYER)),
            cluster_enter: engine.on(EventKind::MouseEnter, Some(layers::CLUSTERS_LAYER)),
            hover_leave: engine.on(EventKind::MouseLeave, Some(config.hover_leave_layer.as_str())),
        });

        info!("Showing {} establishments", count);
        LoadStatus::Loaded { count }
    }

    /// Tear down the engine. Returns false if nothing was mounted.
    pub fn unmount(&mut self) -> bool {
        let Some(mut mounted) = self.mounted.take() else {
            return false;
        };

        if mounted.pending.take().is_some() {
            info!("Cancelling in-flight establishment fetch");
        }
        mounted.cancel.cancel();

        let engine = &mut mounted.engine;
        if !engine.off(&mounted.load) {
            warn!("Load subscription was already detached");
        }
        if let Some(handlers) = mounted.handlers.take() {
            for sub in handlers.all() {
                engine.off(sub);
            }
        }
        engine.destroy();

        self.status = LoadStatus::NotStarted;
        info!("Map view unmounted");
        true
    }
}

impl<L: EstablishmentLoader> EstablishmentMapView<EguiMap, L> {
    /// Paint the map and handle this frame's events.
    pub fn show(&mut self, ui: &mut egui::Ui) -> Option<egui::Response> {
        let response = self.mounted.as_mut().map(|m| m.engine.show(ui));
        self.process_events();
        response
    }
}

impl<E: MapEngine, L: EstablishmentLoader> Drop for EstablishmentMapView<E, L> {
    fn drop(&mut self) {
        self.unmount();
    }
}
