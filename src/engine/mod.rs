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

//! Map engine capability interface.
//!
//! The view never talks to a renderer directly. Everything it needs from a
//! map engine (camera, sources, declarative layers, hit testing, popups and
//! event subscriptions) goes through [`MapEngine`]. [`EguiMap`] is the
//! shipped implementation; tests substitute a recording fake.
//!
//! Events are not delivered through callbacks. Registering with
//! [`MapEngine::on`] returns a [`Subscription`]; the engine queues matching
//! [`MapEvent`]s which the owner collects with [`MapEngine::drain_events`].
//! Each subscription can be removed on its own with [`MapEngine::off`].

pub mod cluster;
pub mod egui_map;
pub mod projection;
pub mod tiles;

pub use cluster::ClusterId;
pub use egui_map::EguiMap;

use ratings_client::{FeatureCollection, FeatureProperties};
use thiserror::Error;

/// Geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lng.is_finite() && self.lat.is_finite()
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(coordinates: [f64; 2]) -> Self {
        Self::new(coordinates[0], coordinates[1])
    }
}

/// Rectangular region given by its south-west and north-east corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LngLatBounds {
    pub sw: LngLat,
    pub ne: LngLat,
}

impl LngLatBounds {
    pub const fn new(sw: LngLat, ne: LngLat) -> Self {
        Self { sw, ne }
    }

    /// Build from `[[west, south], [east, north]]`.
    pub const fn from_corners(corners: [[f64; 2]; 2]) -> Self {
        Self::new(
            LngLat::new(corners[0][0], corners[0][1]),
            LngLat::new(corners[1][0], corners[1][1]),
        )
    }

    pub fn to_corners(&self) -> [[f64; 2]; 2] {
        [[self.sw.lng, self.sw.lat], [self.ne.lng, self.ne.lat]]
    }

    pub fn contains(&self, point: LngLat) -> bool {
        point.lng >= self.sw.lng
            && point.lng <= self.ne.lng
            && point.lat >= self.sw.lat
            && point.lat <= self.ne.lat
    }
}

/// Position in screen pixels relative to the map's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Parameters for creating an engine instance
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Style reference, e.g. `mapbox://styles/mapbox/streets-v12` or a raster
    /// URL template containing `{z}`, `{x}` and `{y}`.
    pub style: String,
    pub access_token: String,
    pub center: LngLat,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Zoom in / zoom out buttons.
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Engine finished its initial setup. Fired once.
    Load,
    Click,
    MouseEnter,
    MouseLeave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle returned from [`MapEngine::on`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub kind: EventKind,
    /// Layer filter. `None` receives every event of `kind`.
    pub layer: Option<String>,
}

/// A queued event for one subscription.
#[derive(Debug, Clone)]
pub struct MapEvent {
    pub subscription: SubscriptionId,
    pub kind: EventKind,
    pub point: Option<ScreenPoint>,
    pub lng_lat: Option<LngLat>,
    /// Features under the pointer in the subscribed layer, topmost first.
    pub features: Vec<RenderedFeature>,
}

/// GeoJSON source registration
#[derive(Debug, Clone)]
pub struct GeoJsonSource {
    pub data: FeatureCollection,
    pub cluster: bool,
    /// Cluster radius in screen pixels.
    pub cluster_radius: f64,
    /// Highest zoom at which points are still clustered.
    pub cluster_max_zoom: u8,
}

/// Which features of a source a layer draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFilter {
    All,
    /// Only cluster aggregates (`has point_count`).
    Clustered,
    /// Only individual points (`!has point_count`).
    Unclustered,
}

/// Piecewise-constant function of a cluster's point count.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExpression {
    /// Output below the first stop.
    pub base: f32,
    /// `(threshold, output)` pairs in ascending threshold order. Output
    /// applies when `count >= threshold`.
    pub stops: Vec<(u32, f32)>,
}

impl StepExpression {
    pub fn evaluate(&self, count: u32) -> f32 {
        self.stops
            .iter()
            .take_while(|(threshold, _)| count >= *threshold)
            .last()
            .map_or(self.base, |(_, output)| *output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextField {
    /// Abbreviated cluster size ("12", "1.2k", "15k").
    PointCountAbbreviated,
    /// A string property of the feature, e.g. `title`.
    Property(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAnchor {
    Center,
    /// Text hangs below the anchor point.
    Top,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Circle {
        radius: StepExpression,
        color: (u8, u8, u8),
    },
    Symbol {
        /// Name of an image registered with [`MapEngine::add_image`].
        icon: Option<String>,
        icon_size: f32,
        text: Option<TextField>,
        text_size: f32,
        /// Offset in ems from the anchor point.
        text_offset: [f32; 2],
        text_anchor: TextAnchor,
        text_color: (u8, u8, u8),
    },
}

/// Declarative layer description handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub filter: LayerFilter,
    pub kind: LayerKind,
}

/// Properties of a rendered feature.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedProperties {
    Cluster {
        cluster_id: ClusterId,
        point_count: u32,
        point_count_abbreviated: String,
    },
    Point(FeatureProperties),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    pub layer: String,
    pub source: String,
    pub coordinates: LngLat,
    pub properties: RenderedProperties,
}

impl RenderedFeature {
    pub fn cluster_id(&self) -> Option<ClusterId> {
        match &self.properties {
            RenderedProperties::Cluster { cluster_id, .. } => Some(*cluster_id),
            RenderedProperties::Point(_) => None,
        }
    }
}

/// Target for an animated camera move. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraOptions {
    pub center: Option<LngLat>,
    pub zoom: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cursor {
    #[default]
    Default,
    Pointer,
}

/// Information bubble anchored at a coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Popup {
    pub lng_lat: LngLat,
    pub heading: String,
    pub lines: Vec<String>,
}

/// Premultiplied RGBA bitmap for symbol icons
#[derive(Clone, PartialEq, Eq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for IconImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("map provider access token is missing")]
    MissingAccessToken,

    #[error("invalid map style reference: {0}")]
    InvalidStyle(String),

    #[error("source '{0}' already exists")]
    DuplicateSource(String),

    #[error("source '{0}' does not exist")]
    UnknownSource(String),

    #[error("layer '{0}' already exists")]
    DuplicateLayer(String),

    #[error("source '{0}' is not clustered")]
    NotClustered(String),

    #[error("no cluster with id {0}")]
    UnknownCluster(u64),

    #[error("invalid image '{0}'")]
    InvalidImage(String),

    #[error("map engine has been destroyed")]
    Destroyed,
}

/// Operations the view consumes from a map engine.
pub trait MapEngine {
    fn add_control(&mut self, control: Control);

    /// Restrict panning so the viewport stays inside `bounds`.
    fn set_max_bounds(&mut self, bounds: LngLatBounds);

    /// Re-read the container size.
    fn resize(&mut self);

    fn on(&mut self, kind: EventKind, layer: Option<&str>) -> Subscription;

    /// Remove a subscription. Returns false if it was not registered.
    fn off(&mut self, subscription: &Subscription) -> bool;

    fn add_image(&mut self, name: &str, image: IconImage) -> Result<(), EngineError>;

    fn add_source(&mut self, id: &str, source: GeoJsonSource) -> Result<(), EngineError>;

    fn add_layer(&mut self, layer: LayerSpec) -> Result<(), EngineError>;

    /// Lowest zoom at which the cluster splits into its children.
    fn cluster_expansion_zoom(&self, source: &str, cluster: ClusterId) -> Result<u8, EngineError>;

    /// Features drawn at `point` in the given layers, topmost first.
    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<RenderedFeature>;

    fn ease_to(&mut self, camera: CameraOptions);

    fn center(&self) -> LngLat;

    fn zoom(&self) -> f64;

    fn set_cursor(&mut self, cursor: Cursor);

    fn open_popup(&mut self, popup: Popup);

    /// Take every event queued since the last call.
    fn drain_events(&mut self) -> Vec<MapEvent>;

    /// Release renderer resources. The instance is unusable afterwards.
    fn destroy(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_expression_thresholds() {
        let step = StepExpression {
            base: 20.0,
            stops: vec![(100, 30.0), (750, 40.0)],
        };

        assert_eq!(step.evaluate(0), 20.0);
        assert_eq!(step.evaluate(99), 20.0);
        assert_eq!(step.evaluate(100), 30.0);
        assert_eq!(step.evaluate(749), 30.0);
        assert_eq!(step.evaluate(750), 40.0);
        assert_eq!(step.evaluate(100_000), 40.0);
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = LngLatBounds::from_corners([[-7.5, 50.0], [1.7, 58.6]]);
        assert!(bounds.contains(LngLat::new(-0.1, 51.5)));
        assert!(!bounds.contains(LngLat::new(2.35, 48.85)));
        assert_eq!(bounds.to_corners(), [[-7.5, 50.0], [1.7, 58.6]]);
    }
}
