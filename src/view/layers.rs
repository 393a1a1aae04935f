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

//! Source and layer declarations for the establishment map.

use ratings_client::FeatureCollection;

use super::{MapViewConfig, ViewError};
use crate::engine::{
    GeoJsonSource, LayerFilter, LayerKind, LayerSpec, MapEngine, StepExpression, TextAnchor, TextField,
};
use crate::icon;

pub const SOURCE_ID: &str = "establishments";
pub const CLUSTERS_LAYER: &str = "clusters";
pub const CLUSTER_COUNT_LAYER: &str = "cluster-count";
pub const MARKER_LAYER: &str = "marker";
pub const MARKER_ICON: &str = "takeaway";

/// Cluster fill colour
pub const CLUSTER_COLOR: (u8, u8, u8) = (81, 187, 214);

/// Icon raster size in pixels
const ICON_PIXELS: u32 = 48;

/// Circle radius by point count: 20 below 100, 30 below 750, 40 above.
pub fn cluster_radius() -> StepExpression {
    StepExpression {
        base: 20.0,
        stops: vec![(100, 30.0), (750, 40.0)],
    }
}

pub fn source_spec(data: FeatureCollection, config: &MapViewConfig) -> GeoJsonSource {
    GeoJsonSource {
        data,
        cluster: true,
        cluster_radius: config.cluster_radius,
        cluster_max_zoom: config.cluster_max_zoom,
    }
}

pub fn clusters_layer() -> LayerSpec {
    LayerSpec {
        id: CLUSTERS_LAYER.to_string(),
        source: SOURCE_ID.to_string(),
        filter: LayerFilter::Clustered,
        kind: LayerKind::Circle {
            radius: cluster_radius(),
            color: CLUSTER_COLOR,
        },
    }
}

pub fn cluster_count_layer() -> LayerSpec {
    LayerSpec {
        id: CLUSTER_COUNT_LAYER.to_string(),
        source: SOURCE_ID.to_string(),
        filter: LayerFilter::Clustered,
        kind: LayerKind::Symbol {
            icon: None,
            icon_size: 0.0,
            text: Some(TextField::PointCountAbbreviated),
            text_size: 12.0,
            text_offset: [0.0, 0.0],
            text_anchor: TextAnchor::Center,
            text_color: (255, 255, 255),
        },
    }
}

pub fn marker_layer() -> LayerSpec {
    LayerSpec {
        id: MARKER_LAYER.to_string(),
        source: SOURCE_ID.to_string(),
        filter: LayerFilter::Unclustered,
        kind: LayerKind::Symbol {
            icon: Some(MARKER_ICON.to_string()),
            icon_size: 24.0,
            text: Some(TextField::Property("title".to_string())),
            text_size: 11.0,
            text_offset: [0.0, 1.2],
            text_anchor: TextAnchor::Top,
            text_color: (40, 40, 40),
        },
    }
}

/// Register the marker icon, the clustered source and its three layers.
pub fn configure<E: MapEngine>(
    engine: &mut E,
    data: FeatureCollection,
    config: &MapViewConfig,
) -> Result<(), ViewError> {
    let icon = icon::takeaway_icon(ICON_PIXELS)?;
    engine.add_image(MARKER_ICON, icon)?;

    engine.add_source(SOURCE_ID, source_spec(data, config))?;
    for layer in [clusters_layer(), cluster_count_layer(), marker_layer()] {
        engine.add_layer(layer)?;
    }
    Ok(())
}
