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

//! Reactions to clicks and hovers on the establishment layers.

use log::debug;

use super::layers::{CLUSTERS_LAYER, SOURCE_ID};
use super::ClusterZoomMode;
use crate::engine::{CameraOptions, Cursor, LngLat, MapEngine, MapEvent, Popup, RenderedProperties};

/// Shift `longitude` by whole turns so it lies as close as possible to
/// `cursor`. The result is congruent to `longitude` mod 360 and within 180°
/// of `cursor`.
pub fn wrap_longitude(longitude: f64, cursor: f64) -> f64 {
    if !longitude.is_finite() || !cursor.is_finite() {
        return longitude;
    }
    longitude + 360.0 * ((cursor - longitude) / 360.0).round()
}

/// Zoom into the cluster under the click.
///
/// Issues exactly one expansion-zoom query. Returns true if the camera was
/// moved. Failures are logged and otherwise ignored.
pub fn expand_cluster<E: MapEngine>(engine: &mut E, event: &MapEvent, mode: ClusterZoomMode) -> bool {
    let Some(point) = event.point else {
        return false;
    };

    let features = engine.query_rendered_features(point, &[CLUSTERS_LAYER]);
    let Some(feature) = features.first() else {
        debug!("Cluster click at {:?} hit nothing", point);
        return false;
    };
    let Some(cluster_id) = feature.cluster_id() else {
        return false;
    };

    match engine.cluster_expansion_zoom(SOURCE_ID, cluster_id) {
        Ok(expansion_zoom) => {
            let zoom = match mode {
                ClusterZoomMode::CurrentPlusOne => engine.zoom() + 1.0,
                ClusterZoomMode::ExpansionZoom => f64::from(expansion_zoom),
            };
            engine.ease_to(CameraOptions {
                center: Some(feature.coordinates),
                zoom: Some(zoom),
            });
            true
        }
        Err(e) => {
            debug!("Cluster {} expansion query failed: {}", cluster_id, e);
            false
        }
    }
}

/// Build the popup for a clicked marker, or `None` if the event carries no
/// establishment.
pub fn marker_popup(event: &MapEvent) -> Option<Popup> {
    let feature = event.features.first()?;
    let RenderedProperties::Point(properties) = &feature.properties else {
        return None;
    };

    let cursor = event.lng_lat.map_or(feature.coordinates.lng, |l| l.lng);
    let lng_lat = LngLat::new(
        wrap_longitude(feature.coordinates.lng, cursor),
        feature.coordinates.lat,
    );

    Some(Popup {
        lng_lat,
        heading: properties.title.clone(),
        lines: vec![
            properties.description.clone(),
            format!("Rating: {}", properties.rating),
        ],
    })
}

pub fn open_marker_popup<E: MapEngine>(engine: &mut E, event: &MapEvent) -> bool {
    match marker_popup(event) {
        Some(popup) => {
            engine.open_popup(popup);
            true
        }
        None => false,
    }
}

pub fn pointer_cursor<E: MapEngine>(engine: &mut E) {
    engine.set_cursor(Cursor::Pointer);
}

pub fn default_cursor<E: MapEngine>(engine: &mut E) {
    engine.set_cursor(Cursor::Default);
}
