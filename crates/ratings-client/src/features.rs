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

//! GeoJSON point features built from establishment records.
//!
//! Only the subset of GeoJSON needed for point markers is modelled. The types
//! serialize to standard GeoJSON so the collection can be dumped or handed to
//! any consumer that understands `FeatureCollection`.

use serde::{Deserialize, Serialize};

use crate::establishment::Establishment;

/// Point geometry. Coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
}

impl Geometry {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Geometry::Point {
            coordinates: [longitude, latitude],
        }
    }

    pub fn coordinates(&self) -> [f64; 2] {
        match self {
            Geometry::Point { coordinates } => *coordinates,
        }
    }
}

/// Properties attached to every establishment feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub title: String,
    /// Always empty for now; kept so popups have a slot for it.
    pub description: String,
    pub rating: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

impl Feature {
    /// Map one establishment to one point feature. Never filters.
    pub fn from_establishment(establishment: &Establishment) -> Self {
        Self {
            geometry: Geometry::point(
                establishment.geocode.longitude,
                establishment.geocode.latitude,
            ),
            properties: FeatureProperties {
                title: establishment.business_name.clone(),
                description: String::new(),
                rating: establishment.rating_value.clone(),
            },
        }
    }

    pub fn coordinates(&self) -> [f64; 2] {
        self.geometry.coordinates()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection with exactly one feature per establishment, in order
    pub fn from_establishments(establishments: &[Establishment]) -> Self {
        Self {
            features: establishments.iter().map(Feature::from_establishment).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}
