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

//! Hierarchical point clustering.
//!
//! Points are grouped greedily per integer zoom level, from `max_zoom` down
//! to 0. Each level is built from the one above it: a node absorbs every
//! unassigned neighbour within `radius` screen pixels, and the merged node
//! sits at the count-weighted mean position. A node with no neighbours is
//! carried down unchanged, keeping its identity.
//!
//! Level `max_zoom + 1` holds the raw points, so any zoom beyond `max_zoom`
//! shows every feature individually.

use std::collections::HashMap;
use std::fmt;

use ratings_client::FeatureCollection;

use super::projection::{WebMercator, TILE_SIZE};
use super::{EngineError, LngLat, LngLatBounds};

/// Highest supported `max_zoom`; the id packs the level into five bits.
pub const MAX_CLUSTER_ZOOM: u8 = 24;

const LEVEL_BITS: u64 = 5;

/// Identifier of a cluster aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterId(pub u64);

impl ClusterId {
    fn encode(level: usize, index: usize) -> Self {
        Self(((index as u64) << LEVEL_BITS) | level as u64)
    }

    fn decode(self) -> (usize, usize) {
        ((self.0 & ((1 << LEVEL_BITS) - 1)) as usize, (self.0 >> LEVEL_BITS) as usize)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Index into the source feature collection.
    Point(usize),
    Cluster(ClusterId),
}

#[derive(Debug, Clone)]
struct Node {
    /// Normalized mercator coordinates.
    x: f64,
    y: f64,
    count: u32,
    origin: Origin,
    /// Indices into the level above (`zoom + 1`).
    children: Vec<usize>,
}

/// One entry visible at a given zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexEntry {
    Point {
        feature: usize,
        coordinates: LngLat,
    },
    Cluster {
        id: ClusterId,
        point_count: u32,
        coordinates: LngLat,
    },
}

impl IndexEntry {
    pub fn coordinates(&self) -> LngLat {
        match self {
            IndexEntry::Point { coordinates, .. } | IndexEntry::Cluster { coordinates, .. } => *coordinates,
        }
    }
}

/// Cluster tree over a feature collection.
#[derive(Debug, Clone)]
pub struct ClusterIndex {
    max_zoom: u8,
    clustered: bool,
    /// `levels[z]` for z in `0..=max_zoom + 1`; only the last level when
    /// clustering is disabled.
    levels: Vec<Vec<Node>>,
}

impl ClusterIndex {
    /// Build a clustered index. `radius` is in screen pixels.
    pub fn new(features: &FeatureCollection, radius: f64, max_zoom: u8) -> Self {
        let max_zoom = max_zoom.min(MAX_CLUSTER_ZOOM);
        let points = Self::leaf_nodes(features);
        let mut levels = vec![Vec::new(); usize::from(max_zoom) + 2];
        levels[usize::from(max_zoom) + 1] = points;

        for level in (0..=usize::from(max_zoom)).rev() {
            levels[level] = Self::cluster_level(&levels[level + 1], level, radius);
        }

        Self {
            max_zoom,
            clustered: true,
            levels,
        }
    }

    /// Index that never aggregates.
    pub fn unclustered(features: &FeatureCollection) -> Self {
        Self {
            max_zoom: 0,
            clustered: false,
            levels: vec![Self::leaf_nodes(features)],
        }
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Number of indexed points. Features without finite coordinates are
    /// not indexed.
    pub fn point_count(&self) -> usize {
        self.levels.last().map_or(0, Vec::len)
    }

    /// Entries shown at `zoom` whose position lies inside `bounds`.
    pub fn entries(&self, bounds: &LngLatBounds, zoom: f64) -> Vec<IndexEntry> {
        self.level_for_zoom(zoom)
            .iter()
            .filter_map(|node| {
                let entry = Self::entry(node);
                bounds.contains(entry.coordinates()).then_some(entry)
            })
            .collect()
    }

    /// Lowest zoom at which `id` no longer shows as a single cluster.
    pub fn expansion_zoom(&self, id: ClusterId) -> Result<u8, EngineError> {
        let (mut level, mut index) = self.locate(id)?;

        loop {
            let expansion = level + 1;
            let children = &self.levels[level][index].children;
            if children.len() != 1 || expansion > usize::from(self.max_zoom) {
                return Ok(u8::try_from(expansion).unwrap_or(u8::MAX));
            }

            match self.levels[level + 1][children[0]].origin {
                Origin::Cluster(child) => (level, index) = self.locate(child)?,
                Origin::Point(_) => return Ok(u8::try_from(expansion).unwrap_or(u8::MAX)),
            }
        }
    }

    fn locate(&self, id: ClusterId) -> Result<(usize, usize), EngineError> {
        let (level, index) = id.decode();
        let found = self
            .levels
            .get(level)
            .and_then(|nodes| nodes.get(index))
            .is_some_and(|node| node.origin == Origin::Cluster(id));

        if self.clustered && found {
            Ok((level, index))
        } else {
            Err(EngineError::UnknownCluster(id.0))
        }
    }

    fn level_for_zoom(&self, zoom: f64) -> &[Node] {
        if !self.clustered {
            return &self.levels[0];
        }
        let top = self.levels.len() - 1;
        let level = if zoom.is_finite() && zoom > 0.0 {
            (zoom.floor() as usize).min(top)
        } else {
            0
        };
        &self.levels[level]
    }

    fn entry(node: &Node) -> IndexEntry {
        let coordinates = LngLat::new(WebMercator::x_to_lon(node.x), WebMercator::y_to_lat(node.y));
        match node.origin {
            Origin::Point(feature) => IndexEntry::Point { feature, coordinates },
            Origin::Cluster(id) => IndexEntry::Cluster {
                id,
                point_count: node.count,
                coordinates,
            },
        }
    }

    fn leaf_nodes(features: &FeatureCollection) -> Vec<Node> {
        features
            .features
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                let point = LngLat::from(feature.coordinates());
                point.is_finite().then(|| Node {
                    x: WebMercator::lon_to_x(point.lng),
                    y: WebMercator::lat_to_y(point.lat),
                    count: 1,
                    origin: Origin::Point(index),
                    children: Vec::new(),
                })
            })
            .collect()
    }

    fn cluster_level(above: &[Node], level: usize, radius: f64) -> Vec<Node> {
        // Radius in normalized units at this zoom
        let r = radius / (TILE_SIZE * 2_f64.powi(level as i32));
        let cell_of = |node: &Node| -> (i64, i64) {
            if r > 0.0 {
                ((node.x / r).floor() as i64, (node.y / r).floor() as i64)
            } else {
                (0, 0)
            }
        };

        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, node) in above.iter().enumerate() {
            grid.entry(cell_of(node)).or_default().push(i);
        }

        let mut assigned = vec![false; above.len()];
        let mut nodes = Vec::new();

        for (i, node) in above.iter().enumerate() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;

            let mut members = vec![i];
            if r > 0.0 {
                let (cx, cy) = cell_of(node);
                for gx in cx - 1..=cx + 1 {
                    for gy in cy - 1..=cy + 1 {
                        let Some(bucket) = grid.get(&(gx, gy)) else {
                            continue;
                        };
                        for &j in bucket {
                            if assigned[j] {
                                continue;
                            }
                            let dx = above[j].x - node.x;
                            let dy = above[j].y - node.y;
                            if dx * dx + dy * dy <= r * r {
                                assigned[j] = true;
                                members.push(j);
                            }
                        }
                    }
                }
            }

            if members.len() == 1 {
                nodes.push(Node {
                    children: vec![i],
                    ..node.clone()
                });
                continue;
            }

            let count: u32 = members.iter().map(|&m| above[m].count).sum();
            let weight = f64::from(count);
            let x = members.iter().map(|&m| above[m].x * f64::from(above[m].count)).sum::<f64>() / weight;
            let y = members.iter().map(|&m| above[m].y * f64::from(above[m].count)).sum::<f64>() / weight;

            let id = ClusterId::encode(level, nodes.len());
            nodes.push(Node {
                x,
                y,
                count,
                origin: Origin::Cluster(id),
                children: members,
            });
        }

        nodes
    }
}

/// Short label for a cluster size: `999`, `1.2k`, `15k`.
pub fn abbreviate_count(count: u32) -> String {
    if count >= 10_000 {
        format!("{}k", (f64::from(count) / 1000.0).round())
    } else if count >= 1000 {
        let tenths = (f64::from(count) / 100.0).round() / 10.0;
        if tenths.fract() == 0.0 {
            format!("{}k", tenths as u32)
        } else {
            format!("{tenths:.1}k")
        }
    } else {
        count.to_string()
    }
}
