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

//! Web Mercator projection and camera constraints.

use super::{LngLat, LngLatBounds};

/// Raster tile edge in pixels. World width at zoom `z` is `TILE_SIZE * 2^z`.
pub const TILE_SIZE: f64 = 256.0;

/// Latitude limit of the square Web Mercator world
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Web Mercator projection utilities
pub struct WebMercator;

impl WebMercator {
    /// Longitude to normalized X (0.0 at -180°, 1.0 at 180°)
    pub fn lon_to_x(lon: f64) -> f64 {
        (lon + 180.0) / 360.0
    }

    /// Latitude to normalized Y (0.0 at the north edge, 1.0 at the south edge)
    pub fn lat_to_y(lat: f64) -> f64 {
        let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0
    }

    pub fn x_to_lon(x: f64) -> f64 {
        x * 360.0 - 180.0
    }

    pub fn y_to_lat(y: f64) -> f64 {
        (std::f64::consts::PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees()
    }

    /// World size in pixels at a (possibly fractional) zoom
    pub fn world_size(zoom: f64) -> f64 {
        TILE_SIZE * 2_f64.powf(zoom)
    }

    /// Project to world pixels at `zoom`.
    pub fn project(point: LngLat, zoom: f64) -> (f64, f64) {
        let size = Self::world_size(zoom);
        (Self::lon_to_x(point.lng) * size, Self::lat_to_y(point.lat) * size)
    }

    pub fn unproject(x: f64, y: f64, zoom: f64) -> LngLat {
        let size = Self::world_size(zoom);
        LngLat::new(Self::x_to_lon(x / size), Self::y_to_lat(y / size))
    }
}

/// Zoom at which `bounds` exactly covers a viewport of `width` x `height`.
pub fn min_zoom_for_bounds(bounds: &LngLatBounds, width: f64, height: f64) -> f64 {
    let span_x = WebMercator::lon_to_x(bounds.ne.lng) - WebMercator::lon_to_x(bounds.sw.lng);
    let span_y = WebMercator::lat_to_y(bounds.sw.lat) - WebMercator::lat_to_y(bounds.ne.lat);
    if span_x <= 0.0 || span_y <= 0.0 {
        return 0.0;
    }

    let scale = (width / (span_x * TILE_SIZE)).max(height / (span_y * TILE_SIZE));
    scale.log2().max(0.0)
}

/// Adjust a camera so the whole viewport lies inside `bounds`.
///
/// Zoom is raised if the bounds are smaller than the viewport, then the
/// center is clamped so no edge of the viewport crosses the bounds.
pub fn constrain_camera(
    center: LngLat,
    zoom: f64,
    width: f64,
    height: f64,
    bounds: &LngLatBounds,
) -> (LngLat, f64) {
    let zoom = zoom.max(min_zoom_for_bounds(bounds, width, height));

    let (min_x, min_y) = WebMercator::project(LngLat::new(bounds.sw.lng, bounds.ne.lat), zoom);
    let (max_x, max_y) = WebMercator::project(LngLat::new(bounds.ne.lng, bounds.sw.lat), zoom);
    let (cx, cy) = WebMercator::project(center, zoom);

    let half_w = width / 2.0;
    let half_h = height / 2.0;

    let cx = clamp_or_mid(cx, min_x + half_w, max_x - half_w);
    let cy = clamp_or_mid(cy, min_y + half_h, max_y - half_h);

    (WebMercator::unproject(cx, cy, zoom), zoom)
}

/// Visible region for a camera and viewport size.
pub fn visible_bounds(center: LngLat, zoom: f64, width: f64, height: f64) -> LngLatBounds {
    let (cx, cy) = WebMercator::project(center, zoom);
    let north_west = WebMercator::unproject(cx - width / 2.0, cy - height / 2.0, zoom);
    let south_east = WebMercator::unproject(cx + width / 2.0, cy + height / 2.0, zoom);
    LngLatBounds::new(
        LngLat::new(north_west.lng, south_east.lat),
        LngLat::new(south_east.lng, north_west.lat),
    )
}

fn clamp_or_mid(value: f64, low: f64, high: f64) -> f64 {
    if low > high {
        (low + high) / 2.0
    } else {
        value.clamp(low, high)
    }
}
