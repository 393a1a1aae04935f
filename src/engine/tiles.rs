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

//! Raster basemap tiles: URL construction, disk cache and background download.

use egui::{ColorImage, TextureHandle};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use super::projection::{WebMercator, TILE_SIZE};
use super::{EngineError, LngLat};

const CACHE_DURATION_DAYS: u64 = 7;
const MAX_TILE_ZOOM: u8 = 22;
/// Downloads in flight at once; further tiles are requested on later frames.
const MAX_CONCURRENT_DOWNLOADS: usize = 8;
const FAILED_RETRY_AFTER: Duration = Duration::from_secs(30);
const MAPBOX_STYLE_PREFIX: &str = "mapbox://styles/";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        Self { x, y, zoom }
    }
}

/// Where raster tiles for a style come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StyleTiles {
    /// Mapbox static tiles for `owner/style-id`.
    Mapbox { style: String, access_token: String },
    /// Plain `{z}/{x}/{y}` template, e.g. an OpenStreetMap tile server.
    Template(String),
}

impl StyleTiles {
    /// Resolve a style reference into a tile source.
    ///
    /// `mapbox://styles/<owner>/<id>` needs a non-empty access token. Anything
    /// with `{z}`, `{x}` and `{y}` placeholders is used verbatim.
    pub fn from_style(style: &str, access_token: &str) -> Result<Self, EngineError> {
        if let Some(path) = style.strip_prefix(MAPBOX_STYLE_PREFIX) {
            if access_token.trim().is_empty() {
                return Err(EngineError::MissingAccessToken);
            }
            if path.split('/').filter(|part| !part.is_empty()).count() != 2 {
                return Err(EngineError::InvalidStyle(style.to_string()));
            }
            return Ok(StyleTiles::Mapbox {
                style: path.trim_matches('/').to_string(),
                access_token: access_token.trim().to_string(),
            });
        }

        if ["{z}", "{x}", "{y}"].iter().all(|p| style.contains(p)) {
            return Ok(StyleTiles::Template(style.to_string()));
        }

        Err(EngineError::InvalidStyle(style.to_string()))
    }

    pub fn tile_url(&self, coord: TileCoord) -> String {
        match self {
            StyleTiles::Mapbox { style, access_token } => format!(
                "https://api.mapbox.com/styles/v1/{}/tiles/256/{}/{}/{}?access_token={}",
                style, coord.zoom, coord.x, coord.y, access_token
            ),
            StyleTiles::Template(template) => template
                .replace("{z}", &coord.zoom.to_string())
                .replace("{x}", &coord.x.to_string())
                .replace("{y}", &coord.y.to_string()),
        }
    }

    /// Cache key for a tile; independent of the access token so rotating
    /// tokens keeps the cache warm.
    fn cache_filename(&self, coord: TileCoord) -> String {
        let url = self.tile_url(coord);
        let keyed = url.split("access_token=").next().unwrap_or(&url);

        let mut hasher = Sha256::new();
        hasher.update(keyed.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn attribution(&self) -> &'static str {
        match self {
            StyleTiles::Mapbox { .. } => "© Mapbox © OpenStreetMap contributors",
            StyleTiles::Template(_) => "© OpenStreetMap contributors",
        }
    }
}

enum TileState {
    Loading,
    Loaded(TextureHandle),
    Failed { since: Instant },
}

impl TileState {
    fn failed() -> Self {
        TileState::Failed { since: Instant::now() }
    }

    fn should_retry(&self) -> bool {
        matches!(self, TileState::Failed { since } if since.elapsed() >= FAILED_RETRY_AFTER)
    }
}

/// A tile placed on screen relative to the map center
#[derive(Debug, Clone, Copy)]
pub struct PlacedTile {
    pub coord: TileCoord,
    pub offset_x: f32,
    pub offset_y: f32,
    pub size: f32,
}

pub struct TileManager {
    source: StyleTiles,
    cache_dir: PathBuf,
    tiles: Arc<Mutex<HashMap<TileCoord, TileState>>>,
    download_queue: Arc<Mutex<HashSet<TileCoord>>>,
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl TileManager {
    pub fn new(source: StyleTiles) -> Self {
        let cache_dir = Self::get_cache_dir();

        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!("Failed to create tile cache directory: {}", e);
        }

        Self::cleanup_old_tiles(&cache_dir);

        Self {
            source,
            cache_dir,
            tiles: Arc::new(Mutex::new(HashMap::new())),
            download_queue: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn source(&self) -> &StyleTiles {
        &self.source
    }

    fn get_cache_dir() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        path.push("takeaway-map");
        path.push("tiles");
        path
    }

    fn cleanup_old_tiles(cache_dir: &Path) {
        let now = SystemTime::now();
        let max_age = Duration::from_secs(CACHE_DURATION_DAYS * 24 * 60 * 60);

        if let Ok(entries) = fs::read_dir(cache_dir) {
            for entry in entries.flatten() {
                let expired = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > max_age);

                if expired && fs::remove_file(entry.path()).is_ok() {
                    debug!("Removed old tile cache: {:?}", entry.path());
                }
            }
        }
    }

    /// Get tile from memory or disk cache, or queue it for download
    pub fn get_tile(&self, coord: TileCoord, ctx: &egui::Context) -> Option<TextureHandle> {
        let mut tiles = self.tiles.lock().unwrap_or_else(PoisonError::into_inner);

        match tiles.get(&coord) {
            Some(TileState::Loaded(texture)) => return Some(texture.clone()),
            Some(TileState::Loading) => return None,
            Some(state @ TileState::Failed { .. }) if !state.should_retry() => return None,
            _ => {}
        }

        let cache_path = self.cache_dir.join(format!("{}.png", self.source.cache_filename(coord)));
        if let Ok(bytes) = fs::read(&cache_path) {
            match decode_tile(&bytes, coord, ctx) {
                Ok(texture) => {
                    tiles.insert(coord, TileState::Loaded(texture.clone()));
                    return Some(texture);
                }
                Err(e) => warn!("Failed to load cached tile: {}", e),
            }
        }

        // The tiles lock is held until Loading is recorded so the download
        // thread cannot store its result first.
        if self.queue_download(coord, ctx.clone()) {
            tiles.insert(coord, TileState::Loading);
        }
        None
    }

    /// Start a background download. Returns false if the tile is already
    /// queued or too many downloads are in flight.
    fn queue_download(&self, coord: TileCoord, ctx: egui::Context) -> bool {
        let mut queue = self.download_queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= MAX_CONCURRENT_DOWNLOADS || !queue.insert(coord) {
            return false;
        }
        drop(queue);

        let tiles = self.tiles.clone();
        let download_queue = self.download_queue.clone();
        let url = self.source.tile_url(coord);
        let cache_path = self.cache_dir.join(format!("{}.png", self.source.cache_filename(coord)));

        std::thread::spawn(move || {
            let state = download_tile(&url, &cache_path, coord, &ctx);
            tiles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(coord, state);
            download_queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&coord);
            ctx.request_repaint();
        });
        true
    }

    /// Tiles covering a viewport at a fractional zoom.
    ///
    /// Tiles are fetched at `floor(zoom)` and scaled by the remainder.
    pub fn get_visible_tiles(center: LngLat, zoom: f64, viewport_width: f32, viewport_height: f32) -> Vec<PlacedTile> {
        let tile_zoom = zoom.floor().clamp(0.0, f64::from(MAX_TILE_ZOOM)) as u8;
        let scale = 2_f64.powf(zoom - f64::from(tile_zoom));
        let tile_pixels = TILE_SIZE * scale;

        let (center_px, center_py) = WebMercator::project(center, f64::from(tile_zoom));
        let center_tile_x = center_px / TILE_SIZE;
        let center_tile_y = center_py / TILE_SIZE;

        let tiles_wide = (f64::from(viewport_width) / tile_pixels).ceil() as i64 + 2;
        let tiles_high = (f64::from(viewport_height) / tile_pixels).ceil() as i64 + 2;

        let start_x = center_tile_x.floor() as i64 - tiles_wide / 2;
        let start_y = center_tile_y.floor() as i64 - tiles_high / 2;

        let max_tile = 1_i64 << tile_zoom;
        let mut placed = Vec::new();

        for dy in 0..tiles_high {
            for dx in 0..tiles_wide {
                let tile_x = start_x + dx;
                let tile_y = start_y + dy;

                // Latitude doesn't wrap
                if tile_y < 0 || tile_y >= max_tile {
                    continue;
                }
                let wrapped_x = tile_x.rem_euclid(max_tile);

                placed.push(PlacedTile {
                    coord: TileCoord::new(wrapped_x as u32, tile_y as u32, tile_zoom),
                    offset_x: ((tile_x as f64 - center_tile_x) * tile_pixels) as f32,
                    offset_y: ((tile_y as f64 - center_tile_y) * tile_pixels) as f32,
                    size: tile_pixels as f32,
                });
            }
        }

        placed
    }

    /// Whether any of `coords` is still downloading or waiting for a slot.
    pub fn has_loading_tiles(&self, coords: &[TileCoord]) -> bool {
        let tiles = self.tiles.lock().unwrap_or_else(PoisonError::into_inner);
        coords
            .iter()
            .any(|coord| matches!(tiles.get(coord), None | Some(TileState::Loading)))
    }

    /// Number of `coords` whose last download failed.
    pub fn get_error_count(&self, coords: &[TileCoord]) -> usize {
        let tiles = self.tiles.lock().unwrap_or_else(PoisonError::into_inner);
        coords
            .iter()
            .filter(|coord| matches!(tiles.get(coord), Some(TileState::Failed { .. })))
            .count()
    }

    /// Drop every texture held in memory.
    pub fn clear(&self) {
        self.tiles.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

fn download_tile(url: &str, cache_path: &Path, coord: TileCoord, ctx: &egui::Context) -> TileState {
    debug!("Downloading tile {}/{}/{}", coord.zoom, coord.x, coord.y);

    let response = match reqwest::blocking::get(url) {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed to fetch tile: {}", e.without_url());
            return TileState::failed();
        }
    };

    if !response.status().is_success() {
        warn!("Failed to download tile: HTTP {}", response.status());
        return TileState::failed();
    }

    let bytes = match response.bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read tile bytes: {}", e.without_url());
            return TileState::failed();
        }
    };

    if let Err(e) = fs::write(cache_path, &bytes) {
        warn!("Failed to save tile to cache: {}", e);
    }

    match decode_tile(&bytes, coord, ctx) {
        Ok(texture) => TileState::Loaded(texture),
        Err(e) => {
            warn!("Failed to decode tile image: {}", e);
            TileState::failed()
        }
    }
}

fn decode_tile(bytes: &[u8], coord: TileCoord, ctx: &egui::Context) -> Result<TextureHandle, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let rgba = img.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color_image = ColorImage::from_rgba_unmultiplied(size, &rgba.into_raw());

    Ok(ctx.load_texture(
        format!("tile_{}_{}/{}", coord.zoom, coord.x, coord.y),
        color_image,
        egui::TextureOptions::LINEAR,
    ))
}

/// Log which style the engine renders with; the token is never printed.
pub fn describe(source: &StyleTiles) {
    match source {
        StyleTiles::Mapbox { style, .. } => info!("Using Mapbox style {}", style),
        StyleTiles::Template(template) => info!("Using tile template {}", template),
    }
}
