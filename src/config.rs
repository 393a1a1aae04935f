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

//! Application configuration management.
//!
//! Persistent settings are stored as TOML through confy. Every field has a
//! serde default so older or hand-edited files keep loading. The map
//! provider access token may also come from the environment, which takes
//! precedence over the file.

use std::time::Duration;

use log::info;
use ratings_client::{ClientConfig, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use serde::{Deserialize, Serialize};

use crate::engine::{LngLat, LngLatBounds};
use crate::view::{
    ClusterZoomMode, MapViewConfig, DEFAULT_CENTER, DEFAULT_CLUSTER_MAX_ZOOM, DEFAULT_CLUSTER_RADIUS,
    DEFAULT_HOVER_LEAVE_LAYER, DEFAULT_STYLE, DEFAULT_ZOOM, UK_BOUNDS,
};

const APP_NAME: &str = "takeaway-map";
const CONFIG_NAME: &str = "config";

/// Environment variable holding the map provider access token
pub const ACCESS_TOKEN_ENV: &str = "MAPBOX_ACCESS_TOKEN";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Map provider access token (optional, env var takes precedence)
    #[serde(default)]
    pub access_token: Option<String>,

    /// Map style reference or raster URL template
    #[serde(default = "default_style")]
    pub style: String,

    /// Initial map center latitude
    #[serde(default = "default_latitude")]
    pub center_latitude: f64,

    /// Initial map center longitude
    #[serde(default = "default_longitude")]
    pub center_longitude: f64,

    /// Initial zoom level
    #[serde(default = "default_zoom")]
    pub zoom: f64,

    /// Pan limit as `[[west, south], [east, north]]`
    #[serde(default = "default_max_bounds")]
    pub max_bounds: [[f64; 2]; 2],

    /// Cluster radius in pixels
    #[serde(default = "default_cluster_radius")]
    pub cluster_radius: f64,

    /// Highest zoom at which markers are clustered
    #[serde(default = "default_cluster_max_zoom")]
    pub cluster_max_zoom: u8,

    /// "current_plus_one" or "expansion_zoom"
    #[serde(default)]
    pub cluster_zoom_mode: ClusterZoomMode,

    /// Layer whose mouse-leave restores the default cursor
    #[serde(default = "default_hover_leave_layer")]
    pub hover_leave_layer: String,

    /// Ratings API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Value of the `x-api-version` header
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra attempts after a failed fetch (0 disables retry)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds; doubles each time
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

// Default value functions for serde
fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

fn default_latitude() -> f64 {
    DEFAULT_CENTER.lat
}

fn default_longitude() -> f64 {
    DEFAULT_CENTER.lng
}

fn default_zoom() -> f64 {
    DEFAULT_ZOOM
}

fn default_max_bounds() -> [[f64; 2]; 2] {
    UK_BOUNDS.to_corners()
}

fn default_cluster_radius() -> f64 {
    DEFAULT_CLUSTER_RADIUS
}

fn default_cluster_max_zoom() -> u8 {
    DEFAULT_CLUSTER_MAX_ZOOM
}

fn default_hover_leave_layer() -> String {
    DEFAULT_HOVER_LEAVE_LAYER.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            style: default_style(),
            center_latitude: default_latitude(),
            center_longitude: default_longitude(),
            zoom: default_zoom(),
            max_bounds: default_max_bounds(),
            cluster_radius: default_cluster_radius(),
            cluster_max_zoom: default_cluster_max_zoom(),
            cluster_zoom_mode: ClusterZoomMode::default(),
            hover_leave_layer: default_hover_leave_layer(),
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        let config: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;
        Ok(config)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// Access token from the environment if set, otherwise from the file.
    pub fn resolve_access_token(&self) -> Option<String> {
        Self::token_from(std::env::var(ACCESS_TOKEN_ENV).ok(), self.access_token.as_deref())
    }

    fn token_from(env: Option<String>, file: Option<&str>) -> Option<String> {
        if let Some(token) = env.filter(|t| !t.trim().is_empty()) {
            info!("Using map access token from {}", ACCESS_TOKEN_ENV);
            return Some(token);
        }
        file.filter(|t| !t.trim().is_empty()).map(str::to_string)
    }

    /// Explicit configuration for the map view.
    pub fn view_config(&self) -> MapViewConfig {
        MapViewConfig {
            access_token: self.resolve_access_token().unwrap_or_default(),
            style: self.style.clone(),
            center: LngLat::new(self.center_longitude, self.center_latitude),
            zoom: self.zoom,
            max_bounds: LngLatBounds::from_corners(self.max_bounds),
            cluster_radius: self.cluster_radius,
            cluster_max_zoom: self.cluster_max_zoom,
            cluster_zoom_mode: self.cluster_zoom_mode,
            hover_leave_layer: self.hover_leave_layer.clone(),
        }
    }

    /// Settings for the ratings API client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_base_url.clone(),
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_view_defaults() {
        let config = AppConfig::default();
        let view = MapViewConfig {
            access_token: config.view_config().access_token,
            ..MapViewConfig::default()
        };
        assert_eq!(config.view_config(), view);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
                zoom = 9.5
                cluster_zoom_mode = "expansion_zoom"
                hover_leave_layer = "clusters"
            "#,
        )
        .unwrap();

        assert_eq!(config.zoom, 9.5);
        assert_eq!(config.cluster_zoom_mode, ClusterZoomMode::ExpansionZoom);
        assert_eq!(config.hover_leave_layer, "clusters");
        assert_eq!(config.cluster_radius, 80.0);
        assert_eq!(config.max_bounds, UK_BOUNDS.to_corners());
        assert_eq!(config.api_version, "2");
    }

    #[test]
    fn test_round_trip_toml() {
        let mut config = AppConfig::default();
        config.access_token = Some("pk.test".to_string());
        let text = toml::to_string(&config).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_env_token_takes_precedence() {
        assert_eq!(
            AppConfig::token_from(Some("pk.env".to_string()), Some("pk.file")),
            Some("pk.env".to_string())
        );
        assert_eq!(
            AppConfig::token_from(None, Some("pk.file")),
            Some("pk.file".to_string())
        );
        assert_eq!(
            AppConfig::token_from(Some("  ".to_string()), Some("pk.file")),
            Some("pk.file".to_string())
        );
        assert_eq!(AppConfig::token_from(None, Some("")), None);
    }

    #[test]
    fn test_client_config_conversion() {
        let config = AppConfig {
            max_retries: 0,
            request_timeout_secs: 3,
            ..AppConfig::default()
        };
        let client = config.client_config();
        assert_eq!(client.max_retries, 0);
        assert_eq!(client.request_timeout, Duration::from_secs(3));
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
