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

//! Client library for the UK food hygiene ratings API.
//!
//! Fetches establishments near a coordinate and shapes them into a GeoJSON
//! point feature collection ready for map rendering. The layers can be used
//! independently:
//!
//! - **Model layer**: [`Establishment`] records as the API returns them
//! - **Feature layer**: [`FeatureCollection`] with one point per establishment
//! - **Client layer**: [`RatingsClient`] with per-attempt timeout, optional
//!   retry with backoff, and cancellation
//!
//! # Quick Start
//!
//! ```no_run
//! use ratings_client::{ClientConfig, RatingsClient};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = RatingsClient::new(ClientConfig::default());
//!     let cancel = CancellationToken::new();
//!
//!     match client.load_feature_collection(-0.1277, 51.5073, &cancel).await {
//!         Ok(features) => println!("{} establishments nearby", features.len()),
//!         Err(e) => eprintln!("fetch failed: {e}"),
//!     }
//! }
//! ```
//!
//! ## Feature Layer Only
//!
//! ```
//! use ratings_client::{EstablishmentsResponse, FeatureCollection};
//!
//! let body = r#"{"establishments":[{"BusinessName":"Chip Shop","RatingValue":"5",
//!     "geocode":{"longitude":"-1.5491","latitude":"53.8008"}}]}"#;
//! let response: EstablishmentsResponse = serde_json::from_str(body).unwrap();
//! let features = FeatureCollection::from_establishments(&response.establishments);
//! assert_eq!(features.len(), 1);
//! ```

pub mod client;
pub mod error;
pub mod establishment;
pub mod features;

pub use client::{ClientConfig, RatingsClient, DEFAULT_API_VERSION, DEFAULT_BASE_URL};
pub use error::FetchError;
pub use establishment::{Establishment, EstablishmentsResponse, Geocode};
pub use features::{Feature, FeatureCollection, FeatureProperties, Geometry};
