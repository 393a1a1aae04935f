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

//! Establishment records as returned by the ratings API.

use serde::{Deserialize, Deserializer};

/// Top-level body of `GET /Establishments`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstablishmentsResponse {
    #[serde(default)]
    pub establishments: Vec<Establishment>,
}

/// A single rated business.
#[derive(Debug, Clone, Deserialize)]
pub struct Establishment {
    #[serde(rename = "BusinessName", default, deserialize_with = "null_as_default")]
    pub business_name: String,

    /// Rating value or category code ("5", "Exempt", "AwaitingInspection", ...)
    #[serde(rename = "RatingValue", default, deserialize_with = "null_as_default")]
    pub rating_value: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub geocode: Geocode,
}

/// Coordinate pair in degrees.
///
/// The API is inconsistent about the encoding: values arrive as JSON numbers,
/// numeric strings, or `null`. Anything that is not a number is stored as
/// `NaN` so every record still maps to exactly one feature.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Geocode {
    #[serde(default = "nan", deserialize_with = "lenient_degrees")]
    pub longitude: f64,

    #[serde(default = "nan", deserialize_with = "lenient_degrees")]
    pub latitude: f64,
}

impl Default for Geocode {
    fn default() -> Self {
        Self {
            longitude: f64::NAN,
            latitude: f64::NAN,
        }
    }
}

impl Geocode {
    /// Both components are finite numbers
    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite()
    }
}

fn nan() -> f64 {
    f64::NAN
}

/// Treat an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_degrees<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Missing(()),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(value)) => value,
        Some(Raw::Text(text)) => text.trim().parse().unwrap_or(f64::NAN),
        Some(Raw::Missing(())) | None => f64::NAN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_geocode() {
        let json = r#"{
            "establishments": [
                {
                    "BusinessName": "Golden Dragon",
                    "RatingValue": "5",
                    "geocode": { "longitude": -0.1277, "latitude": 51.5073 }
                }
            ]
        }"#;

        let response: EstablishmentsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.establishments.len(), 1);

        let place = &response.establishments[0];
        assert_eq!(place.business_name, "Golden Dragon");
        assert_eq!(place.rating_value, "5");
        assert!((place.geocode.longitude + 0.1277).abs() < 1e-9);
        assert!((place.geocode.latitude - 51.5073).abs() < 1e-9);
    }

    #[test]
    fn test_parse_string_geocode() {
        let json = r#"{
            "BusinessName": "Chip Shop",
            "RatingValue": "Exempt",
            "geocode": { "longitude": "-1.5491", "latitude": "53.8008" }
        }"#;

        let place: Establishment = serde_json::from_str(json).unwrap();
        assert!(place.geocode.is_valid());
        assert!((place.geocode.longitude + 1.5491).abs() < 1e-9);
    }

    #[test]
    fn test_null_geocode_is_nan() {
        let json = r#"{
            "BusinessName": "Pop-up Stall",
            "RatingValue": "AwaitingInspection",
            "geocode": { "longitude": null, "latitude": null }
        }"#;

        let place: Establishment = serde_json::from_str(json).unwrap();
        assert!(place.geocode.longitude.is_nan());
        assert!(place.geocode.latitude.is_nan());
        assert!(!place.geocode.is_valid());
    }

    #[test]
    fn test_null_fields_do_not_drop_response() {
        let json = r#"{
            "establishments": [
                { "BusinessName": "A", "RatingValue": "5", "geocode": { "longitude": -0.12, "latitude": 51.5 } },
                { "BusinessName": "B", "RatingValue": "5", "geocode": null },
                { "BusinessName": null, "RatingValue": null },
                { "BusinessName": "D", "RatingValue": "Exempt" }
            ]
        }"#;

        let response: EstablishmentsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.establishments.len(), 4);

        let places = &response.establishments;
        assert!(places[0].geocode.is_valid());
        assert!(!places[1].geocode.is_valid());
        assert_eq!(places[2].business_name, "");
        assert_eq!(places[2].rating_value, "");
        assert!(!places[3].geocode.is_valid());
    }

    #[test]
    fn test_missing_establishments_key() {
        let response: EstablishmentsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.establishments.is_empty());
    }

    #[test]
    fn test_wrong_shape_is_error() {
        let result: Result<EstablishmentsResponse, _> =
            serde_json::from_str(r#"{ "establishments": 42 }"#);
        assert!(result.is_err());
    }
}
