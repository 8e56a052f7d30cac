use crate::errors::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Freeform address lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeRequest {
    pub query: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub formatted_address: String,
    pub location: LatLng,
    pub location_type: String,
}

/// Provider answer: `status` is `"OK"` on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResponse {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub results: Vec<GeocodeResult>,
}

impl GeocodeResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, request: &GeocodeRequest) -> Result<GeocodeResponse, AppError>;
}

/// Google Geocoding API client.
#[derive(Clone)]
pub struct GoogleGeocodingClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    formatted_address: String,
    geometry: RawGeometry,
}

#[derive(Debug, Deserialize)]
struct RawGeometry {
    location: LatLng,
    #[serde(default)]
    location_type: String,
}

impl GoogleGeocodingClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::InternalError(format!("Failed to create geocoding client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for GoogleGeocodingClient {
    /// Looks up a freeform address.
    ///
    /// A non-`OK` status is returned as data, not as an error; only transport
    /// and decoding failures produce `Err`.
    async fn geocode(&self, request: &GeocodeRequest) -> Result<GeocodeResponse, AppError> {
        // Build URL with proper parameter encoding to prevent injection attacks
        let url = reqwest::Url::parse_with_params(
            &format!("{}/maps/api/geocode/json", self.base_url),
            &[
                ("address", request.query.as_str()),
                ("key", request.api_key.as_str()),
            ],
        )
        .map_err(|e| AppError::InternalError(format!("Failed to build URL: {}", e)))?;

        // Redact key from logs to prevent credential exposure
        tracing::debug!(
            "Geocoding URL: {}/maps/api/geocode/json?address={}&key=[REDACTED]",
            self.base_url,
            request.query
        );

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(format!("Geocoding request timed out: {}", e))
            } else {
                AppError::ExternalApiError(format!("Geocoding request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Geocoding returned {}: {}",
                status, error_text
            )));
        }

        let raw: RawResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse geocoding response: {}", e))
        })?;

        Ok(GeocodeResponse {
            status: raw.status,
            error_message: raw.error_message,
            results: raw
                .results
                .into_iter()
                .map(|r| GeocodeResult {
                    formatted_address: r.formatted_address,
                    location: r.geometry.location,
                    location_type: r.geometry.location_type,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client =
            GoogleGeocodingClient::new("https://maps.example.com/".into(), Duration::from_secs(5));
        assert_eq!(client.unwrap().base_url, "https://maps.example.com");
    }

    #[test]
    fn test_response_status() {
        let ok = GeocodeResponse {
            status: "OK".into(),
            error_message: None,
            results: vec![],
        };
        assert!(ok.is_ok());
        let zero = GeocodeResponse {
            status: "ZERO_RESULTS".into(),
            ..ok
        };
        assert!(!zero.is_ok());
    }
}
