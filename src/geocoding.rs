//! Geocoding fallback runner.
//!
//! Attaches coordinates to entities that only carry a city and state.
//!
//! Records are processed **sequentially** with a configurable delay between
//! provider calls. This trades batch latency for staying under the provider's
//! rate limits, and is intentional: do not parallelize it. Cache hits skip both
//! the call and the delay.
//!
//! Each record succeeds or fails on its own; a failed record never aborts the
//! batch. A coordinate outside the configured bounding box is an error, since
//! a wrong-country match is worse than none.
use crate::circuit_breaker::{create_geocoding_circuit_breaker, ProviderBreaker};
use crate::config::{BoundingBox, Config};
use crate::errors::{AppError, ResultExt};
use crate::geocode_cache::GeocodeCache;
use crate::geocoding_client::{GeocodeRequest, Geocoder, GoogleGeocodingClient};
use crate::models::*;
use std::sync::Arc;
use std::time::Duration;

/// Sequential geocoder with cache, bounding-box check and provider breaker.
#[derive(Clone)]
pub struct GeocodingRunner {
    geocoder: Arc<dyn Geocoder>,
    cache: GeocodeCache,
    bounds: BoundingBox,
    country: String,
    api_key: String,
    delay: Duration,
    breaker: ProviderBreaker,
}

/// How a single record was resolved.
enum Resolution {
    Cached(GeoCoordinate),
    Fetched(Result<GeoCoordinate, GeoError>),
    Skipped(GeoError),
}

impl GeocodingRunner {
    /// Creates a runner.
    ///
    /// # Arguments
    ///
    /// * `geocoder` - Geocoding adapter.
    /// * `cache` - Cache shared by every batch of this runner.
    /// * `bounds` - Envelope every accepted coordinate must fall in.
    /// * `country` - Country appended to each query and cache key.
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        cache: GeocodeCache,
        bounds: BoundingBox,
        country: impl Into<String>,
    ) -> Self {
        Self {
            geocoder,
            cache,
            bounds,
            country: country.into(),
            api_key: String::new(),
            delay: Duration::from_millis(200),
            breaker: create_geocoding_circuit_breaker(),
        }
    }

    /// Builds a runner over the Google adapter from configuration.
    pub fn from_config(config: &Config, cache: GeocodeCache) -> Result<Self, AppError> {
        let client = GoogleGeocodingClient::new(
            config.geocoding_base_url.clone(),
            Duration::from_secs(10),
        )
        .context("building geocoding client")?;
        let mut runner = Self::new(
            Arc::new(client),
            cache,
            config.geocoding_bounds,
            config.geocoding_country.clone(),
        )
        .with_delay(config.geocoding_delay);
        if let Some(key) = &config.geocoding_api_key {
            runner = runner.with_api_key(key.clone());
        }
        Ok(runner)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Geocodes a batch with the given inter-call delay.
    ///
    /// One outcome per record, in input order.
    pub async fn geocode_batch(
        &self,
        records: &[GeocodeRecord],
        delay_ms: u64,
    ) -> Vec<GeocodeOutcome> {
        self.process(records, &self.api_key, Duration::from_millis(delay_ms))
            .await
    }

    /// Geocodes a batch with a caller-supplied API key and the configured delay.
    pub async fn geocode_missing(
        &self,
        records: &[GeocodeRecord],
        api_key: &str,
    ) -> Vec<GeocodeOutcome> {
        self.process(records, api_key, self.delay).await
    }

    async fn process(
        &self,
        records: &[GeocodeRecord],
        api_key: &str,
        delay: Duration,
    ) -> Vec<GeocodeOutcome> {
        tracing::info!("Geocoding {} records (delay {:?})", records.len(), delay);

        let mut outcomes = Vec::with_capacity(records.len());
        let mut called_provider = false;
        let mut cache_hits = 0usize;

        for record in records {
            let resolution = self
                .resolve(record, api_key, delay, &mut called_provider)
                .await;
            let result = match resolution {
                Resolution::Cached(coordinate) => {
                    cache_hits += 1;
                    Ok(coordinate)
                }
                Resolution::Fetched(result) => result,
                Resolution::Skipped(error) => Err(error),
            };

            match &result {
                Ok(c) => tracing::info!(
                    "✓ Geocoded {} ({}, {}) -> {:.4}, {:.4}",
                    record.id,
                    record.city,
                    record.state,
                    c.latitude,
                    c.longitude
                ),
                Err(e) => tracing::warn!("⚠️ Geocoding failed for {}: {}", record.id, e),
            }

            outcomes.push(GeocodeOutcome {
                id: record.id.clone(),
                kind: record.kind,
                result,
            });
        }

        let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
        tracing::info!(
            "Geocoding batch done: {}/{} succeeded, {} cache hits",
            succeeded,
            outcomes.len(),
            cache_hits
        );
        outcomes
    }

    async fn resolve(
        &self,
        record: &GeocodeRecord,
        api_key: &str,
        delay: Duration,
        called_provider: &mut bool,
    ) -> Resolution {
        let city = record.city.trim();
        let state = record.state.trim();
        if city.is_empty() || state.is_empty() {
            return Resolution::Skipped(GeoError::InvalidRecord {
                message: "city and state are required".to_string(),
            });
        }

        let key = GeocodeCache::key(city, state, &self.country);
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("Geocode cache hit for {}", key);
            return Resolution::Cached(hit);
        }

        if api_key.trim().is_empty() {
            return Resolution::Skipped(GeoError::Provider {
                status: "REQUEST_DENIED".to_string(),
                message: "no geocoding API key configured".to_string(),
            });
        }

        if !self.breaker.is_call_permitted() {
            return Resolution::Skipped(GeoError::CircuitOpen);
        }

        // Politeness delay between consecutive provider calls
        if *called_provider && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        *called_provider = true;

        let request = GeocodeRequest {
            query: format!("{}, {}, {}", city, state, self.country),
            api_key: api_key.to_string(),
        };
        let result = self.call_provider(&request).await;
        if let Ok(coordinate) = &result {
            self.cache.insert(key, coordinate.clone()).await;
        }
        Resolution::Fetched(result)
    }

    async fn call_provider(&self, request: &GeocodeRequest) -> Result<GeoCoordinate, GeoError> {
        let response = match self.geocoder.geocode(request).await {
            Ok(response) => response,
            Err(e) => {
                self.breaker.on_error();
                return Err(GeoError::Transport {
                    message: e.to_string(),
                });
            }
        };

        if !response.is_ok() {
            if response.status == "ZERO_RESULTS" {
                self.breaker.on_success();
                return Err(GeoError::NoResults {
                    status: response.status,
                });
            }
            self.breaker.on_error();
            return Err(GeoError::Provider {
                message: response
                    .error_message
                    .unwrap_or_else(|| "provider rejected the request".to_string()),
                status: response.status,
            });
        }
        self.breaker.on_success();

        let first = response
            .results
            .into_iter()
            .next()
            .ok_or(GeoError::NoResults {
                status: "OK".to_string(),
            })?;

        let (latitude, longitude) = (first.location.lat, first.location.lng);
        if !self.bounds.contains(latitude, longitude) {
            return Err(GeoError::OutOfBounds {
                latitude,
                longitude,
            });
        }

        Ok(GeoCoordinate {
            latitude,
            longitude,
            formatted_address: first.formatted_address,
            confidence: Confidence::from_location_type(&first.location_type),
        })
    }
}

/// Geocode records for every located entity of a bundle.
///
/// Ids are `client`, `competitor:<n>` and `lead:<n>` (zero-based). Entities
/// without both city and state are skipped.
pub fn records_from_bundle(bundle: &EnrichmentBundle) -> Vec<GeocodeRecord> {
    let located = |city: &str, state: &str| !city.trim().is_empty() && !state.trim().is_empty();
    let mut records = Vec::new();

    if located(&bundle.client.city, &bundle.client.state) {
        records.push(GeocodeRecord {
            id: "client".to_string(),
            kind: EntityKind::Client,
            city: bundle.client.city.clone(),
            state: bundle.client.state.clone(),
        });
    }
    for (i, c) in bundle.competitors.iter().enumerate() {
        if located(&c.city, &c.state) {
            records.push(GeocodeRecord {
                id: format!("competitor:{}", i),
                kind: EntityKind::Competitor,
                city: c.city.clone(),
                state: c.state.clone(),
            });
        }
    }
    for (i, l) in bundle.leads.iter().enumerate() {
        if located(&l.city, &l.state) {
            records.push(GeocodeRecord {
                id: format!("lead:{}", i),
                kind: EntityKind::Lead,
                city: l.city.clone(),
                state: l.state.clone(),
            });
        }
    }
    records
}
