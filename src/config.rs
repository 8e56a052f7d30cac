use crate::models::StageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Latitude/longitude envelope accepted for geocoded coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Mainland Brazil plus a small margin.
    pub const BRAZIL: BoundingBox = BoundingBox {
        min_lat: -33.8,
        max_lat: 5.3,
        min_lng: -74.0,
        max_lng: -34.7,
    };

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_lat
            && latitude <= self.max_lat
            && longitude >= self.min_lng
            && longitude <= self.max_lng
    }

    /// Parses `min_lat,max_lat,min_lng,max_lng`.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| anyhow::anyhow!("GEOCODING_BOUNDS must be four comma-separated numbers"))?;
        if parts.len() != 4 {
            anyhow::bail!("GEOCODING_BOUNDS must be min_lat,max_lat,min_lng,max_lng");
        }
        let bounds = Self {
            min_lat: parts[0],
            max_lat: parts[1],
            min_lng: parts[2],
            max_lng: parts[3],
        };
        if bounds.min_lat >= bounds.max_lat || bounds.min_lng >= bounds.max_lng {
            anyhow::bail!("GEOCODING_BOUNDS minimums must be below maximums");
        }
        if !(-90.0..=90.0).contains(&bounds.min_lat)
            || !(-90.0..=90.0).contains(&bounds.max_lat)
            || !(-180.0..=180.0).contains(&bounds.min_lng)
            || !(-180.0..=180.0).contains(&bounds.max_lng)
        {
            anyhow::bail!("GEOCODING_BOUNDS out of latitude/longitude range");
        }
        Ok(bounds)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::BRAZIL
    }
}

/// Sampling temperature per stage.
///
/// Defaults favour precision for the client and market stages and broader
/// recall for competitors and leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemperatures(BTreeMap<StageId, f32>);

impl StageTemperatures {
    pub fn get(&self, stage: StageId) -> f32 {
        self.0
            .get(&stage)
            .copied()
            .unwrap_or_else(|| Self::default_for(stage))
    }

    pub fn set(&mut self, stage: StageId, temperature: f32) {
        self.0.insert(stage, temperature);
    }

    fn default_for(stage: StageId) -> f32 {
        match stage {
            StageId::Client => 0.2,
            StageId::Market => 0.3,
            StageId::Products => 0.4,
            StageId::Competitors => 0.6,
            StageId::Leads => 0.7,
        }
    }
}

impl Default for StageTemperatures {
    fn default() -> Self {
        Self(
            StageId::ALL
                .iter()
                .map(|stage| (*stage, Self::default_for(*stage)))
                .collect(),
        )
    }
}

/// Per-run pipeline settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub temperatures: StageTemperatures,
    /// Extra attempts granted to a stage after a transient failure.
    pub max_retries_per_stage: u32,
    /// Deadline for each external call.
    pub call_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temperatures: StageTemperatures::default(),
            max_retries_per_stage: 1,
            call_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub geocoding_base_url: String,
    pub geocoding_api_key: Option<String>,
    pub geocoding_delay: Duration,
    pub geocoding_country: String,
    pub geocoding_bounds: BoundingBox,
    pub pipeline_concurrency: usize,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let llm_timeout = Duration::from_secs(
            std::env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("LLM_TIMEOUT_SECS must be a positive number"))
                .and_then(|secs| {
                    if secs == 0 {
                        anyhow::bail!("LLM_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
        );

        let mut temperatures = StageTemperatures::default();
        for stage in StageId::ALL {
            let key = format!("PIPELINE_TEMPERATURE_{}", stage.as_str().to_uppercase());
            if let Ok(raw) = std::env::var(&key) {
                let value: f32 = raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a number", key))?;
                if !(0.0..=2.0).contains(&value) {
                    anyhow::bail!("{} must be between 0.0 and 2.0", key);
                }
                temperatures.set(stage, value);
            }
        }

        let config = Self {
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            llm_api_key: std::env::var("LLM_API_KEY")
                .map_err(|_| anyhow::anyhow!("LLM_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("LLM_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            llm_model: std::env::var("LLM_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_timeout,
            geocoding_base_url: std::env::var("GEOCODING_BASE_URL")
                .unwrap_or_else(|_| "https://maps.googleapis.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            geocoding_api_key: std::env::var("GEOCODING_API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            geocoding_delay: Duration::from_millis(
                std::env::var("GEOCODING_DELAY_MS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("GEOCODING_DELAY_MS must be a valid number"))?,
            ),
            geocoding_country: std::env::var("GEOCODING_COUNTRY")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Brasil".to_string()),
            geocoding_bounds: match std::env::var("GEOCODING_BOUNDS") {
                Ok(raw) if !raw.trim().is_empty() => BoundingBox::parse(&raw)?,
                _ => BoundingBox::default(),
            },
            pipeline_concurrency: std::env::var("PIPELINE_CONCURRENCY")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("PIPELINE_CONCURRENCY must be a valid number"))
                .and_then(|n| {
                    if n == 0 {
                        anyhow::bail!("PIPELINE_CONCURRENCY must be at least 1");
                    }
                    Ok(n)
                })?,
            pipeline: PipelineConfig {
                temperatures,
                max_retries_per_stage: std::env::var("PIPELINE_MAX_RETRIES")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("PIPELINE_MAX_RETRIES must be a valid number"))?,
                call_timeout: llm_timeout,
            },
        };

        for url in [&config.llm_base_url, &config.geocoding_base_url] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", url);
            }
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("LLM Base URL: {}", config.llm_base_url);
        tracing::debug!("LLM Model: {}", config.llm_model);
        tracing::debug!("Geocoding Base URL: {}", config.geocoding_base_url);
        tracing::debug!(
            "Geocoding delay: {:?}, bounds: {:?}",
            config.geocoding_delay,
            config.geocoding_bounds
        );
        if config.geocoding_api_key.is_none() {
            tracing::warn!("GEOCODING_API_KEY not set, geocoding is unavailable");
        }

        Ok(config)
    }
}
