//! Market-Intelligence Enrichment Library
//!
//! Enriches sparse company records (a name plus an optional partial CNPJ) into
//! a competitive-intelligence bundle: the client itself, its market, its top
//! products, its direct competitors and its sales leads, with geocoordinates
//! attached afterwards.
//!
//! # Modules
//!
//! - `core`: Pipeline logic (orchestrator, templates, dedup, quality).
//! - `integrations`: External service adapters (text generation, geocoding).
//! - `circuit_breaker`: Breaker guarding the geocoding provider.
//! - `config`: Configuration management.
//! - `contracts`: Stage output parsing and structural field validation.
//! - `dedup`: Dedup/reuse engine over market players, competitors and leads.
//! - `errors`: Error handling types.
//! - `geocode_cache`: Process-lifetime geocode cache.
//! - `geocoding`: Sequential geocoding fallback runner.
//! - `geocoding_client`: Geocoding API client.
//! - `llm_client`: Generative-text API client.
//! - `models`: Core data models.
//! - `orchestrator`: Stage orchestrator and caller entrypoints.
//! - `quality`: Quality validator.
//! - `templates`: Stage prompt templates.

pub mod core;
pub mod integrations;

pub mod circuit_breaker;
pub mod config;
pub mod contracts;
pub mod dedup;
pub mod errors;
pub mod geocode_cache;
pub mod geocoding;
pub mod geocoding_client;
pub mod llm_client;
pub mod models;
pub mod orchestrator;
pub mod quality;
pub mod templates;

pub use orchestrator::{enrich, enrich_many, Orchestrator};
