use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of products the product stage must return.
pub const PRODUCT_COUNT: usize = 3;
/// Number of competitors the competitor stage must return.
pub const COMPETITOR_COUNT: usize = 5;
/// Number of lead slots filled per run.
pub const LEAD_SLOTS: usize = 5;

// ============ Input ============

/// Sparse input record: a company name plus an optional partial tax ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStub {
    /// Company name as known by the caller.
    pub name: String,
    /// Partial CNPJ (any subset of its digits, punctuation allowed).
    #[serde(default)]
    pub partial_tax_id: Option<String>,
}

impl ClientStub {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partial_tax_id: None,
        }
    }

    pub fn with_partial_tax_id(mut self, partial: impl Into<String>) -> Self {
        self.partial_tax_id = Some(partial.into());
        self
    }
}

// ============ Stage outputs ============

/// Stage identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Client,
    Market,
    Products,
    Competitors,
    Leads,
}

impl StageId {
    /// All stages in execution order.
    pub const ALL: [StageId; 5] = [
        StageId::Client,
        StageId::Market,
        StageId::Products,
        StageId::Competitors,
        StageId::Leads,
    ];

    /// Critical stages abort the run when they fail.
    pub fn is_critical(&self) -> bool {
        matches!(self, StageId::Client | StageId::Market)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Client => "client",
            StageId::Market => "market",
            StageId::Products => "products",
            StageId::Competitors => "competitors",
            StageId::Leads => "leads",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client after stage 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedClient {
    /// Company name.
    pub name: String,
    /// Formatted CNPJ, null when it could not be verified.
    pub tax_id: Option<String>,
    /// Normalized website URL, null when it could not be verified.
    pub website: Option<String>,
    /// City of the headquarters.
    pub city: String,
    /// Two-letter state code (UF).
    pub state: String,
    /// Business sector.
    pub sector: String,
    /// Short description of the business.
    pub description: String,
}

/// Market segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segmentation {
    B2B,
    B2C,
    B2B2C,
}

/// The client's market after stage 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMarket {
    /// Market name.
    pub name: String,
    /// Market category.
    pub category: String,
    /// B2B, B2C or B2B2C.
    pub segmentation: Segmentation,
    /// Estimated market size, free text (e.g. "R$ 12 bi").
    pub estimated_size: String,
    /// Annual growth, free text (e.g. "8% a.a.").
    pub annual_growth: String,
    /// Market trends (3 to 5 expected).
    pub trends: Vec<String>,
    /// Principal players, ordered by salience (5 to 10 expected).
    pub principal_players: Vec<String>,
}

/// One of the client's top products, significance-ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub description: String,
    pub target_audience: String,
    /// Two or three differentiators.
    pub differentiators: Vec<String>,
}

/// A direct competitor of the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    pub tax_id: Option<String>,
    pub website: Option<String>,
    /// Empty when the model could not place the company.
    pub city: String,
    /// Empty when the model could not place the company.
    pub state: String,
    pub main_product: String,
}

/// Provenance of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadOrigin {
    /// Reused from the market's principal players.
    MarketPlayer,
    /// Produced by fresh generation.
    FreshGeneration,
}

/// A sales lead for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub tax_id: Option<String>,
    pub website: Option<String>,
    pub city: String,
    pub state: String,
    pub interest_product: String,
    pub origin: LeadOrigin,
}

/// Lead as parsed from the model, before provenance is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadDraft {
    pub name: String,
    pub tax_id: Option<String>,
    pub website: Option<String>,
    pub city: String,
    pub state: String,
    pub interest_product: String,
}

impl LeadDraft {
    pub fn into_lead(self, origin: LeadOrigin) -> Lead {
        Lead {
            name: self.name,
            tax_id: self.tax_id,
            website: self.website,
            city: self.city,
            state: self.state,
            interest_product: self.interest_product,
            origin,
        }
    }
}

/// Typed output of one stage contract.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Client(EnrichedClient),
    Market(EnrichedMarket),
    Products(Vec<Product>),
    Competitors(Vec<Competitor>),
    Leads(Vec<LeadDraft>),
}

impl StageResult {
    pub fn into_client(self) -> Option<EnrichedClient> {
        match self {
            StageResult::Client(client) => Some(client),
            _ => None,
        }
    }

    pub fn into_market(self) -> Option<EnrichedMarket> {
        match self {
            StageResult::Market(market) => Some(market),
            _ => None,
        }
    }

    pub fn into_products(self) -> Option<Vec<Product>> {
        match self {
            StageResult::Products(products) => Some(products),
            _ => None,
        }
    }

    pub fn into_competitors(self) -> Option<Vec<Competitor>> {
        match self {
            StageResult::Competitors(competitors) => Some(competitors),
            _ => None,
        }
    }

    pub fn into_leads(self) -> Option<Vec<LeadDraft>> {
        match self {
            StageResult::Leads(leads) => Some(leads),
            _ => None,
        }
    }
}

// ============ Quality & reuse ============

/// Completeness/correctness score of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QualityReport {
    /// 0..=100.
    pub score: u8,
    pub fields_filled: u32,
    pub fields_total: u32,
    /// Human-readable shortfalls.
    pub findings: Vec<String>,
}

/// Closed-loop reuse bookkeeping for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReuseStats {
    /// Market players left after excluding the client.
    pub candidate_pool: usize,
    /// Candidates left after competitors claimed theirs.
    pub leftover: usize,
    pub market_player_leads: usize,
    pub fresh_leads: usize,
    /// Share of leads reused from the market (0.0..=1.0).
    pub reuse_rate: f64,
}

impl ReuseStats {
    pub fn from_leads(candidate_pool: usize, leftover: usize, leads: &[Lead]) -> Self {
        let market_player_leads = leads
            .iter()
            .filter(|l| l.origin == LeadOrigin::MarketPlayer)
            .count();
        let fresh_leads = leads.len() - market_player_leads;
        let reuse_rate = if leads.is_empty() {
            0.0
        } else {
            market_player_leads as f64 / leads.len() as f64
        };
        Self {
            candidate_pool,
            leftover,
            market_player_leads,
            fresh_leads,
            reuse_rate,
        }
    }
}

// ============ Stage ledger ============

/// What happened to a stage during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage was never started.
    NotRun,
    Completed { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    pub status: StageStatus,
}

/// Per-stage ledger, always holding one entry per stage in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLedger(pub Vec<StageReport>);

impl Default for StageLedger {
    fn default() -> Self {
        Self(
            StageId::ALL
                .iter()
                .map(|stage| StageReport {
                    stage: *stage,
                    status: StageStatus::NotRun,
                })
                .collect(),
        )
    }
}

impl StageLedger {
    pub fn set(&mut self, stage: StageId, status: StageStatus) {
        if let Some(report) = self.0.iter_mut().find(|r| r.stage == stage) {
            report.status = status;
        }
    }

    pub fn status(&self, stage: StageId) -> &StageStatus {
        self.0
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.status)
            .unwrap_or(&StageStatus::NotRun)
    }

    pub fn ran(&self, stage: StageId) -> bool {
        !matches!(self.status(stage), StageStatus::NotRun)
    }
}

// ============ Run results ============

/// Result of a run in which both critical stages completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentBundle {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub stub: ClientStub,
    pub client: EnrichedClient,
    pub market: EnrichedMarket,
    pub products: Vec<Product>,
    pub competitors: Vec<Competitor>,
    pub leads: Vec<Lead>,
    pub stages: StageLedger,
    pub reuse: ReuseStats,
    /// Pipeline-level findings (stage failures, dedup drops, shortfalls).
    pub notes: Vec<String>,
    /// Computed from the fields above; refresh with
    /// [`EnrichmentBundle::refresh_quality`] after mutating the bundle.
    pub quality: QualityReport,
}

impl EnrichmentBundle {
    /// Recomputes the quality report from the current bundle contents.
    pub fn refresh_quality(&mut self) {
        self.quality = crate::quality::score(self);
    }
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Stage at which the run stopped.
    pub stage: StageId,
    /// Short reason, e.g. "market stage failed".
    pub reason: String,
    /// Underlying error text.
    pub detail: String,
}

/// Result of a run aborted by a critical-stage failure or cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialBundle {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub stub: ClientStub,
    pub client: Option<EnrichedClient>,
    pub market: Option<EnrichedMarket>,
    pub products: Option<Vec<Product>>,
    pub competitors: Option<Vec<Competitor>>,
    pub leads: Option<Vec<Lead>>,
    pub stages: StageLedger,
    pub notes: Vec<String>,
    pub failure: RunFailure,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Complete(EnrichmentBundle),
    Partial(PartialBundle),
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Complete(_))
    }

    pub fn bundle(&self) -> Option<&EnrichmentBundle> {
        match self {
            RunOutcome::Complete(bundle) => Some(bundle),
            RunOutcome::Partial(_) => None,
        }
    }

    pub fn partial(&self) -> Option<&PartialBundle> {
        match self {
            RunOutcome::Complete(_) => None,
            RunOutcome::Partial(partial) => Some(partial),
        }
    }

    pub fn stages(&self) -> &StageLedger {
        match self {
            RunOutcome::Complete(bundle) => &bundle.stages,
            RunOutcome::Partial(partial) => &partial.stages,
        }
    }
}

// ============ Geocoding ============

/// Confidence of a geocoding match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Maps a provider location type to a confidence level.
    pub fn from_location_type(location_type: &str) -> Self {
        match location_type {
            "ROOFTOP" => Confidence::High,
            "RANGE_INTERPOLATED" | "GEOMETRIC_CENTER" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: String,
    pub confidence: Confidence,
}

/// Kind of entity a geocode record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Competitor,
    Lead,
}

/// An entity lacking coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeRecord {
    pub id: String,
    #[serde(default = "default_entity_kind")]
    pub kind: EntityKind,
    pub city: String,
    pub state: String,
}

fn default_entity_kind() -> EntityKind {
    EntityKind::Client
}

/// Per-record geocoding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeoError {
    /// City or state missing on the record.
    InvalidRecord { message: String },
    /// The provider found nothing for the query.
    NoResults { status: String },
    /// The provider answered with a point outside the configured envelope.
    OutOfBounds { latitude: f64, longitude: f64 },
    /// The provider refused the request (quota, key, ...).
    Provider { status: String, message: String },
    /// Network failure or timeout.
    Transport { message: String },
    /// The provider breaker is open; no call was made.
    CircuitOpen,
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::InvalidRecord { message } => write!(f, "invalid record: {}", message),
            GeoError::NoResults { status } => write!(f, "no results ({})", status),
            GeoError::OutOfBounds {
                latitude,
                longitude,
            } => write!(
                f,
                "coordinate ({}, {}) outside the expected bounding box",
                latitude, longitude
            ),
            GeoError::Provider { status, message } => {
                write!(f, "provider error {}: {}", status, message)
            }
            GeoError::Transport { message } => write!(f, "transport error: {}", message),
            GeoError::CircuitOpen => write!(f, "geocoding provider circuit open"),
        }
    }
}

/// Per-record result of a geocoding batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeOutcome {
    pub id: String,
    pub kind: EntityKind,
    pub result: Result<GeoCoordinate, GeoError>,
}

impl GeocodeOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}
