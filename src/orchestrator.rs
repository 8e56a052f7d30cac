//! Stage orchestrator.
//!
//! Runs the five enrichment stages in order, threading each stage's validated
//! output into the next prompt:
//!
//! 1. Client enrichment (critical)
//! 2. Market identification (critical)
//! 3. Product extraction
//! 4. Competitor extraction, after reconciling the market's players
//! 5. Lead extraction: leftover players are profiled first, fresh generation
//!    fills the remaining slots
//!
//! The quality validator scores the finished bundle. Every failure is folded
//! into the returned [`RunOutcome`]; nothing escapes as an error.
use crate::config::PipelineConfig;
use crate::dedup::{self, ExclusionSet, NameKey, Rejection};
use crate::errors::AppError;
use crate::llm_client::{GenerationRequest, TextGenerator};
use crate::models::*;
use crate::templates::{self, ContextField, LeadMode, PromptContext};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Fresh lead requests per run: the first request plus two top-up rounds.
const FRESH_LEAD_ROUNDS: usize = 3;

/// Accumulating state of one run.
struct RunState {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    stub: ClientStub,
    client: Option<EnrichedClient>,
    market: Option<EnrichedMarket>,
    products: Option<Vec<Product>>,
    competitors: Option<Vec<Competitor>>,
    leads: Option<Vec<Lead>>,
    stages: StageLedger,
    notes: Vec<String>,
}

impl RunState {
    fn new(stub: &ClientStub) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            stub: stub.clone(),
            client: None,
            market: None,
            products: None,
            competitors: None,
            leads: None,
            stages: StageLedger::default(),
            notes: Vec::new(),
        }
    }

    fn abort(self, failure: RunFailure) -> RunOutcome {
        tracing::error!(
            "❌ Run {} stopped at {} stage: {} ({})",
            self.run_id,
            failure.stage,
            failure.reason,
            failure.detail
        );
        RunOutcome::Partial(PartialBundle {
            run_id: self.run_id,
            generated_at: self.generated_at,
            stub: self.stub,
            client: self.client,
            market: self.market,
            products: self.products,
            competitors: self.competitors,
            leads: self.leads,
            stages: self.stages,
            notes: self.notes,
            failure,
        })
    }

    fn fail_critical(self, stage: StageId, error: &AppError) -> RunOutcome {
        self.abort(RunFailure {
            stage,
            reason: format!("{} stage failed", stage),
            detail: error.to_string(),
        })
    }

    /// Folds a stage failure into the run. A critical stage ends it with the
    /// returned outcome; any other stage leaves a note and the run goes on.
    fn stage_failed(mut self, stage: StageId, error: &AppError) -> Result<Self, RunOutcome> {
        if stage.is_critical() {
            return Err(self.fail_critical(stage, error));
        }
        tracing::warn!("⚠️ Continuing without {} stage: {}", stage, error);
        self.notes.push(format!("{} stage failed: {}", stage, error));
        Ok(self)
    }

    fn cancel(self, stage: StageId, reason: String) -> RunOutcome {
        let detail = AppError::Cancelled(reason.clone()).to_string();
        self.abort(RunFailure {
            stage,
            reason,
            detail,
        })
    }
}

/// Result of one stage call with its retry count.
struct StageCall<T> {
    result: Result<T, AppError>,
    attempts: u32,
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

fn client_profile(client: &EnrichedClient) -> String {
    format!(
        "Name: {}\nSector: {}\nLocation: {}/{}\nDescription: {}",
        client.name, client.sector, client.city, client.state, client.description
    )
}

fn market_profile(market: &EnrichedMarket) -> String {
    format!(
        "Name: {}\nCategory: {}\nSegmentation: {:?}\nEstimated size: {}\nAnnual growth: {}\nTrends: {}",
        market.name,
        market.category,
        market.segmentation,
        market.estimated_size,
        market.annual_growth,
        market.trends.join("; ")
    )
}

/// Sequences the enrichment stages against a text generator.
#[derive(Clone)]
pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self { generator, config }
    }

    /// Runs the pipeline for one stub without external cancellation.
    pub async fn run(&self, stub: &ClientStub) -> RunOutcome {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_with_cancel(stub, &cancel_rx).await
    }

    /// Runs the pipeline, checking `cancel` at every stage boundary.
    ///
    /// An in-flight call is never aborted; once `true` is observed no further
    /// stage (or lead sub-request) is started and a [`PartialBundle`] is
    /// returned.
    pub async fn run_with_cancel(
        &self,
        stub: &ClientStub,
        cancel: &watch::Receiver<bool>,
    ) -> RunOutcome {
        let mut state = RunState::new(stub);
        tracing::info!(
            "Starting enrichment run {} for '{}'",
            state.run_id,
            stub.name.trim()
        );

        if stub.name.trim().is_empty() {
            let error = AppError::BadRequest("client name is empty".to_string());
            state.stages.set(
                StageId::Client,
                StageStatus::Failed {
                    attempts: 0,
                    reason: error.to_string(),
                },
            );
            return state.fail_critical(StageId::Client, &error);
        }

        // ---- Stage 1: client ----
        if is_cancelled(cancel) {
            return state.cancel(StageId::Client, "cancelled before client stage".into());
        }
        let ctx = PromptContext::new()
            .with(ContextField::ClientName, stub.name.trim())
            .with_partial_tax_id(stub.partial_tax_id.as_deref());
        let client = match self
            .run_stage(&mut state, StageId::Client, &ctx, StageResult::into_client)
            .await
        {
            Ok(client) => client,
            Err(e) => return state.fail_critical(StageId::Client, &e),
        };
        state.client = Some(client.clone());

        // ---- Stage 2: market ----
        if is_cancelled(cancel) {
            return state.cancel(StageId::Market, "cancelled before market stage".into());
        }
        let client_ctx = client_profile(&client);
        let ctx = PromptContext::new().with(ContextField::ClientProfile, client_ctx.as_str());
        let market = match self
            .run_stage(&mut state, StageId::Market, &ctx, StageResult::into_market)
            .await
        {
            Ok(market) => market,
            Err(e) => return state.fail_critical(StageId::Market, &e),
        };
        state.market = Some(market.clone());
        let market_ctx = market_profile(&market);

        // ---- Stage 3: products ----
        if is_cancelled(cancel) {
            return state.cancel(
                StageId::Products,
                "cancelled before products stage".into(),
            );
        }
        let ctx = PromptContext::new()
            .with(ContextField::ClientProfile, client_ctx.as_str())
            .with(ContextField::MarketProfile, market_ctx.as_str());
        let products = match self
            .run_stage(&mut state, StageId::Products, &ctx, StageResult::into_products)
            .await
        {
            Ok(products) => products,
            Err(e) => {
                state = match state.stage_failed(StageId::Products, &e) {
                    Ok(state) => state,
                    Err(outcome) => return outcome,
                };
                Vec::new()
            }
        };
        state.products = Some(products.clone());
        let product_names: Vec<String> = products.iter().map(|p| p.name.clone()).collect();

        // ---- Reconcile market players ----
        let mut exclusions = ExclusionSet::for_client(&client.name);
        exclusions.insert(&stub.name);
        let reconciliation = dedup::reconcile(&market.principal_players, &exclusions);
        for excluded in &reconciliation.excluded {
            tracing::debug!("Market player '{}' is the client, excluded", excluded);
        }

        // ---- Stage 4: competitors ----
        if is_cancelled(cancel) {
            return state.cancel(
                StageId::Competitors,
                "cancelled before competitors stage".into(),
            );
        }
        let ctx = PromptContext::new()
            .with(ContextField::ClientProfile, client_ctx.as_str())
            .with(ContextField::MarketProfile, market_ctx.as_str())
            .with_list(ContextField::CandidateProducts, &product_names)
            .with_list(ContextField::CandidatePool, &reconciliation.candidate_pool)
            .with_list(ContextField::Exclusions, exclusions.names());
        let competitors = match self
            .run_stage(
                &mut state,
                StageId::Competitors,
                &ctx,
                StageResult::into_competitors,
            )
            .await
        {
            Ok(competitors) => {
                let (accepted, rejected) =
                    dedup::claim_unique(competitors, |c| c.name.as_str(), &mut exclusions);
                for (c, rejection) in &rejected {
                    let why = match rejection {
                        Rejection::Duplicate => "duplicates the client or another competitor",
                        Rejection::EmptyName => "name is empty after normalization",
                    };
                    tracing::warn!("⚠️ Dropping competitor '{}': {}", c.name, why);
                    state.notes.push(format!("competitor '{}' dropped: {}", c.name, why));
                }
                accepted
            }
            Err(e) => {
                state = match state.stage_failed(StageId::Competitors, &e) {
                    Ok(state) => state,
                    Err(outcome) => return outcome,
                };
                Vec::new()
            }
        };
        state.competitors = Some(competitors.clone());

        let leftover = dedup::leftover(&reconciliation.candidate_pool, &exclusions);
        tracing::info!(
            "Reuse pool: {} candidates, {} left after competitors",
            reconciliation.candidate_pool.len(),
            leftover.len()
        );

        // ---- Stage 5: leads ----
        if is_cancelled(cancel) {
            return state.cancel(StageId::Leads, "cancelled before leads stage".into());
        }
        let base_ctx = PromptContext::new()
            .with(ContextField::ClientProfile, client_ctx.as_str())
            .with_list(ContextField::CandidateProducts, &product_names);
        let leads = match self
            .run_lead_stage(&mut state, &base_ctx, &leftover, &mut exclusions, cancel)
            .await
        {
            Ok(leads) => leads,
            Err(leads) => {
                state.leads = Some(leads);
                return state.cancel(StageId::Leads, "cancelled during leads stage".into());
            }
        };

        let reuse = ReuseStats::from_leads(
            reconciliation.candidate_pool.len(),
            leftover.len(),
            &leads,
        );

        let mut bundle = EnrichmentBundle {
            run_id: state.run_id,
            generated_at: state.generated_at,
            stub: state.stub,
            client,
            market,
            products,
            competitors,
            leads,
            stages: state.stages,
            reuse,
            notes: state.notes,
            quality: QualityReport::default(),
        };
        bundle.refresh_quality();

        tracing::info!(
            "✓ Run {} complete: score {} ({}/{} fields), {} findings, reuse rate {:.0}%",
            bundle.run_id,
            bundle.quality.score,
            bundle.quality.fields_filled,
            bundle.quality.fields_total,
            bundle.quality.findings.len(),
            bundle.reuse.reuse_rate * 100.0
        );
        RunOutcome::Complete(bundle)
    }

    /// Processes independent stubs with at most `concurrency` runs in flight.
    ///
    /// Outcomes come back in input order.
    pub async fn enrich_many(&self, stubs: &[ClientStub], concurrency: usize) -> Vec<RunOutcome> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.enrich_many_with_cancel(stubs, concurrency, &cancel_rx)
            .await
    }

    /// Like [`Orchestrator::enrich_many`], with one cancellation signal shared
    /// by every run.
    pub async fn enrich_many_with_cancel(
        &self,
        stubs: &[ClientStub],
        concurrency: usize,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<RunOutcome> {
        tracing::info!(
            "Enriching {} stubs with concurrency {}",
            stubs.len(),
            concurrency.max(1)
        );
        stream::iter(stubs.iter().map(|stub| self.run_with_cancel(stub, cancel)))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Runs one single-request stage and records it in the ledger.
    async fn run_stage<T>(
        &self,
        state: &mut RunState,
        stage: StageId,
        ctx: &PromptContext,
        extract: fn(StageResult) -> Option<T>,
    ) -> Result<T, AppError> {
        let call = self.call_stage(stage, LeadMode::Fresh, ctx, extract).await;
        match &call.result {
            Ok(_) => state.stages.set(
                stage,
                StageStatus::Completed {
                    attempts: call.attempts,
                },
            ),
            Err(e) => state.stages.set(
                stage,
                StageStatus::Failed {
                    attempts: call.attempts,
                    reason: e.to_string(),
                },
            ),
        }
        call.result
    }

    /// Renders, sends and parses one stage request with the retry policy.
    ///
    /// Transient errors are retried up to `max_retries_per_stage` times. A
    /// contract violation gets at most one extra attempt within that budget.
    async fn call_stage<T>(
        &self,
        stage: StageId,
        lead_mode: LeadMode,
        ctx: &PromptContext,
        extract: fn(StageResult) -> Option<T>,
    ) -> StageCall<T> {
        let prompt = match templates::build(stage, lead_mode, ctx) {
            Ok(prompt) => prompt,
            Err(e) => {
                return StageCall {
                    result: Err(e),
                    attempts: 0,
                }
            }
        };
        let temperature = self.config.temperatures.get(stage);
        let max_attempts = 1 + self.config.max_retries_per_stage;
        let request = GenerationRequest::json(prompt, temperature);

        let mut attempts = 0;
        let mut contract_retry_used = false;
        loop {
            attempts += 1;
            tracing::debug!(
                "Calling {} stage (attempt {}/{}, temperature {})",
                stage,
                attempts,
                max_attempts,
                temperature
            );

            let result = match tokio::time::timeout(
                self.config.call_timeout,
                self.generator.generate(&request),
            )
            .await
            {
                Ok(Ok(response)) => templates::parse(stage, lead_mode, &response.raw_text, ctx).and_then(
                    |parsed| {
                        extract(parsed).ok_or_else(|| {
                            AppError::InternalError(format!(
                                "{} stage produced a mismatched result",
                                stage
                            ))
                        })
                    },
                ),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AppError::Timeout(format!(
                    "{} stage call exceeded {}s",
                    stage,
                    self.config.call_timeout.as_secs_f64()
                ))),
            };

            match result {
                Ok(value) => {
                    tracing::info!("✓ {} stage succeeded after {} attempt(s)", stage, attempts);
                    return StageCall {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => {
                    let retryable = if e.is_transient() {
                        true
                    } else if e.is_contract_violation() && !contract_retry_used {
                        contract_retry_used = true;
                        true
                    } else {
                        false
                    };

                    if retryable && attempts < max_attempts {
                        tracing::warn!(
                            "⚠️ {} stage attempt {} failed, retrying: {}",
                            stage,
                            attempts,
                            e
                        );
                        continue;
                    }

                    tracing::error!(
                        "❌ {} stage failed after {} attempt(s): {}",
                        stage,
                        attempts,
                        e
                    );
                    return StageCall {
                        result: Err(e),
                        attempts,
                    };
                }
            }
        }
    }

    /// Fills the lead slots: seed profiling of leftover players first, then
    /// fresh generation. Returns `Err` with the leads gathered so far when
    /// cancellation is observed between sub-requests.
    async fn run_lead_stage(
        &self,
        state: &mut RunState,
        base_ctx: &PromptContext,
        leftover: &[String],
        exclusions: &mut ExclusionSet,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<Lead>, Vec<Lead>> {
        let mut leads: Vec<Lead> = Vec::with_capacity(LEAD_SLOTS);
        let mut attempts = 0;
        let mut last_error: Option<AppError> = None;
        // A market player keeps its provenance whichever sub-request returns it
        let players: HashSet<NameKey> = leftover.iter().map(|p| NameKey::new(p)).collect();

        let seeds: Vec<String> = leftover.iter().take(LEAD_SLOTS).cloned().collect();
        if leftover.len() > LEAD_SLOTS {
            tracing::debug!(
                "Discarding {} leftover players beyond the lead slots",
                leftover.len() - LEAD_SLOTS
            );
        }

        if !seeds.is_empty() {
            tracing::info!("Profiling {} market players as leads", seeds.len());
            let ctx = base_ctx
                .clone()
                .with_list(ContextField::SeedPlayers, &seeds)
                .with_slot_count(seeds.len());
            let call = self
                .call_stage(StageId::Leads, LeadMode::SeedProfiling, &ctx, StageResult::into_leads)
                .await;
            attempts += call.attempts;

            match call.result {
                Ok(drafts) => {
                    let seed_keys: HashSet<NameKey> =
                        seeds.iter().map(|s| NameKey::new(s)).collect();
                    let (matching, strangers): (Vec<LeadDraft>, Vec<LeadDraft>) = drafts
                        .into_iter()
                        .partition(|d| seed_keys.contains(&NameKey::new(&d.name)));
                    for d in &strangers {
                        tracing::warn!("⚠️ Dropping lead '{}': not a requested market player", d.name);
                        state.notes.push(format!(
                            "lead '{}' dropped: not one of the requested market players",
                            d.name
                        ));
                    }
                    self.accept_leads(state, matching, &players, exclusions, &mut leads);
                }
                Err(e) => {
                    state.notes.push(format!("market player lead profiling failed: {}", e));
                    last_error = Some(e);
                }
            }
        }

        let mut rounds = 0;
        while leads.len() < LEAD_SLOTS && rounds < FRESH_LEAD_ROUNDS {
            if is_cancelled(cancel) {
                state.stages.set(
                    StageId::Leads,
                    StageStatus::Failed {
                        attempts,
                        reason: "cancelled".to_string(),
                    },
                );
                return Err(leads);
            }
            rounds += 1;

            let slots = LEAD_SLOTS - leads.len();
            tracing::info!("Requesting {} fresh leads (round {})", slots, rounds);
            let ctx = base_ctx
                .clone()
                .with_list(ContextField::Exclusions, exclusions.names())
                .with_slot_count(slots);
            let call = self
                .call_stage(StageId::Leads, LeadMode::Fresh, &ctx, StageResult::into_leads)
                .await;
            attempts += call.attempts;

            match call.result {
                Ok(drafts) => {
                    self.accept_leads(state, drafts, &players, exclusions, &mut leads);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        match last_error {
            Some(e) if leads.is_empty() => {
                state.notes.push(format!("leads stage failed: {}", e));
                state.stages.set(
                    StageId::Leads,
                    StageStatus::Failed {
                        attempts,
                        reason: e.to_string(),
                    },
                );
            }
            Some(e) => {
                if leads.len() < LEAD_SLOTS {
                    state
                        .notes
                        .push(format!("lead generation stopped early: {}", e));
                }
                state
                    .stages
                    .set(StageId::Leads, StageStatus::Completed { attempts });
            }
            None => state
                .stages
                .set(StageId::Leads, StageStatus::Completed { attempts }),
        }

        state.leads = Some(leads.clone());
        Ok(leads)
    }

    /// Claims lead names against the exclusions and appends the accepted ones.
    ///
    /// A lead whose name is one of the leftover market `players` is tagged
    /// [`LeadOrigin::MarketPlayer`]; anything else is a fresh generation.
    fn accept_leads(
        &self,
        state: &mut RunState,
        drafts: Vec<LeadDraft>,
        players: &HashSet<NameKey>,
        exclusions: &mut ExclusionSet,
        leads: &mut Vec<Lead>,
    ) {
        let room = LEAD_SLOTS - leads.len();
        let (accepted, rejected) = dedup::claim_unique(drafts, |d| d.name.as_str(), exclusions);
        for (d, rejection) in &rejected {
            let why = match rejection {
                Rejection::Duplicate => "duplicates the client, a competitor or another lead",
                Rejection::EmptyName => "name is empty after normalization",
            };
            tracing::warn!("⚠️ Dropping lead '{}': {}", d.name, why);
            state.notes.push(format!("lead '{}' dropped: {}", d.name, why));
        }
        leads.extend(accepted.into_iter().take(room).map(|d| {
            let origin = if players.contains(&NameKey::new(&d.name)) {
                LeadOrigin::MarketPlayer
            } else {
                LeadOrigin::FreshGeneration
            };
            d.into_lead(origin)
        }));
    }
}

/// Caller-facing entrypoint: one run for one stub.
///
/// # Arguments
///
/// * `generator` - Text generation adapter.
/// * `stub` - Company name plus optional partial tax ID.
/// * `config` - Per-stage temperatures, retry budget and call timeout.
///
/// # Returns
///
/// * `RunOutcome` - A complete bundle, or a partial one carrying the failure.
pub async fn enrich(
    generator: Arc<dyn TextGenerator>,
    stub: &ClientStub,
    config: &PipelineConfig,
) -> RunOutcome {
    Orchestrator::new(generator, config.clone()).run(stub).await
}

/// Batch entrypoint: independent runs with bounded concurrency, in input order.
pub async fn enrich_many(
    generator: Arc<dyn TextGenerator>,
    stubs: &[ClientStub],
    config: &PipelineConfig,
    concurrency: usize,
) -> Vec<RunOutcome> {
    Orchestrator::new(generator, config.clone())
        .enrich_many(stubs, concurrency)
        .await
}
