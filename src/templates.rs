//! Stage prompt templates.
//!
//! Each template carries its own contract: the context fields it needs, the
//! output fields it requires, the cardinality it enforces, and the
//! null-over-fabrication rule for identifying fields. Rendering goes through
//! [`render`], a single `{{field}}` substitution.
use crate::contracts::{self, ParseContext};
use crate::errors::AppError;
use crate::models::{StageId, StageResult};
use std::collections::BTreeMap;
use std::fmt;

/// Context values a template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextField {
    ClientName,
    PartialTaxId,
    ClientProfile,
    MarketProfile,
    CandidateProducts,
    CandidatePool,
    SeedPlayers,
    Exclusions,
    SlotCount,
}

impl ContextField {
    pub fn placeholder(&self) -> &'static str {
        match self {
            ContextField::ClientName => "client_name",
            ContextField::PartialTaxId => "partial_tax_id",
            ContextField::ClientProfile => "client_profile",
            ContextField::MarketProfile => "market_profile",
            ContextField::CandidateProducts => "candidate_products",
            ContextField::CandidatePool => "candidate_pool",
            ContextField::SeedPlayers => "seed_players",
            ContextField::Exclusions => "exclusions",
            ContextField::SlotCount => "slot_count",
        }
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.placeholder())
    }
}

/// How many items a stage must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// A single object.
    One,
    Exactly(usize),
    /// Exactly the slot count given in the prompt context.
    Requested,
}

/// Which lead request a template renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadMode {
    /// Profile the given market players as leads.
    SeedProfiling,
    /// Generate new leads outside the exclusion list.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct StageTemplate {
    pub stage: StageId,
    pub required_context: &'static [ContextField],
    pub required_fields: &'static [&'static str],
    pub cardinality: Cardinality,
    /// Fields that must be null rather than guessed.
    pub null_when_unverified: &'static [&'static str],
    pub body: &'static str,
}

impl StageTemplate {
    /// Item count the parser must enforce, given the requested slot count.
    pub fn expected_items(&self, slot_count: usize) -> Option<usize> {
        match self.cardinality {
            Cardinality::One => None,
            Cardinality::Exactly(n) => Some(n),
            Cardinality::Requested => Some(slot_count),
        }
    }
}

const NULL_RULE: &str = "If you cannot verify a value with certainty, output null for it. \
Never guess, invent or use placeholders such as \"N/A\" or \"00.000.000/0000-00\".";

static CLIENT_TEMPLATE: StageTemplate = StageTemplate {
    stage: StageId::Client,
    required_context: &[ContextField::ClientName, ContextField::PartialTaxId],
    required_fields: &["name", "city", "state", "sector", "description"],
    cardinality: Cardinality::One,
    null_when_unverified: &["tax_id", "website"],
    body: "You are a Brazilian business intelligence analyst.\n\
Company: {{client_name}}\n\
Known CNPJ digits (may be partial or empty): {{partial_tax_id}}\n\n\
Identify this company and return ONE JSON object with:\n\
- name: official company name\n\
- tax_id: full CNPJ (XX.XXX.XXX/XXXX-XX) consistent with the known digits, or null\n\
- website: official website, or null\n\
- city: headquarters city\n\
- state: two-letter state code (UF)\n\
- sector: business sector\n\
- description: two or three sentences on what the company does\n",
};

static MARKET_TEMPLATE: StageTemplate = StageTemplate {
    stage: StageId::Market,
    required_context: &[ContextField::ClientProfile],
    required_fields: &[
        "name",
        "category",
        "segmentation",
        "estimated_size",
        "annual_growth",
        "trends",
        "principal_players",
    ],
    cardinality: Cardinality::One,
    null_when_unverified: &[],
    body: "You are a market analyst covering Brazil.\n\
Client profile:\n{{client_profile}}\n\n\
Identify the market this client competes in and return ONE JSON object with:\n\
- name, category\n\
- segmentation: exactly one of \"B2B\", \"B2C\", \"B2B2C\"\n\
- estimated_size: market size in Brazil, e.g. \"R$ 12 bi\"\n\
- annual_growth: e.g. \"8% a.a.\"\n\
- trends: 3 to 5 current trends\n\
- principal_players: 5 to 10 real companies in this market, most relevant first, \
excluding the client itself\n",
};

static PRODUCTS_TEMPLATE: StageTemplate = StageTemplate {
    stage: StageId::Products,
    required_context: &[ContextField::ClientProfile, ContextField::MarketProfile],
    required_fields: &["name", "description", "target_audience", "differentiators"],
    cardinality: Cardinality::Exactly(crate::models::PRODUCT_COUNT),
    null_when_unverified: &[],
    body: "You are a product analyst.\n\
Client profile:\n{{client_profile}}\n\
Market:\n{{market_profile}}\n\n\
Return a JSON object {\"products\": [...]} with EXACTLY 3 of the client's main \
products or services, most important first. Each item has:\n\
- name, description, target_audience\n\
- differentiators: 2 or 3 short strings\n",
};

static COMPETITORS_TEMPLATE: StageTemplate = StageTemplate {
    stage: StageId::Competitors,
    required_context: &[
        ContextField::ClientProfile,
        ContextField::MarketProfile,
        ContextField::CandidateProducts,
        ContextField::CandidatePool,
        ContextField::Exclusions,
    ],
    required_fields: &["name", "main_product"],
    cardinality: Cardinality::Exactly(crate::models::COMPETITOR_COUNT),
    null_when_unverified: &["tax_id", "website"],
    body: "You are a competitive intelligence analyst covering Brazil.\n\
Client profile:\n{{client_profile}}\n\
Market:\n{{market_profile}}\n\
Products in scope: {{candidate_products}}\n\
Known market players (advisory, use only if they truly compete): {{candidate_pool}}\n\
Never list these companies: {{exclusions}}\n\n\
Return a JSON object {\"competitors\": [...]} with EXACTLY 5 direct competitors. \
Each item has:\n\
- name\n\
- tax_id: CNPJ or null\n\
- website: or null\n\
- city, state (two-letter UF)\n\
- main_product: the product that competes with the client\n",
};

static SEED_LEADS_TEMPLATE: StageTemplate = StageTemplate {
    stage: StageId::Leads,
    required_context: &[
        ContextField::ClientProfile,
        ContextField::CandidateProducts,
        ContextField::SeedPlayers,
        ContextField::SlotCount,
    ],
    required_fields: &["name", "interest_product"],
    cardinality: Cardinality::Requested,
    null_when_unverified: &["tax_id", "website"],
    body: "You are a B2B sales prospector covering Brazil.\n\
Client profile:\n{{client_profile}}\n\
Client products: {{candidate_products}}\n\n\
Profile EACH of these {{slot_count}} companies as a sales lead for the client, \
keeping their names exactly as written: {{seed_players}}\n\n\
Return a JSON object {\"leads\": [...]} with EXACTLY {{slot_count}} items, one per \
company above. Each item has:\n\
- name\n\
- tax_id: CNPJ or null\n\
- website: or null\n\
- city, state (two-letter UF)\n\
- interest_product: which client product this company would buy\n",
};

static FRESH_LEADS_TEMPLATE: StageTemplate = StageTemplate {
    stage: StageId::Leads,
    required_context: &[
        ContextField::ClientProfile,
        ContextField::CandidateProducts,
        ContextField::Exclusions,
        ContextField::SlotCount,
    ],
    required_fields: &["name", "interest_product"],
    cardinality: Cardinality::Requested,
    null_when_unverified: &["tax_id", "website"],
    body: "You are a B2B sales prospector covering Brazil.\n\
Client profile:\n{{client_profile}}\n\
Client products: {{candidate_products}}\n\
Never list these companies (client, competitors, existing leads): {{exclusions}}\n\n\
Return a JSON object {\"leads\": [...]} with EXACTLY {{slot_count}} real companies \
likely to buy from the client. Each item has:\n\
- name\n\
- tax_id: CNPJ or null\n\
- website: or null\n\
- city, state (two-letter UF)\n\
- interest_product: which client product this company would buy\n",
};

/// Returns the template for a stage. The lead stage uses `lead_mode`.
pub fn template(stage: StageId, lead_mode: LeadMode) -> &'static StageTemplate {
    match stage {
        StageId::Client => &CLIENT_TEMPLATE,
        StageId::Market => &MARKET_TEMPLATE,
        StageId::Products => &PRODUCTS_TEMPLATE,
        StageId::Competitors => &COMPETITORS_TEMPLATE,
        StageId::Leads => match lead_mode {
            LeadMode::SeedProfiling => &SEED_LEADS_TEMPLATE,
            LeadMode::Fresh => &FRESH_LEADS_TEMPLATE,
        },
    }
}

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    values: BTreeMap<ContextField, String>,
    partial_tax_id: Option<String>,
    slot_count: usize,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: ContextField, value: impl Into<String>) -> Self {
        self.values.insert(field, value.into());
        self
    }

    /// Joins a list for prompt display; an empty list renders as "(none)".
    pub fn with_list(self, field: ContextField, items: &[String]) -> Self {
        let value = if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join("; ")
        };
        self.with(field, value)
    }

    pub fn with_partial_tax_id(mut self, partial: Option<&str>) -> Self {
        self.partial_tax_id = partial
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let shown = self.partial_tax_id.clone().unwrap_or_default();
        self.with(ContextField::PartialTaxId, shown)
    }

    pub fn with_slot_count(mut self, slots: usize) -> Self {
        self.slot_count = slots;
        self.with(ContextField::SlotCount, slots.to_string())
    }

    pub fn get(&self, field: ContextField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn parse_context(&self, template: &StageTemplate) -> ParseContext<'_> {
        ParseContext {
            partial_tax_id: self.partial_tax_id.as_deref(),
            expected_items: template.expected_items(self.slot_count),
        }
    }
}

/// Substitutes every `{{field}}` the template declares; fails on a missing value.
pub fn render(template: &StageTemplate, ctx: &PromptContext) -> Result<String, AppError> {
    let mut rendered = template.body.to_string();
    for field in template.required_context {
        let value = ctx.get(*field).ok_or_else(|| {
            AppError::InternalError(format!(
                "{} template needs context field `{}`",
                template.stage, field
            ))
        })?;
        rendered = rendered.replace(&format!("{{{{{}}}}}", field.placeholder()), value);
    }

    let mut contract = format!(
        "\nRules:\n- Respond with JSON only, no commentary.\n- Required fields: {}.\n",
        template.required_fields.join(", ")
    );
    match template.cardinality {
        Cardinality::One => {}
        Cardinality::Exactly(n) => {
            contract.push_str(&format!("- Return exactly {} items, no more, no fewer.\n", n))
        }
        Cardinality::Requested => contract.push_str(&format!(
            "- Return exactly {} items, no more, no fewer.\n",
            ctx.slot_count()
        )),
    }
    if !template.null_when_unverified.is_empty() {
        contract.push_str(&format!(
            "- {} Applies to: {}.\n",
            NULL_RULE,
            template.null_when_unverified.join(", ")
        ));
    }
    rendered.push_str(&contract);
    Ok(rendered)
}

/// Renders the prompt for a stage.
pub fn build(stage: StageId, lead_mode: LeadMode, ctx: &PromptContext) -> Result<String, AppError> {
    render(template(stage, lead_mode), ctx)
}

/// Parses model output against the contract of the template that produced
/// the prompt; the item count comes from the template's cardinality.
pub fn parse(
    stage: StageId,
    lead_mode: LeadMode,
    raw: &str,
    ctx: &PromptContext,
) -> Result<StageResult, AppError> {
    let template = template(stage, lead_mode);
    contracts::parse_stage(stage, raw, &ctx.parse_context(template))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_prompt_renders_all_placeholders() {
        let ctx = PromptContext::new()
            .with(ContextField::ClientName, "Acme Corp")
            .with_partial_tax_id(Some("11.222"));
        let prompt = build(StageId::Client, LeadMode::Fresh, &ctx).unwrap();
        assert!(prompt.contains("Company: Acme Corp"));
        assert!(prompt.contains("11.222"));
        assert!(!prompt.contains("{{"));
        assert!(prompt.contains("output null"));
    }

    #[test]
    fn test_missing_context_is_an_error() {
        let ctx = PromptContext::new().with(ContextField::ClientProfile, "Acme");
        let err = build(StageId::Products, LeadMode::Fresh, &ctx).unwrap_err();
        assert!(err.to_string().contains("market_profile"));
    }

    #[test]
    fn test_requested_cardinality_uses_slot_count() {
        let ctx = PromptContext::new()
            .with(ContextField::ClientProfile, "Acme")
            .with(ContextField::CandidateProducts, "ERP")
            .with_list(ContextField::Exclusions, &["Acme".to_string()])
            .with_slot_count(2);
        let prompt = build(StageId::Leads, LeadMode::Fresh, &ctx).unwrap();
        assert!(prompt.contains("EXACTLY 2 real companies"));
        assert!(prompt.contains("exactly 2 items"));
    }

    #[test]
    fn test_empty_list_renders_none() {
        let ctx = PromptContext::new().with_list(ContextField::CandidatePool, &[]);
        assert_eq!(ctx.get(ContextField::CandidatePool), Some("(none)"));
    }

    #[test]
    fn test_market_template_has_no_null_rule() {
        let tpl = template(StageId::Market, LeadMode::Fresh);
        assert!(tpl.null_when_unverified.is_empty());
        assert_eq!(tpl.cardinality, Cardinality::One);
    }

    #[test]
    fn test_parse_enforces_template_cardinality() {
        let lead = r#"{"name":"Beta","interest_product":"ERP"}"#;
        let two = format!(r#"{{"leads":[{},{}]}}"#, lead, lead);

        let asked_two = PromptContext::new().with_slot_count(2);
        let asked_three = PromptContext::new().with_slot_count(3);
        assert!(parse(StageId::Leads, LeadMode::Fresh, &two, &asked_two).is_ok());
        assert!(parse(StageId::Leads, LeadMode::SeedProfiling, &two, &asked_three).is_err());

        let products = template(StageId::Products, LeadMode::Fresh);
        assert_eq!(products.expected_items(0), Some(crate::models::PRODUCT_COUNT));
        let competitors = template(StageId::Competitors, LeadMode::Fresh);
        assert_eq!(competitors.expected_items(2), Some(crate::models::COMPETITOR_COUNT));
        assert_eq!(template(StageId::Client, LeadMode::Fresh).expected_items(4), None);
    }
}
