//! Stage output contracts.
//!
//! Turns raw model text into typed stage results, rejecting anything that is
//! missing a required field, has the wrong cardinality, or carries a clearly
//! malformed identifier.
//!
//! # Trust boundary
//!
//! Only structure is checked here. A well-formed CNPJ, city or website may
//! still be wrong; verifying that would need a ground-truth registry lookup.
use crate::errors::AppError;
use crate::models::*;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

const MAX_TRENDS: usize = 5;
const MAX_PLAYERS: usize = 10;
const MIN_DIFFERENTIATORS: usize = 2;
const MAX_DIFFERENTIATORS: usize = 3;

/// Tokens models use instead of saying "I don't know".
const PLACEHOLDERS: [&str; 16] = [
    "null",
    "none",
    "n/a",
    "na",
    "n.a.",
    "-",
    "--",
    "?",
    "unknown",
    "not available",
    "not found",
    "desconhecido",
    "não informado",
    "nao informado",
    "não disponível",
    "nao disponivel",
];

/// Expectations a parse needs beyond the raw text.
#[derive(Debug, Clone, Default)]
pub struct ParseContext<'a> {
    /// Partial tax ID supplied by the caller, if any.
    pub partial_tax_id: Option<&'a str>,
    /// Exact number of items the stage template asked for. `None` falls back
    /// to the stage's standard count.
    pub expected_items: Option<usize>,
}

/// Whether a value is empty or a known placeholder token.
pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim().to_lowercase();
    trimmed.is_empty() || PLACEHOLDERS.contains(&trimmed.as_str())
}

fn only_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn cnpj_check_digit(digits: &[u32]) -> u32 {
    // Weights run 2..=9 from the rightmost digit leftwards, wrapping.
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| d * (2 + (i as u32 % 8)))
        .sum();
    let rest = sum % 11;
    if rest < 2 {
        0
    } else {
        11 - rest
    }
}

/// Validates a CNPJ structurally and returns it formatted as `XX.XXX.XXX/XXXX-XX`.
///
/// Placeholders normalize to `None`. Anything else must be 14 digits (common
/// punctuation allowed), not a single repeated digit, with both check digits
/// correct.
pub fn normalize_cnpj(raw: &str) -> Result<Option<String>, String> {
    if is_placeholder(raw) {
        return Ok(None);
    }
    if raw
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | '/' | '-' | ' ')))
    {
        return Err(format!("tax ID '{}' contains unexpected characters", raw));
    }
    let digits = only_digits(raw);
    if digits.len() != 14 {
        return Err(format!("tax ID '{}' must have 14 digits", raw));
    }
    let values: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if values.iter().all(|d| *d == values[0]) {
        return Err(format!("tax ID '{}' is a repeated-digit placeholder", raw));
    }
    let first = cnpj_check_digit(&values[..12]);
    let second = cnpj_check_digit(&values[..13]);
    if values[12] != first || values[13] != second {
        return Err(format!("tax ID '{}' has invalid check digits", raw));
    }
    Ok(Some(format!(
        "{}.{}.{}/{}-{}",
        &digits[..2],
        &digits[2..5],
        &digits[5..8],
        &digits[8..12],
        &digits[12..]
    )))
}

/// Returns true when the value is a structurally valid CNPJ.
pub fn is_valid_cnpj(raw: &str) -> bool {
    matches!(normalize_cnpj(raw), Ok(Some(_)))
}

fn host_regex() -> &'static Regex {
    static HOST: OnceLock<Regex> = OnceLock::new();
    HOST.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$")
            .expect("host regex is valid")
    })
}

/// Normalizes a website to an absolute http(s) URL.
///
/// Placeholders normalize to `None`; a missing scheme defaults to `https://`.
pub fn normalize_website(raw: &str) -> Result<Option<String>, String> {
    if is_placeholder(raw) {
        return Ok(None);
    }
    let trimmed = raw.trim();
    if trimmed.contains(char::is_whitespace) {
        return Err(format!("website '{}' contains whitespace", trimmed));
    }
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if trimmed.contains("://") {
        return Err(format!("website '{}' must use http or https", trimmed));
    } else {
        format!("https://{}", trimmed)
    };
    let url = url::Url::parse(&candidate)
        .map_err(|e| format!("website '{}' is not a valid URL: {}", trimmed, e))?;
    let host = url
        .host_str()
        .ok_or_else(|| format!("website '{}' has no host", trimmed))?;
    if !host_regex().is_match(host) {
        return Err(format!("website '{}' has an invalid host", trimmed));
    }
    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        normalized.pop();
    }
    Ok(Some(normalized))
}

/// Validates a two-letter state code and upper-cases it.
pub fn normalize_state(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(format!("state '{}' must be a two-letter code", trimmed))
    }
}

/// Strips markdown fences or prose around the JSON payload.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    match (open, close) {
        (Some(start), Some(end)) if end >= start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn contract(msg: impl Into<String>) -> AppError {
    AppError::ParseError(msg.into())
}

fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !is_placeholder(&v) => Ok(v.trim().to_string()),
        _ => Err(contract(format!("missing required field `{}`", field))),
    }
}

fn optional_text(value: Option<String>) -> String {
    value
        .filter(|v| !is_placeholder(v))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn tax_id(value: Option<String>) -> Result<Option<String>, AppError> {
    match value {
        Some(v) => normalize_cnpj(&v).map_err(contract),
        None => Ok(None),
    }
}

fn website(value: Option<String>) -> Result<Option<String>, AppError> {
    match value {
        Some(v) => normalize_website(&v).map_err(contract),
        None => Ok(None),
    }
}

fn optional_state(value: Option<String>) -> Result<String, AppError> {
    match value.filter(|v| !is_placeholder(v)) {
        Some(v) => normalize_state(&v).map_err(contract),
        None => Ok(String::new()),
    }
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| !is_placeholder(v))
        .map(|v| v.trim().to_string())
        .collect()
}

fn list_payload(raw: &str, key: &str) -> Result<Vec<Value>, AppError> {
    let value: Value = serde_json::from_str(extract_json(raw))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(contract(format!("`{}` must be an array", key))),
            None => Err(contract(format!("missing required field `{}`", key))),
        },
        _ => Err(contract(format!("expected an object with `{}`", key))),
    }
}

fn exact_count<T>(what: &str, items: Vec<T>, expected: usize) -> Result<Vec<T>, AppError> {
    if items.len() != expected {
        return Err(contract(format!(
            "expected exactly {} {}, got {}",
            expected,
            what,
            items.len()
        )));
    }
    Ok(items)
}

// ============ Wire shapes ============

#[derive(Debug, Deserialize)]
struct RawClient {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "taxId", alias = "cnpj")]
    tax_id: Option<String>,
    #[serde(default, alias = "site")]
    website: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default, alias = "uf")]
    state: Option<String>,
    #[serde(default)]
    sector: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    segmentation: Option<String>,
    #[serde(default, alias = "estimatedSize")]
    estimated_size: Option<String>,
    #[serde(default, alias = "annualGrowth")]
    annual_growth: Option<String>,
    #[serde(default)]
    trends: Option<Vec<String>>,
    #[serde(default, alias = "principalPlayers")]
    principal_players: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "targetAudience")]
    target_audience: Option<String>,
    #[serde(default)]
    differentiators: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawCompany {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "taxId", alias = "cnpj")]
    tax_id: Option<String>,
    #[serde(default, alias = "site")]
    website: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default, alias = "uf")]
    state: Option<String>,
    #[serde(default, alias = "mainProduct")]
    main_product: Option<String>,
    #[serde(default, alias = "interestProduct")]
    interest_product: Option<String>,
}

// ============ Stage parsers ============

/// Parses the client stage output.
pub fn parse_client(raw: &str, partial_tax_id: Option<&str>) -> Result<EnrichedClient, AppError> {
    let raw: RawClient = serde_json::from_str(extract_json(raw))?;
    let tax_id = tax_id(raw.tax_id)?;

    if let (Some(found), Some(partial)) = (&tax_id, partial_tax_id) {
        let partial_digits = only_digits(partial);
        if !partial_digits.is_empty() && !only_digits(found).contains(&partial_digits) {
            return Err(contract(format!(
                "tax ID {} does not match the provided partial '{}'",
                found, partial
            )));
        }
    }

    Ok(EnrichedClient {
        name: required("name", raw.name)?,
        tax_id,
        website: website(raw.website)?,
        city: required("city", raw.city)?,
        state: normalize_state(&required("state", raw.state)?).map_err(contract)?,
        sector: required("sector", raw.sector)?,
        description: required("description", raw.description)?,
    })
}

fn parse_segmentation(raw: &str) -> Result<Segmentation, AppError> {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    match compact.as_str() {
        "B2B" => Ok(Segmentation::B2B),
        "B2C" => Ok(Segmentation::B2C),
        "B2B2C" => Ok(Segmentation::B2B2C),
        _ => Err(contract(format!(
            "segmentation '{}' must be B2B, B2C or B2B2C",
            raw
        ))),
    }
}

/// Parses the market stage output.
///
/// Upper bounds on trends and players are hard limits. Lists shorter than the
/// expected minimum pass through and are reported by the quality validator.
pub fn parse_market(raw: &str) -> Result<EnrichedMarket, AppError> {
    let raw: RawMarket = serde_json::from_str(extract_json(raw))?;

    let trends = clean_list(raw.trends.unwrap_or_default());
    if trends.is_empty() {
        return Err(contract("missing required field `trends`"));
    }
    if trends.len() > MAX_TRENDS {
        return Err(contract(format!(
            "expected at most {} trends, got {}",
            MAX_TRENDS,
            trends.len()
        )));
    }

    let principal_players = clean_list(raw.principal_players.unwrap_or_default());
    if principal_players.is_empty() {
        return Err(contract("missing required field `principal_players`"));
    }
    if principal_players.len() > MAX_PLAYERS {
        return Err(contract(format!(
            "expected at most {} principal players, got {}",
            MAX_PLAYERS,
            principal_players.len()
        )));
    }

    Ok(EnrichedMarket {
        name: required("name", raw.name)?,
        category: required("category", raw.category)?,
        segmentation: parse_segmentation(&required("segmentation", raw.segmentation)?)?,
        estimated_size: required("estimated_size", raw.estimated_size)?,
        annual_growth: required("annual_growth", raw.annual_growth)?,
        trends,
        principal_players,
    })
}

/// Parses the product stage output: exactly `expected` products, most important first.
pub fn parse_products(raw: &str, expected: usize) -> Result<Vec<Product>, AppError> {
    let items = exact_count("products", list_payload(raw, "products")?, expected)?;
    items
        .into_iter()
        .map(|item| {
            let p: RawProduct = serde_json::from_value(item)?;
            let differentiators = clean_list(p.differentiators.unwrap_or_default());
            if differentiators.len() < MIN_DIFFERENTIATORS
                || differentiators.len() > MAX_DIFFERENTIATORS
            {
                return Err(contract(format!(
                    "expected {} to {} differentiators, got {}",
                    MIN_DIFFERENTIATORS,
                    MAX_DIFFERENTIATORS,
                    differentiators.len()
                )));
            }
            Ok(Product {
                name: required("name", p.name)?,
                description: required("description", p.description)?,
                target_audience: required("target_audience", p.target_audience)?,
                differentiators,
            })
        })
        .collect()
}

/// Parses the competitor stage output: exactly `expected` competitors.
pub fn parse_competitors(raw: &str, expected: usize) -> Result<Vec<Competitor>, AppError> {
    let items = exact_count("competitors", list_payload(raw, "competitors")?, expected)?;
    items
        .into_iter()
        .map(|item| {
            let c: RawCompany = serde_json::from_value(item)?;
            Ok(Competitor {
                name: required("name", c.name)?,
                tax_id: tax_id(c.tax_id)?,
                website: website(c.website)?,
                city: optional_text(c.city),
                state: optional_state(c.state)?,
                main_product: required("main_product", c.main_product)?,
            })
        })
        .collect()
}

/// Parses a lead request output: exactly `expected` leads.
pub fn parse_leads(raw: &str, expected: usize) -> Result<Vec<LeadDraft>, AppError> {
    let items = exact_count("leads", list_payload(raw, "leads")?, expected)?;
    items
        .into_iter()
        .map(|item| {
            let l: RawCompany = serde_json::from_value(item)?;
            Ok(LeadDraft {
                name: required("name", l.name)?,
                tax_id: tax_id(l.tax_id)?,
                website: website(l.website)?,
                city: optional_text(l.city),
                state: optional_state(l.state)?,
                interest_product: required("interest_product", l.interest_product)?,
            })
        })
        .collect()
}

/// Parses raw model output according to the contract of `stage`.
pub fn parse_stage(
    stage: StageId,
    raw: &str,
    ctx: &ParseContext<'_>,
) -> Result<StageResult, AppError> {
    match stage {
        StageId::Client => parse_client(raw, ctx.partial_tax_id).map(StageResult::Client),
        StageId::Market => parse_market(raw).map(StageResult::Market),
        StageId::Products => parse_products(raw, ctx.expected_items.unwrap_or(PRODUCT_COUNT))
            .map(StageResult::Products),
        StageId::Competitors => {
            parse_competitors(raw, ctx.expected_items.unwrap_or(COMPETITOR_COUNT))
                .map(StageResult::Competitors)
        }
        StageId::Leads => {
            parse_leads(raw, ctx.expected_items.unwrap_or(LEAD_SLOTS)).map(StageResult::Leads)
        }
    }
}
