//! Quality validator.
//!
//! Pure scoring of an [`EnrichmentBundle`]: the same bundle always yields the
//! same report. Field weights:
//!
//! | Section     | Fields | Rule                                                    |
//! |-------------|--------|---------------------------------------------------------|
//! | Client      | 7      | each populated field counts                             |
//! | Market      | 7      | `trends >= 3` and `principal_players >= 5` count as one |
//! | Products    | 1      | satisfied only with exactly 3 products                  |
//! | Competitors | 5      | one per slot holding a competitor with city and state   |
//! | Leads       | 5      | one per slot holding a lead with city and state         |
use crate::dedup::{same_company, NameKey};
use crate::models::*;
use std::collections::HashSet;

const CLIENT_FIELDS: u32 = 7;
const MARKET_FIELDS: u32 = 7;
const MIN_TRENDS: usize = 3;
const MIN_PLAYERS: usize = 5;

#[derive(Default)]
struct Tally {
    filled: u32,
    total: u32,
    findings: Vec<String>,
}

impl Tally {
    fn field(&mut self, ok: bool, finding: impl FnOnce() -> String) {
        self.total += 1;
        if ok {
            self.filled += 1;
        } else {
            self.findings.push(finding());
        }
    }
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

fn score_client(client: &EnrichedClient, tally: &mut Tally) {
    let before = tally.total;
    tally.field(filled(&client.name), || "client name is empty".into());
    tally.field(client.tax_id.is_some(), || {
        "client tax ID could not be verified (null)".into()
    });
    tally.field(client.website.is_some(), || {
        "client website could not be verified (null)".into()
    });
    tally.field(filled(&client.city), || "client city is empty".into());
    tally.field(filled(&client.state), || "client state is empty".into());
    tally.field(filled(&client.sector), || "client sector is empty".into());
    tally.field(filled(&client.description), || {
        "client description is empty".into()
    });
    debug_assert_eq!(tally.total - before, CLIENT_FIELDS);
}

fn score_market(market: &EnrichedMarket, tally: &mut Tally) {
    let before = tally.total;
    tally.field(filled(&market.name), || "market name is empty".into());
    tally.field(filled(&market.category), || "market category is empty".into());
    // Segmentation is a closed enum, always populated once parsed.
    tally.field(true, String::new);
    tally.field(filled(&market.estimated_size), || {
        "market estimated size is empty".into()
    });
    tally.field(filled(&market.annual_growth), || {
        "market annual growth is empty".into()
    });
    tally.field(market.trends.len() >= MIN_TRENDS, || {
        format!(
            "market has only {} trends, minimum {}",
            market.trends.len(),
            MIN_TRENDS
        )
    });
    tally.field(market.principal_players.len() >= MIN_PLAYERS, || {
        format!(
            "market has only {} principal players, minimum {}",
            market.principal_players.len(),
            MIN_PLAYERS
        )
    });
    debug_assert_eq!(tally.total - before, MARKET_FIELDS);
}

fn score_products(products: &[Product], tally: &mut Tally) {
    tally.field(products.len() == PRODUCT_COUNT, || {
        format!(
            "expected {} products, found {}",
            PRODUCT_COUNT,
            products.len()
        )
    });
}

/// Scores a list of located entities: one field per slot.
fn score_located<'a>(
    label: &str,
    expected: usize,
    locations: impl Iterator<Item = (&'a str, &'a str)>,
    tally: &mut Tally,
) {
    let mut present = 0usize;
    let mut located = 0usize;
    for (city, state) in locations.take(expected) {
        present += 1;
        if filled(city) && filled(state) {
            located += 1;
        }
    }
    tally.total += expected as u32;
    tally.filled += located as u32;

    if present < expected {
        tally
            .findings
            .push(format!("expected {} {}, found {}", expected, label, present));
    }
    if located < present {
        tally.findings.push(format!(
            "{}/{} {} missing location",
            present - located,
            present,
            label
        ));
    }
}

/// Re-checks dedup invariants; these should never fire after the orchestrator.
fn check_invariants(bundle: &EnrichmentBundle, findings: &mut Vec<String>) {
    for c in &bundle.competitors {
        if same_company(&c.name, &bundle.client.name) {
            findings.push(format!("competitor '{}' is the client itself", c.name));
        }
    }

    let competitor_keys: HashSet<NameKey> = bundle
        .competitors
        .iter()
        .map(|c| NameKey::new(&c.name))
        .collect();
    let mut lead_keys: HashSet<NameKey> = HashSet::new();
    for l in &bundle.leads {
        let key = NameKey::new(&l.name);
        if same_company(&l.name, &bundle.client.name) {
            findings.push(format!("lead '{}' is the client itself", l.name));
        }
        if competitor_keys.contains(&key) {
            findings.push(format!("lead '{}' is also a competitor", l.name));
        }
        if !lead_keys.insert(key) {
            findings.push(format!("lead '{}' appears more than once", l.name));
        }
    }
}

/// Computes the quality report of a bundle.
///
/// Findings list every shortfall, followed by the pipeline notes recorded in
/// the bundle (stage failures, dedup drops).
pub fn score(bundle: &EnrichmentBundle) -> QualityReport {
    let mut tally = Tally::default();

    score_client(&bundle.client, &mut tally);
    score_market(&bundle.market, &mut tally);
    score_products(&bundle.products, &mut tally);
    score_located(
        "competitors",
        COMPETITOR_COUNT,
        bundle
            .competitors
            .iter()
            .map(|c| (c.city.as_str(), c.state.as_str())),
        &mut tally,
    );
    score_located(
        "leads",
        LEAD_SLOTS,
        bundle
            .leads
            .iter()
            .map(|l| (l.city.as_str(), l.state.as_str())),
        &mut tally,
    );

    check_invariants(bundle, &mut tally.findings);
    tally.findings.extend(bundle.notes.iter().cloned());

    let score = if tally.total == 0 {
        0
    } else {
        (100.0 * tally.filled as f64 / tally.total as f64).round() as u8
    };

    QualityReport {
        score,
        fields_filled: tally.filled,
        fields_total: tally.total,
        findings: tally.findings,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn competitor(name: &str, city: &str, state: &str) -> Competitor {
        Competitor {
            name: name.into(),
            tax_id: None,
            website: None,
            city: city.into(),
            state: state.into(),
            main_product: "ERP".into(),
        }
    }

    fn lead(name: &str) -> Lead {
        Lead {
            name: name.into(),
            tax_id: None,
            website: None,
            city: "Recife".into(),
            state: "PE".into(),
            interest_product: "ERP".into(),
            origin: LeadOrigin::FreshGeneration,
        }
    }

    pub(crate) fn full_bundle() -> EnrichmentBundle {
        EnrichmentBundle {
            run_id: Uuid::nil(),
            generated_at: Utc::now(),
            stub: ClientStub::new("Acme"),
            client: EnrichedClient {
                name: "Acme".into(),
                tax_id: Some("11.222.333/0001-81".into()),
                website: Some("https://acme.com.br".into()),
                city: "Campinas".into(),
                state: "SP".into(),
                sector: "Software".into(),
                description: "ERP para PMEs".into(),
            },
            market: EnrichedMarket {
                name: "ERP".into(),
                category: "Software".into(),
                segmentation: Segmentation::B2B,
                estimated_size: "R$ 10 bi".into(),
                annual_growth: "9%".into(),
                trends: vec!["cloud".into(), "IA".into(), "open finance".into()],
                principal_players: (1..=6).map(|i| format!("Player {}", i)).collect(),
            },
            products: (1..=3)
                .map(|i| Product {
                    name: format!("P{}", i),
                    description: "d".into(),
                    target_audience: "PMEs".into(),
                    differentiators: vec!["a".into(), "b".into()],
                })
                .collect(),
            competitors: (1..=5)
                .map(|i| competitor(&format!("C{}", i), "São Paulo", "SP"))
                .collect(),
            leads: (1..=5).map(|i| lead(&format!("L{}", i))).collect(),
            stages: StageLedger::default(),
            reuse: ReuseStats::default(),
            notes: vec![],
            quality: QualityReport::default(),
        }
    }

    #[test]
    fn test_full_bundle_scores_100() {
        let report = score(&full_bundle());
        assert_eq!(report.fields_total, 25);
        assert_eq!(report.fields_filled, 25);
        assert_eq!(report.score, 100);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn test_score_is_deterministic() {
        let mut bundle = full_bundle();
        bundle.client.website = None;
        bundle.market.trends.truncate(2);
        assert_eq!(score(&bundle), score(&bundle));
    }

    #[test]
    fn test_missing_locations_and_short_lists() {
        let mut bundle = full_bundle();
        bundle.competitors[0].city.clear();
        bundle.competitors[2].state.clear();
        bundle.competitors[4].city.clear();
        bundle.market.trends.truncate(2);
        bundle.leads.truncate(3);

        let report = score(&bundle);
        // 25 - 3 competitors - 1 trends - 2 leads
        assert_eq!(report.fields_filled, 19);
        assert_eq!(report.score, 76);
        assert!(report
            .findings
            .contains(&"3/5 competitors missing location".to_string()));
        assert!(report
            .findings
            .contains(&"market has only 2 trends, minimum 3".to_string()));
        assert!(report
            .findings
            .contains(&"expected 5 leads, found 3".to_string()));
    }

    #[test]
    fn test_null_identifiers_lower_score() {
        let mut bundle = full_bundle();
        bundle.client.tax_id = None;
        bundle.client.website = None;
        let report = score(&bundle);
        assert_eq!(report.fields_filled, 23);
        assert_eq!(report.score, 92);
        assert_eq!(report.findings.len(), 2);
    }

    #[test]
    fn test_invariant_violations_are_reported() {
        let mut bundle = full_bundle();
        bundle.leads[0].name = "C2".into();
        bundle.competitors[1].name = "C2".into();
        bundle.leads[1].name = "acme".into();
        let report = score(&bundle);
        assert!(report
            .findings
            .contains(&"lead 'C2' is also a competitor".to_string()));
        assert!(report
            .findings
            .contains(&"lead 'acme' is the client itself".to_string()));
    }

    #[test]
    fn test_notes_are_included() {
        let mut bundle = full_bundle();
        bundle.notes.push("products stage failed: timeout".into());
        let report = score(&bundle);
        assert_eq!(report.score, 100);
        assert_eq!(report.findings, vec!["products stage failed: timeout"]);
    }
}
