/// Property-based tests using proptest
/// Tests invariants and properties that should hold for all inputs
use chrono::Utc;
use proptest::prelude::*;
use rust_market_intel::contracts::{
    extract_json, is_valid_cnpj, normalize_cnpj, normalize_state, normalize_website, parse_stage,
    ParseContext,
};
use rust_market_intel::dedup::{claim_unique, leftover, same_company, ExclusionSet, NameKey};
use rust_market_intel::models::*;
use rust_market_intel::quality;
use uuid::Uuid;

// Property: Validators should never panic
proptest! {
    #[test]
    fn cnpj_validation_never_panics(raw in "\\PC*") {
        let _ = normalize_cnpj(&raw);
    }

    #[test]
    fn website_validation_never_panics(raw in "\\PC*") {
        let _ = normalize_website(&raw);
    }

    #[test]
    fn state_validation_never_panics(raw in "\\PC*") {
        let _ = normalize_state(&raw);
    }

    #[test]
    fn stage_parsers_never_panic(raw in "\\PC*") {
        let ctx = ParseContext { partial_tax_id: Some("11"), expected_items: Some(5) };
        for stage in StageId::ALL {
            let _ = parse_stage(stage, &raw, &ctx);
        }
        let _ = extract_json(&raw);
    }
}

// Property: A normalized CNPJ is canonical
proptest! {
    #[test]
    fn normalized_cnpj_is_stable(digits in "[0-9]{14}") {
        if let Ok(Some(formatted)) = normalize_cnpj(&digits) {
            prop_assert_eq!(formatted.len(), 18);
            prop_assert_eq!(normalize_cnpj(&formatted), Ok(Some(formatted.clone())));
            let stripped: String = formatted.chars().filter(|c| c.is_ascii_digit()).collect();
            prop_assert_eq!(stripped, digits);
        }
    }

    #[test]
    fn changing_a_check_digit_invalidates(digits in "[0-9]{14}", bump in 1u32..=9) {
        if is_valid_cnpj(&digits) {
            let last = digits.chars().last().and_then(|c| c.to_digit(10)).unwrap();
            let tampered = format!("{}{}", &digits[..13], (last + bump) % 10);
            prop_assert!(!is_valid_cnpj(&tampered));
        }
    }
}

// Property: Name matching ignores case and spacing
proptest! {
    #[test]
    fn name_matching_ignores_case(name in "[A-Za-z]{1,8}( [A-Za-z]{1,8}){0,3}") {
        prop_assert!(same_company(&name, &name.to_uppercase()));
        prop_assert!(same_company(&name, &name.to_lowercase()));
    }

    #[test]
    fn name_matching_ignores_spacing(
        tokens in prop::collection::vec("[a-z]{1,8}", 1..4),
        pad in "[ \t]{1,3}"
    ) {
        let tight = tokens.join(" ");
        let loose = format!("{}{}{}", pad, tokens.join(pad.as_str()), pad);
        prop_assert_eq!(NameKey::new(&tight), NameKey::new(&loose));
    }
}

// Property: Reuse bookkeeping preserves order and never reuses a name
proptest! {
    #[test]
    fn leftover_is_an_ordered_subsequence(
        pool in prop::collection::vec("[a-f]{1,3}", 0..12),
        claimed in prop::collection::vec("[a-f]{1,3}", 0..6)
    ) {
        let mut exclusions = ExclusionSet::new();
        for name in &claimed {
            exclusions.insert(name);
        }

        let rest = leftover(&pool, &exclusions);
        let mut cursor = pool.iter();
        for name in &rest {
            prop_assert!(!exclusions.contains(name));
            prop_assert!(cursor.any(|p| p == name));
        }
        let unclaimed = pool.iter().filter(|p| !exclusions.contains(p)).count();
        prop_assert_eq!(rest.len(), unclaimed);
    }

    #[test]
    fn claimed_names_are_unique(names in prop::collection::vec("[a-d]{1,2}( ltda)?", 0..15)) {
        let mut exclusions = ExclusionSet::for_client("Client");
        let (accepted, rejected) = claim_unique(names.clone(), |n| n.as_str(), &mut exclusions);

        prop_assert_eq!(accepted.len() + rejected.len(), names.len());
        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                prop_assert!(!same_company(a, b));
            }
        }
    }
}

fn located(name: String, placed: bool) -> (String, String, String) {
    if placed {
        (name, "Curitiba".to_string(), "PR".to_string())
    } else {
        (name, String::new(), String::new())
    }
}

fn bundle_with(
    trends: usize,
    players: usize,
    products: usize,
    competitors: Vec<bool>,
    leads: Vec<bool>,
    tax_id: bool,
) -> EnrichmentBundle {
    let competitors: Vec<Competitor> = competitors
        .into_iter()
        .enumerate()
        .map(|(i, placed)| {
            let (name, city, state) = located(format!("Competitor {}", i), placed);
            Competitor {
                name,
                tax_id: None,
                website: None,
                city,
                state,
                main_product: "ERP".to_string(),
            }
        })
        .collect();
    let leads: Vec<Lead> = leads
        .into_iter()
        .enumerate()
        .map(|(i, placed)| {
            let (name, city, state) = located(format!("Lead {}", i), placed);
            Lead {
                name,
                tax_id: None,
                website: None,
                city,
                state,
                interest_product: "ERP".to_string(),
                origin: LeadOrigin::FreshGeneration,
            }
        })
        .collect();

    EnrichmentBundle {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        stub: ClientStub::new("Acme"),
        client: EnrichedClient {
            name: "Acme".to_string(),
            tax_id: tax_id.then(|| "11.222.333/0001-81".to_string()),
            website: None,
            city: "Campinas".to_string(),
            state: "SP".to_string(),
            sector: "Software".to_string(),
            description: "ERP".to_string(),
        },
        market: EnrichedMarket {
            name: "ERP".to_string(),
            category: "Software".to_string(),
            segmentation: Segmentation::B2B,
            estimated_size: "R$ 1 bi".to_string(),
            annual_growth: "5%".to_string(),
            trends: (0..trends).map(|i| format!("Trend {}", i)).collect(),
            principal_players: (0..players).map(|i| format!("Player {}", i)).collect(),
        },
        products: (0..products)
            .map(|i| Product {
                name: format!("Product {}", i),
                description: "d".to_string(),
                target_audience: "t".to_string(),
                differentiators: vec!["a".to_string(), "b".to_string()],
            })
            .collect(),
        reuse: ReuseStats::from_leads(players, players, &leads),
        competitors,
        leads,
        stages: StageLedger::default(),
        notes: Vec::new(),
        quality: QualityReport::default(),
    }
}

// Property: Quality score stays within bounds
proptest! {
    #[test]
    fn quality_score_is_bounded(
        trends in 0usize..=5,
        players in 0usize..=10,
        products in 0usize..=3,
        competitors in prop::collection::vec(any::<bool>(), 0..=5),
        leads in prop::collection::vec(any::<bool>(), 0..=5),
        tax_id in any::<bool>()
    ) {
        let bundle = bundle_with(trends, players, products, competitors, leads, tax_id);
        let report = quality::score(&bundle);

        prop_assert!(report.score <= 100);
        prop_assert!(report.fields_filled <= report.fields_total);
        // The website is always missing here, so the bundle is never perfect
        prop_assert!(report.score < 100);
        prop_assert!(!report.findings.is_empty());
    }
}
