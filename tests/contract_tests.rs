/// Stage contract tests
/// Feeds realistic model output through the stage parsers
use rust_market_intel::contracts::*;
use rust_market_intel::errors::AppError;
use rust_market_intel::models::*;
use serde_json::json;

fn ctx() -> ParseContext<'static> {
    ParseContext::default()
}

fn company(name: &str) -> serde_json::Value {
    json!({
        "name": name, "tax_id": null, "website": null,
        "city": "Joinville", "state": "sc",
        "main_product": "ERP", "interest_product": "ERP"
    })
}

fn parse_products_of(raw: &str) -> Result<Vec<Product>, AppError> {
    parse_products(raw, PRODUCT_COUNT)
}

fn products(differentiators: &[&str], count: usize) -> String {
    let items: Vec<_> = (0..count)
        .map(|i| {
            json!({
                "name": format!("Produto {}", i),
                "description": "Descrição",
                "target_audience": "PMEs",
                "differentiators": differentiators,
            })
        })
        .collect();
    json!({ "products": items }).to_string()
}

// ============ Client ============

#[test]
fn test_client_output_wrapped_in_prose() {
    let raw = format!(
        "Claro! Segue o perfil:\n```json\n{}\n```\nEspero ter ajudado.",
        json!({
            "name": "WEG S.A.", "cnpj": "60231659000180", "site": "weg.net/",
            "city": "Jaraguá do Sul", "uf": "sc",
            "sector": "Máquinas elétricas", "description": "Motores e automação."
        })
    );

    let result = parse_stage(StageId::Client, &raw, &ctx()).unwrap();
    let client = result.into_client().unwrap();
    assert_eq!(client.tax_id.as_deref(), Some("60.231.659/0001-80"));
    assert_eq!(client.website.as_deref(), Some("https://weg.net"));
    assert_eq!(client.state, "SC");
}

#[test]
fn test_client_placeholders_become_null() {
    let raw = json!({
        "name": "Padaria do Bairro", "tax_id": "N/A", "website": "não informado",
        "city": "Recife", "state": "PE", "sector": "Alimentação", "description": "Padaria."
    })
    .to_string();

    let client = parse_client(&raw, None).unwrap();
    assert_eq!(client.tax_id, None);
    assert_eq!(client.website, None);
}

#[test]
fn test_client_partial_tax_id_must_match() {
    let raw = json!({
        "name": "Itaú", "tax_id": "45.037.920/0001-12", "website": null,
        "city": "São Paulo", "state": "SP", "sector": "Bancos", "description": "Banco."
    })
    .to_string();

    let matching = ParseContext {
        partial_tax_id: Some("45.037"),
        ..Default::default()
    };
    assert!(parse_stage(StageId::Client, &raw, &matching).is_ok());

    let mismatching = ParseContext {
        partial_tax_id: Some("07.365.491"),
        ..Default::default()
    };
    let error = parse_stage(StageId::Client, &raw, &mismatching).unwrap_err();
    assert!(matches!(error, AppError::ParseError(_)));
    assert!(error.to_string().contains("does not match"));
}

#[test]
fn test_client_rejections() {
    let base = json!({
        "name": "Acme", "tax_id": null, "website": null,
        "city": "Campinas", "state": "SP", "sector": "Software", "description": "ERP."
    });

    let mut bad_check_digit = base.clone();
    bad_check_digit["tax_id"] = json!("11.222.333/0001-82");
    let mut missing_city = base.clone();
    missing_city["city"] = json!("unknown");
    let mut long_state = base.clone();
    long_state["state"] = json!("São Paulo");
    let mut ftp_site = base.clone();
    ftp_site["website"] = json!("ftp://acme.com.br");

    for raw in [bad_check_digit, missing_city, long_state, ftp_site] {
        let error = parse_client(&raw.to_string(), None).unwrap_err();
        assert!(matches!(error, AppError::ParseError(_)), "{}", raw);
    }
    assert!(parse_client("not json at all", None).is_err());
}

// ============ Market ============

#[test]
fn test_market_bounds() {
    let market = |trends: usize, players: usize, segmentation: &str| {
        json!({
            "name": "Varejo", "category": "Comércio", "segmentation": segmentation,
            "estimated_size": "R$ 1 tri", "annual_growth": "3%",
            "trends": (0..trends).map(|i| format!("T{}", i)).collect::<Vec<_>>(),
            "principal_players": (0..players).map(|i| format!("P{}", i)).collect::<Vec<_>>(),
        })
        .to_string()
    };

    // Short lists pass; the quality score reports them
    let short = parse_market(&market(2, 3, "B2C")).unwrap();
    assert_eq!(short.trends.len(), 2);
    assert_eq!(short.segmentation, Segmentation::B2C);

    assert_eq!(
        parse_market(&market(4, 8, "b2b2c")).unwrap().segmentation,
        Segmentation::B2B2C
    );
    assert!(parse_market(&market(6, 8, "B2B")).is_err());
    assert!(parse_market(&market(4, 11, "B2B")).is_err());
    assert!(parse_market(&market(0, 8, "B2B")).is_err());
    assert!(parse_market(&market(4, 8, "B2G")).is_err());
}

// ============ Products ============

#[test]
fn test_products_cardinality_and_differentiators() {
    assert_eq!(parse_products_of(&products(&["A", "B"], 3)).unwrap().len(), 3);
    assert!(parse_products_of(&products(&["A", "B"], 2)).is_err());
    assert!(parse_products_of(&products(&["A", "B"], 4)).is_err());
    assert!(parse_products_of(&products(&["A"], 3)).is_err());
    assert!(parse_products_of(&products(&["A", "B", "C", "D"], 3)).is_err());
}

#[test]
fn test_products_accept_bare_array() {
    let wrapped: serde_json::Value = serde_json::from_str(&products(&["A", "B"], 3)).unwrap();
    let bare = wrapped["products"].to_string();
    let parsed = parse_stage(StageId::Products, &bare, &ctx()).unwrap();
    assert_eq!(parsed.into_products().unwrap()[0].name, "Produto 0");
}

// ============ Competitors and leads ============

#[test]
fn test_competitors_require_exactly_five() {
    let five_items = ["A", "B", "C", "D", "E"].map(company);
    let four_items = ["A", "B", "C", "D"].map(company);
    let five = json!({ "competitors": five_items }).to_string();
    let four = json!({ "competitors": four_items }).to_string();

    let parsed = parse_competitors(&five, COMPETITOR_COUNT).unwrap();
    assert_eq!(parsed.len(), 5);
    assert_eq!(parsed[0].state, "SC");
    assert!(parse_competitors(&four, COMPETITOR_COUNT).is_err());
}

#[test]
fn test_competitor_location_is_optional() {
    let mut unplaced = company("Sem Endereço");
    unplaced["city"] = json!(null);
    unplaced["state"] = json!("-");
    let raw = json!({
        "competitors": [unplaced, company("B"), company("C"), company("D"), company("E")]
    })
    .to_string();

    let parsed = parse_competitors(&raw, COMPETITOR_COUNT).unwrap();
    assert_eq!(parsed[0].city, "");
    assert_eq!(parsed[0].state, "");
}

#[test]
fn test_leads_count_follows_request() {
    let items = ["A", "B"].map(company);
    let raw = json!({ "leads": items }).to_string();

    let two = ParseContext {
        expected_items: Some(2),
        ..Default::default()
    };
    let three = ParseContext {
        expected_items: Some(3),
        ..Default::default()
    };

    let leads = parse_stage(StageId::Leads, &raw, &two)
        .unwrap()
        .into_leads()
        .unwrap();
    assert_eq!(leads.len(), 2);
    assert_eq!(leads[1].interest_product, "ERP");
    assert!(parse_stage(StageId::Leads, &raw, &three).is_err());
}

#[test]
fn test_lead_missing_interest_product_rejected() {
    let mut lead = company("A");
    lead["interest_product"] = json!("");
    let raw = json!({ "leads": [lead] }).to_string();
    assert!(parse_leads(&raw, 1).is_err());
}

// ============ Identifier helpers ============

#[test]
fn test_known_valid_cnpjs() {
    for cnpj in [
        "11.222.333/0001-81",
        "11.444.777/0001-61",
        "33.400.885/0001-75",
        "60.231.659/0001-80",
        "45.037.920/0001-12",
        "07.365.491/0001-13",
    ] {
        assert!(is_valid_cnpj(cnpj), "{}", cnpj);
    }
    assert!(!is_valid_cnpj("11.111.111/1111-11"));
    assert!(!is_valid_cnpj("null"));
}

#[test]
fn test_placeholder_tokens() {
    for token in ["", "  ", "NULL", "N/A", "Desconhecido", "não disponível", "?"] {
        assert!(is_placeholder(token), "{:?}", token);
    }
    assert!(!is_placeholder("Acme"));
}
