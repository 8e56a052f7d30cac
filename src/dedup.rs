//! Dedup/Reuse engine.
//!
//! Cross-references the market's principal players against the client, the
//! competitor set and the lead set, and hands leftover players to the lead
//! stage as seeds (closed-loop reuse).
//!
//! # Matching limitation
//!
//! Names are compared by exact match on a normalized key: trimmed,
//! lower-cased, internal whitespace collapsed, trailing punctuation and a
//! trailing legal-form suffix (`S.A.`, `Ltda`, `ME`, `Inc` ...) removed. There
//! is no fuzzy or phonetic matching, so two different spellings of the same
//! company ("Magazine Luiza" / "Magalu") are not detected as duplicates.
use std::collections::HashSet;

const LEGAL_SUFFIXES: [&str; 12] = [
    "s.a.", "s.a", "s/a", "sa", "ltda.", "ltda", "me", "epp", "eireli", "inc", "corp", "llc",
];

/// Normalized comparison key for a company name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameKey(String);

impl NameKey {
    pub fn new(name: &str) -> Self {
        let lowered = name.to_lowercase();
        let mut tokens: Vec<&str> = lowered.split_whitespace().collect();

        if tokens.len() > 1 {
            let last = tokens[tokens.len() - 1].trim_end_matches([',', ';']);
            if LEGAL_SUFFIXES.contains(&last) || LEGAL_SUFFIXES.contains(&last.trim_end_matches('.'))
            {
                tokens.pop();
            }
        }

        let joined = tokens.join(" ");
        let key = joined
            .trim_end_matches(|c: char| c.is_ascii_punctuation() || c == '-')
            .trim()
            .to_string();
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Case- and whitespace-insensitive name equality.
pub fn same_company(a: &str, b: &str) -> bool {
    NameKey::new(a) == NameKey::new(b)
}

/// Names that may not be used again in this run.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    keys: HashSet<NameKey>,
    names: Vec<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the set with the client name.
    pub fn for_client(client_name: &str) -> Self {
        let mut set = Self::new();
        set.insert(client_name);
        set
    }

    /// Adds a name; returns false when it was already excluded.
    pub fn insert(&mut self, name: &str) -> bool {
        let key = NameKey::new(name);
        if key.is_empty() {
            return false;
        }
        if self.keys.insert(key) {
            self.names.push(name.trim().to_string());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains(&NameKey::new(name))
    }

    /// Excluded names in insertion order, for prompt display.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Result of reconciling the market's players against the exclusions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciliation {
    /// Players eligible for competitor or lead use, in market order.
    pub candidate_pool: Vec<String>,
    /// Players dropped because they were excluded (e.g. the client).
    pub excluded: Vec<String>,
}

/// Filters the market's players against the exclusion set.
///
/// Order is preserved; a player repeated under another spelling that
/// normalizes to the same key is kept once (first occurrence).
pub fn reconcile(players: &[String], exclusions: &ExclusionSet) -> Reconciliation {
    let mut seen: HashSet<NameKey> = HashSet::new();
    let mut result = Reconciliation::default();

    for player in players {
        let key = NameKey::new(player);
        if key.is_empty() {
            continue;
        }
        if exclusions.contains(player) {
            result.excluded.push(player.clone());
            continue;
        }
        if seen.insert(key) {
            result.candidate_pool.push(player.clone());
        }
    }

    tracing::debug!(
        "Reconciled {} market players: {} candidates, {} excluded",
        players.len(),
        result.candidate_pool.len(),
        result.excluded.len()
    );
    result
}

/// Candidates not claimed by the competitor stage, in original order.
pub fn leftover(candidate_pool: &[String], claimed: &ExclusionSet) -> Vec<String> {
    candidate_pool
        .iter()
        .filter(|name| !claimed.contains(name))
        .cloned()
        .collect()
}

/// Why [`claim_unique`] turned an item away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The name collides with the exclusion set or an earlier item.
    Duplicate,
    /// Nothing is left of the name once normalized (e.g. `"!!!"`).
    EmptyName,
}

/// Splits items into those whose name is free and those that were turned
/// away, tagged with the reason. Accepted names are added to the set.
pub fn claim_unique<T>(
    items: Vec<T>,
    name_of: impl Fn(&T) -> &str,
    exclusions: &mut ExclusionSet,
) -> (Vec<T>, Vec<(T, Rejection)>) {
    let mut accepted = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();
    for item in items {
        let name = name_of(&item);
        if NameKey::new(name).is_empty() {
            rejected.push((item, Rejection::EmptyName));
        } else if exclusions.insert(name) {
            accepted.push(item);
        } else {
            rejected.push((item, Rejection::Duplicate));
        }
    }
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_name_key_normalization() {
        assert_eq!(NameKey::new("  Acme   Corp "), NameKey::new("acme corp"));
        assert_eq!(NameKey::new("Totvs S.A."), NameKey::new("TOTVS"));
        assert_eq!(NameKey::new("Natura S/A"), NameKey::new("natura"));
        assert_eq!(NameKey::new("Padaria Real Ltda."), NameKey::new("Padaria Real"));
        assert_ne!(NameKey::new("Magazine Luiza"), NameKey::new("Magalu"));
    }

    #[test]
    fn test_single_token_suffix_is_kept() {
        assert_eq!(NameKey::new("SA").as_str(), "sa");
        assert_eq!(NameKey::new("ME").as_str(), "me");
    }

    #[test]
    fn test_reconcile_excludes_client() {
        let exclusions = ExclusionSet::for_client("Acme Corp");
        let players = names(&["Beta", "ACME CORP", "Gamma", "beta "]);
        let result = reconcile(&players, &exclusions);
        assert_eq!(result.candidate_pool, names(&["Beta", "Gamma"]));
        assert_eq!(result.excluded, names(&["ACME CORP"]));
    }

    #[test]
    fn test_leftover_preserves_order() {
        let pool = names(&["A", "B", "C", "D", "E", "F"]);
        let mut claimed = ExclusionSet::new();
        claimed.insert("B");
        claimed.insert("d");
        assert_eq!(leftover(&pool, &claimed), names(&["A", "C", "E", "F"]));
    }

    #[test]
    fn test_leftover_empty_when_all_claimed() {
        let pool = names(&["A", "B"]);
        let mut claimed = ExclusionSet::for_client("Client");
        claimed.insert("a");
        claimed.insert("B");
        assert!(leftover(&pool, &claimed).is_empty());
    }

    #[test]
    fn test_claim_unique_rejects_collisions() {
        let mut exclusions = ExclusionSet::for_client("Acme");
        let items = names(&["Beta", "acme", "Gamma", "BETA"]);
        let (accepted, rejected) = claim_unique(items, |s| s.as_str(), &mut exclusions);
        assert_eq!(accepted, names(&["Beta", "Gamma"]));
        assert_eq!(
            rejected,
            vec![
                ("acme".to_string(), Rejection::Duplicate),
                ("BETA".to_string(), Rejection::Duplicate),
            ]
        );
        assert_eq!(exclusions.names(), &names(&["Acme", "Beta", "Gamma"])[..]);
    }

    #[test]
    fn test_claim_unique_flags_names_that_normalize_away() {
        let mut exclusions = ExclusionSet::for_client("Acme");
        let items = names(&["!!!", "Beta", " -- "]);
        let (accepted, rejected) = claim_unique(items, |s| s.as_str(), &mut exclusions);
        assert_eq!(accepted, names(&["Beta"]));
        assert_eq!(
            rejected,
            vec![
                ("!!!".to_string(), Rejection::EmptyName),
                (" -- ".to_string(), Rejection::EmptyName),
            ]
        );
        assert_eq!(exclusions.len(), 2);
    }
}
