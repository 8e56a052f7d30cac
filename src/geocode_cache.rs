use crate::models::GeoCoordinate;
use moka::future::Cache;

/// Process-lifetime geocode cache keyed by normalized "city|state|country".
///
/// Entries never expire; call [`GeocodeCache::clear`] to drop them. The cache
/// is an owned value handed to the geocoding runner, so tests can isolate runs
/// by giving each one its own instance.
#[derive(Clone)]
pub struct GeocodeCache {
    inner: Cache<String, GeoCoordinate>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self {
            inner: Cache::builder().max_capacity(50_000).build(),
        }
    }

    /// Builds the cache key for a place.
    pub fn key(city: &str, state: &str, country: &str) -> String {
        let normalize = |s: &str| {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        };
        format!(
            "{}|{}|{}",
            normalize(city),
            normalize(state),
            normalize(country)
        )
    }

    pub async fn get(&self, key: &str) -> Option<GeoCoordinate> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, coordinate: GeoCoordinate) {
        self.inner.insert(key, coordinate).await;
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    /// Number of cached places.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for GeocodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;

    fn coordinate() -> GeoCoordinate {
        GeoCoordinate {
            latitude: -23.55,
            longitude: -46.63,
            formatted_address: "São Paulo, SP, Brasil".into(),
            confidence: Confidence::Medium,
        }
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(
            GeocodeCache::key("  São   Paulo ", "sp", "Brasil"),
            GeocodeCache::key("são paulo", "SP", "BRASIL")
        );
        assert_eq!(GeocodeCache::key("Recife", "PE", "Brasil"), "recife|pe|brasil");
    }

    #[tokio::test]
    async fn test_insert_get_and_clear() {
        let cache = GeocodeCache::new();
        let key = GeocodeCache::key("São Paulo", "SP", "Brasil");
        assert!(cache.get(&key).await.is_none());

        cache.insert(key.clone(), coordinate()).await;
        assert_eq!(cache.get(&key).await, Some(coordinate()));
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.get(&key).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a = GeocodeCache::new();
        let b = GeocodeCache::new();
        a.insert("x|y|z".into(), coordinate()).await;
        assert!(b.get("x|y|z").await.is_none());
    }
}
