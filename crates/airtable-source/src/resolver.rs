//! Entity resolver: dimension names to ids, creating rows on demand.

use anyhow::Result;
use lead_store::{LeadStore, NewDimension};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use sync_core::DimensionKind;
use tracing::{debug, warn};

/// Numeric suffixes tried on a code collision before falling back to random ones.
const MAX_SEQUENTIAL_SUFFIX: u32 = 9;

/// Random two-digit suffixes tried after the sequential ones.
const MAX_RANDOM_ATTEMPTS: u32 = 20;

/// Note stored on rows the resolver creates.
const AUTO_CREATE_NOTE: &str = "Auto-created by lead sync";

/// Name to id cache scoped to one sync run.
///
/// Keys are lowercased names. Bilingual kinds are cached under both names.
/// Names that a lookup-only mapping did not find are remembered as missing.
#[derive(Debug, Default)]
pub struct DimensionCache {
    entries: HashMap<DimensionKind, HashMap<String, i64>>,
    missing: HashMap<DimensionKind, HashSet<String>>,
    primed: bool,
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Drop every entry; the next run primes again.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.missing.clear();
        self.primed = false;
    }

    /// Load every existing dimension row, one query per kind.
    pub async fn prime(&mut self, store: &dyn LeadStore) -> Result<()> {
        self.entries.clear();
        self.missing.clear();
        for kind in DimensionKind::ALL {
            let rows = store.list_dimensions(kind).await?;
            let entries = self.entries.entry(kind).or_default();
            for row in rows {
                entries.entry(row.name.to_lowercase()).or_insert(row.id);
                if let Some(secondary) = row.name_secondary.filter(|s| !s.trim().is_empty()) {
                    entries.entry(secondary.to_lowercase()).or_insert(row.id);
                }
            }
            debug!("Cached {} {kind} names", entries.len());
        }
        self.primed = true;
        Ok(())
    }

    pub fn get(&self, kind: DimensionKind, name: &str) -> Option<i64> {
        self.entries
            .get(&kind)
            .and_then(|names| names.get(&name.to_lowercase()))
            .copied()
    }

    pub fn insert(&mut self, kind: DimensionKind, name: &str, id: i64) {
        let key = name.to_lowercase();
        if let Some(missing) = self.missing.get_mut(&kind) {
            missing.remove(&key);
        }
        self.entries.entry(kind).or_default().insert(key, id);
    }

    pub fn is_missing(&self, kind: DimensionKind, name: &str) -> bool {
        self.missing
            .get(&kind)
            .is_some_and(|names| names.contains(&name.to_lowercase()))
    }

    pub fn insert_missing(&mut self, kind: DimensionKind, name: &str) {
        self.missing
            .entry(kind)
            .or_default()
            .insert(name.to_lowercase());
    }

    /// Number of cached names for a kind.
    pub fn len(&self, kind: DimensionKind) -> usize {
        self.entries.get(&kind).map(HashMap::len).unwrap_or(0)
    }
}

/// A name resolved to a dimension row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: i64,
    /// The row was created by this call
    pub created: bool,
}

/// Finds or creates dimension rows through a [`LeadStore`].
pub struct EntityResolver<'a> {
    store: &'a dyn LeadStore,
}

impl<'a> EntityResolver<'a> {
    pub fn new(store: &'a dyn LeadStore) -> Self {
        Self { store }
    }

    /// Resolve a dimension name to an id.
    ///
    /// Returns `None` for a blank name, for a missing row when `auto_create`
    /// is off, and when storage fails; the lead is then written without
    /// this foreign key.
    pub async fn resolve(
        &self,
        cache: &mut DimensionCache,
        kind: DimensionKind,
        name: &str,
        auto_create: bool,
    ) -> Option<Resolved> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if let Some(id) = cache.get(kind, name) {
            return Some(Resolved { id, created: false });
        }
        if !auto_create && cache.is_missing(kind, name) {
            return None;
        }

        match self.store.find_dimension(kind, name).await {
            Ok(Some(id)) => {
                cache.insert(kind, name, id);
                return Some(Resolved { id, created: false });
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to look up {kind} '{name}': {e:#}");
                return None;
            }
        }

        if !auto_create {
            debug!("{kind} '{name}' does not exist and auto-create is off");
            cache.insert_missing(kind, name);
            return None;
        }

        match self.create(kind, name).await {
            Ok(id) => {
                cache.insert(kind, name, id);
                debug!("Created {kind} '{name}' with id {id}");
                Some(Resolved { id, created: true })
            }
            Err(e) => {
                warn!("Failed to create {kind} '{name}': {e:#}");
                None
            }
        }
    }

    async fn create(&self, kind: DimensionKind, name: &str) -> Result<i64> {
        let code = match kind.code_max_len() {
            Some(max_len) => Some(self.unique_code(kind, name, max_len).await?),
            None => None,
        };
        self.store
            .insert_dimension(
                kind,
                &NewDimension {
                    name: name.to_string(),
                    code,
                    notes: AUTO_CREATE_NOTE.to_string(),
                },
            )
            .await
    }

    async fn unique_code(&self, kind: DimensionKind, name: &str, max_len: usize) -> Result<String> {
        let base = initials(name, max_len);
        if !self.store.dimension_code_exists(kind, &base).await? {
            return Ok(base);
        }
        for n in 2..=MAX_SEQUENTIAL_SUFFIX {
            let candidate = with_suffix(&base, &n.to_string(), max_len);
            if !self.store.dimension_code_exists(kind, &candidate).await? {
                return Ok(candidate);
            }
        }
        let mut candidate = base.clone();
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let suffix = rand::rng().random_range(10..100).to_string();
            candidate = with_suffix(&base, &suffix, max_len);
            if !self.store.dimension_code_exists(kind, &candidate).await? {
                return Ok(candidate);
            }
        }
        anyhow::bail!("No free {kind} code for '{name}' (last tried '{candidate}')")
    }
}

/// Short code from the initials of a name's words.
///
/// A single-word name contributes its leading characters instead.
pub fn initials(name: &str, max_len: usize) -> String {
    let words: Vec<&str> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let code: String = match words.as_slice() {
        [] => "X".to_string(),
        [word] => word.chars().take(max_len).collect(),
        words => words.iter().filter_map(|w| w.chars().next()).collect(),
    };
    code.to_uppercase().chars().take(max_len).collect()
}

/// Append `suffix`, shortening the base so the result fits `max_len`.
fn with_suffix(base: &str, suffix: &str, max_len: usize) -> String {
    let keep = max_len.saturating_sub(suffix.chars().count()).max(1);
    let mut code: String = base.chars().take(keep).collect();
    code.push_str(suffix);
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use lead_store::MemoryLeadStore;

    #[test]
    fn test_initials() {
        assert_eq!(initials("Spring Sale Promo", 6), "SSP");
        assert_eq!(initials("Oman", 3), "OMA");
        assert_eq!(initials("united arab emirates", 3), "UAE");
        assert_eq!(initials("Google Ads - Search Network Campaign", 4), "GASN");
        assert_eq!(initials("!!!", 4), "X");
    }

    #[test]
    fn test_with_suffix_fits_max_len() {
        assert_eq!(with_suffix("UAE", "2", 3), "UA2");
        assert_eq!(with_suffix("SSP", "2", 6), "SSP2");
        assert_eq!(with_suffix("GASN", "47", 4), "GA47");
    }

    #[tokio::test]
    async fn test_blank_name_is_no_entity() {
        let store = MemoryLeadStore::new();
        let mut cache = DimensionCache::new();
        let resolver = EntityResolver::new(&store);
        assert!(resolver
            .resolve(&mut cache, DimensionKind::Country, "   ", true)
            .await
            .is_none());
        assert_eq!(store.stats().find_dimension_calls, 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_storage() {
        let store = MemoryLeadStore::new();
        let id = store.seed_dimension(DimensionKind::Country, "Oman", Some("عمان"), Some("OM"));
        let mut cache = DimensionCache::new();
        cache.prime(&store).await.unwrap();
        store.reset_stats();

        let resolver = EntityResolver::new(&store);
        for name in ["oman", "OMAN", "عمان"] {
            let resolved = resolver
                .resolve(&mut cache, DimensionKind::Country, name, true)
                .await
                .unwrap();
            assert_eq!(resolved, Resolved { id, created: false });
        }
        assert_eq!(store.stats(), Default::default());
    }

    #[tokio::test]
    async fn test_colliding_initials_get_distinct_codes() {
        let store = MemoryLeadStore::new();
        let mut cache = DimensionCache::new();
        let resolver = EntityResolver::new(&store);

        let first = resolver
            .resolve(&mut cache, DimensionKind::Campaign, "Spring Sale Promo", true)
            .await
            .unwrap();
        let second = resolver
            .resolve(&mut cache, DimensionKind::Campaign, "Summer Social Push", true)
            .await
            .unwrap();
        assert!(first.created && second.created);
        assert_ne!(first.id, second.id);

        let codes: Vec<Option<String>> = store
            .dimensions(DimensionKind::Campaign)
            .into_iter()
            .map(|row| row.code)
            .collect();
        assert_eq!(codes, vec![Some("SSP".into()), Some("SSP2".into())]);
    }

    #[tokio::test]
    async fn test_exhausted_suffixes_fall_back_to_random_code() {
        let store = MemoryLeadStore::new();
        store.seed_dimension(DimensionKind::Source, "Webinars", None, Some("WEBI"));
        for n in 2..=MAX_SEQUENTIAL_SUFFIX {
            let code = format!("WEB{n}");
            store.seed_dimension(DimensionKind::Source, &code, None, Some(code.as_str()));
        }
        let mut cache = DimensionCache::new();
        let resolved = EntityResolver::new(&store)
            .resolve(&mut cache, DimensionKind::Source, "Webinar", true)
            .await
            .unwrap();
        let row = store
            .dimensions(DimensionKind::Source)
            .into_iter()
            .find(|r| r.id == resolved.id)
            .unwrap();
        let code = row.code.unwrap();
        assert_eq!(code.len(), 4);
        assert!(code.starts_with("WE"));
        let suffix: u32 = code[2..].parse().unwrap();
        assert!((10..100).contains(&suffix));
    }

    #[tokio::test]
    async fn test_lookup_only_never_creates() {
        let store = MemoryLeadStore::new();
        let mut cache = DimensionCache::new();
        let resolved = EntityResolver::new(&store)
            .resolve(&mut cache, DimensionKind::CampaignGroup, "Q3", false)
            .await;
        assert!(resolved.is_none());
        assert_eq!(store.stats().insert_dimension_calls, 0);
    }

    #[tokio::test]
    async fn test_lookup_only_miss_is_queried_once() {
        let store = MemoryLeadStore::new();
        let mut cache = DimensionCache::new();
        let resolver = EntityResolver::new(&store);
        for name in ["Q3", "q3", " Q3 "] {
            let resolved = resolver
                .resolve(&mut cache, DimensionKind::CampaignGroup, name, false)
                .await;
            assert!(resolved.is_none());
        }
        assert_eq!(store.stats().find_dimension_calls, 1);

        // A mapping allowed to create still creates the remembered miss
        let created = resolver
            .resolve(&mut cache, DimensionKind::CampaignGroup, "Q3", true)
            .await
            .unwrap();
        assert!(created.created);
        assert!(!cache.is_missing(DimensionKind::CampaignGroup, "Q3"));
        let found = resolver
            .resolve(&mut cache, DimensionKind::CampaignGroup, "q3", false)
            .await
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_insert_failure_is_no_entity() {
        let store = MemoryLeadStore::new();
        store.fail_dimension_inserts(DimensionKind::Country);
        let mut cache = DimensionCache::new();
        let resolved = EntityResolver::new(&store)
            .resolve(&mut cache, DimensionKind::Country, "Qatar", true)
            .await;
        assert!(resolved.is_none());
        assert_eq!(cache.len(DimensionKind::Country), 0);
    }
}
