use super::table::FieldTable;
use crate::store::{DocumentStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown canonical field '{0}'")]
    UnknownField(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A canonical field none of whose variants exist in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedField {
    pub field: String,
    pub tried: Vec<String>,
}

/// One row of a full resolution report for an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldReport {
    pub canonical: String,
    pub resolved: Option<String>,
    pub variants: Vec<String>,
}

/// Outcome of resolving a request's canonical fields in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    found: BTreeMap<String, String>,
    unresolved: Vec<UnresolvedField>,
}

impl Resolution {
    pub fn get(&self, canonical: &str) -> Option<&str> {
        self.found.get(canonical).map(String::as_str)
    }

    pub fn unresolved(&self) -> &[UnresolvedField] {
        &self.unresolved
    }

    pub fn is_unresolved(&self, canonical: &str) -> bool {
        self.unresolved.iter().any(|u| u.field == canonical)
    }

    pub fn insert_found(&mut self, canonical: &str, concrete: &str) {
        self.found.insert(canonical.to_string(), concrete.to_string());
    }

    pub fn insert_unresolved(&mut self, canonical: &str, tried: &[String]) {
        if !self.is_unresolved(canonical) {
            self.unresolved.push(UnresolvedField {
                field: canonical.to_string(),
                tried: tried.to_vec(),
            });
        }
    }
}

/// Resolutions for one index. Dropped as a whole when it outlives the TTL or
/// the index is invalidated, so a mapping change is picked up at once.
#[derive(Debug)]
struct IndexEpoch {
    started: Instant,
    fields: HashMap<String, Option<String>>,
}

/// Discovers which concrete field name an index uses for each canonical
/// field by probing variants in priority order.
pub struct FieldResolver {
    store: Arc<dyn DocumentStore>,
    table: FieldTable,
    cache_ttl: Option<Duration>,
    cache: RwLock<HashMap<String, IndexEpoch>>,
}

impl FieldResolver {
    pub fn new(store: Arc<dyn DocumentStore>, table: FieldTable, cache_ttl: Option<Duration>) -> Self {
        Self {
            store,
            table,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    /// Return the first variant with at least one matching document, or
    /// `None` when no variant exists in the index. Priority wins over
    /// population: a later variant is never preferred because it has more
    /// documents.
    pub async fn resolve(&self, canonical: &str, index: &str) -> Result<Option<String>, ResolveError> {
        let variants = self
            .table
            .variants(canonical)
            .ok_or_else(|| ResolveError::UnknownField(canonical.to_string()))?;

        if let Some(cached) = self.cached(index, canonical).await {
            return Ok(cached);
        }

        let mut resolved = None;
        for variant in variants {
            if self.store.field_exists(index, variant).await? {
                resolved = Some(variant.clone());
                break;
            }
        }

        match &resolved {
            Some(concrete) => {
                tracing::debug!(index = %index, canonical = %canonical, field = %concrete, "Resolved field")
            }
            None => {
                tracing::debug!(index = %index, canonical = %canonical, tried = ?variants, "No variant present")
            }
        }

        self.remember(index, canonical, resolved.clone()).await;
        Ok(resolved)
    }

    /// Resolve every field a request needs, once each.
    pub async fn resolve_all<'a, I>(&self, canonicals: I, index: &str) -> Result<Resolution, ResolveError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut resolution = Resolution::default();
        for canonical in canonicals {
            if resolution.get(canonical).is_some() || resolution.is_unresolved(canonical) {
                continue;
            }
            match self.resolve(canonical, index).await? {
                Some(concrete) => resolution.insert_found(canonical, &concrete),
                None => {
                    let tried = self.table.variants(canonical).unwrap_or_default();
                    resolution.insert_unresolved(canonical, tried);
                }
            }
        }
        Ok(resolution)
    }

    /// Resolve every canonical field in the table against `index`.
    pub async fn report(&self, index: &str) -> Result<Vec<FieldReport>, ResolveError> {
        let mut rows = Vec::new();
        for canonical in self.table.canonical_names() {
            let resolved = self.resolve(canonical, index).await?;
            rows.push(FieldReport {
                canonical: canonical.to_string(),
                resolved,
                variants: self.table.variants(canonical).unwrap_or_default().to_vec(),
            });
        }
        Ok(rows)
    }

    /// Forget every resolution made against `index`.
    pub async fn invalidate(&self, index: &str) {
        if self.cache.write().await.remove(index).is_some() {
            tracing::info!(index = %index, "Field resolution cache invalidated");
        }
    }

    async fn cached(&self, index: &str, canonical: &str) -> Option<Option<String>> {
        let cache = self.cache.read().await;
        let epoch = cache.get(index)?;
        if self.expired(epoch) {
            return None;
        }
        epoch.fields.get(canonical).cloned()
    }

    async fn remember(&self, index: &str, canonical: &str, resolved: Option<String>) {
        let mut cache = self.cache.write().await;
        let expired = cache.get(index).map_or(false, |epoch| self.expired(epoch));
        if expired {
            cache.remove(index);
        }

        cache
            .entry(index.to_string())
            .or_insert_with(|| IndexEpoch {
                started: Instant::now(),
                fields: HashMap::new(),
            })
            .fields
            .insert(canonical.to_string(), resolved);
    }

    fn expired(&self, epoch: &IndexEpoch) -> bool {
        self.cache_ttl
            .map_or(false, |ttl| epoch.started.elapsed() >= ttl)
    }
}
