use std::collections::HashMap;
use std::hash::Hash;

use crate::attribution::TimeWindow;
use crate::filter::PredicateGroups;
use crate::store::{AttributionStore, EventOccurrence, OccurrenceQuery};

/// Default number of user ids bound into a single store statement.
pub const DEFAULT_USER_BATCH_SIZE: usize = 2000;

/// A keyed lookup the store can only answer a bounded number of keys at a
/// time. [`lookup_all`](BatchedLookup::lookup_all) splits the input and
/// merges the partial maps.
#[async_trait::async_trait]
pub trait BatchedLookup<K, V>: Send + Sync
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    fn batch_size(&self) -> usize;

    async fn lookup_batch(&self, keys: &[K]) -> anyhow::Result<HashMap<K, V>>;

    async fn lookup_all(&self, keys: &[K]) -> anyhow::Result<HashMap<K, V>> {
        let mut resolved = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(self.batch_size().max(1)) {
            resolved.extend(self.lookup_batch(chunk).await?);
        }
        Ok(resolved)
    }
}

/// Raw user id -> coalesced identity.
pub struct IdentityResolver<'a, S: AttributionStore + ?Sized> {
    store: &'a S,
    project_id: &'a str,
    batch_size: usize,
}

impl<'a, S: AttributionStore + ?Sized> IdentityResolver<'a, S> {
    pub fn new(store: &'a S, project_id: &'a str, batch_size: usize) -> Self {
        Self {
            store,
            project_id,
            batch_size,
        }
    }
}

#[async_trait::async_trait]
impl<'a, S: AttributionStore + ?Sized> BatchedLookup<String, String> for IdentityResolver<'a, S> {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn lookup_batch(&self, keys: &[String]) -> anyhow::Result<HashMap<String, String>> {
        self.store
            .resolve_coalesced_identity(self.project_id, keys)
            .await
    }
}

/// Raw user id -> earliest occurrence of an event, restricted to the given
/// candidate users.
pub struct EarliestOccurrenceLookup<'a, S: AttributionStore + ?Sized> {
    pub store: &'a S,
    pub project_id: &'a str,
    pub event_name_ids: &'a [String],
    pub window: TimeWindow,
    pub filters: &'a PredicateGroups,
    pub batch_size: usize,
}

#[async_trait::async_trait]
impl<'a, S: AttributionStore + ?Sized> BatchedLookup<String, i64>
    for EarliestOccurrenceLookup<'a, S>
{
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn lookup_batch(&self, keys: &[String]) -> anyhow::Result<HashMap<String, i64>> {
        let query = OccurrenceQuery {
            event_name_ids: self.event_name_ids,
            window: self.window,
            filters: self.filters,
            candidate_user_ids: Some(keys),
        };
        let rows = self
            .store
            .find_event_occurrences(self.project_id, &query)
            .await?;
        Ok(earliest_per_user(rows))
    }
}

/// Keeps the smallest timestamp seen for each raw user.
pub fn earliest_per_user(rows: Vec<EventOccurrence>) -> HashMap<String, i64> {
    let mut earliest: HashMap<String, i64> = HashMap::new();
    for row in rows {
        earliest
            .entry(row.raw_user_id)
            .and_modify(|ts| {
                if row.timestamp < *ts {
                    *ts = row.timestamp;
                }
            })
            .or_insert(row.timestamp);
    }
    earliest
}
