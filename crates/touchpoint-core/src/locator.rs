use std::collections::HashMap;

use tracing::{debug, warn};

use crate::attribution::{EventType, GoalEvent, TimeWindow, UserEventInfo};
use crate::batch::{earliest_per_user, BatchedLookup, EarliestOccurrenceLookup, IdentityResolver};
use crate::error::CoreError;
use crate::filter::PredicateGroups;
use crate::observability::Observability;
use crate::store::{AttributionStore, OccurrenceQuery};

/// Users that performed the goal event, with their earliest conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertedUsers {
    pub raw_to_coalesced: HashMap<String, String>,
    pub coalesced_to_raw: HashMap<String, Vec<String>>,
    /// One entry per coalesced identity, ordered by identity.
    pub conversions: Vec<UserEventInfo>,
}

impl ConvertedUsers {
    pub fn raw_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.raw_to_coalesced.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }
}

/// An event to locate together with the ids its name resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedEvent<'a> {
    pub event: &'a GoalEvent,
    pub event_name_ids: &'a [String],
}

/// Per coalesced identity, the minimum over its raw users.
fn earliest_per_identity(
    earliest_raw: &HashMap<String, i64>,
    raw_to_coalesced: &HashMap<String, String>,
) -> Vec<(String, i64)> {
    let mut per_identity: HashMap<&str, i64> = HashMap::new();
    for (raw_user_id, timestamp) in earliest_raw {
        let Some(coal_user_id) = raw_to_coalesced.get(raw_user_id) else {
            continue;
        };
        per_identity
            .entry(coal_user_id.as_str())
            .and_modify(|ts| *ts = (*ts).min(*timestamp))
            .or_insert(*timestamp);
    }
    let mut ordered: Vec<(String, i64)> = per_identity
        .into_iter()
        .map(|(id, ts)| (id.to_string(), ts))
        .collect();
    ordered.sort();
    ordered
}

pub struct EventLocator<'a, S: AttributionStore + ?Sized> {
    store: &'a S,
    obs: &'a Observability,
    batch_size: usize,
}

impl<'a, S: AttributionStore + ?Sized> EventLocator<'a, S> {
    pub fn new(store: &'a S, obs: &'a Observability, batch_size: usize) -> Self {
        Self {
            store,
            obs,
            batch_size,
        }
    }

    /// Finds every converter of `goal` inside `window`.
    pub async fn locate(
        &self,
        goal: ResolvedEvent<'_>,
        window: TimeWindow,
    ) -> Result<ConvertedUsers, CoreError> {
        let filters = PredicateGroups::compile(&goal.event.properties)?;
        let query = OccurrenceQuery {
            event_name_ids: goal.event_name_ids,
            window,
            filters: &filters,
            candidate_user_ids: None,
        };
        let rows = self
            .store
            .find_event_occurrences(&self.obs.project_id, &query)
            .await
            .map_err(self.obs.store_failure("goal_events"))?;
        let earliest_raw = earliest_per_user(rows);

        let mut raw_user_ids: Vec<String> = earliest_raw.keys().cloned().collect();
        raw_user_ids.sort();
        let identities = IdentityResolver::new(self.store, &self.obs.project_id, self.batch_size)
            .lookup_all(raw_user_ids.as_slice())
            .await
            .map_err(self.obs.store_failure("goal_identity"))?;

        let mut converted = ConvertedUsers::default();
        let mut unresolved = 0usize;
        for raw_user_id in &raw_user_ids {
            match identities.get(raw_user_id) {
                Some(coal_user_id) => {
                    converted
                        .raw_to_coalesced
                        .insert(raw_user_id.clone(), coal_user_id.clone());
                    converted
                        .coalesced_to_raw
                        .entry(coal_user_id.clone())
                        .or_default()
                        .push(raw_user_id.clone());
                }
                None => unresolved += 1,
            }
        }
        if unresolved > 0 {
            warn!(
                project_id = %self.obs.project_id,
                event = %goal.event.name,
                unresolved,
                "Converted users without a known identity were skipped"
            );
        }

        converted.conversions = earliest_per_identity(&earliest_raw, &converted.raw_to_coalesced)
            .into_iter()
            .map(|(coal_user_id, timestamp)| UserEventInfo {
                coal_user_id,
                event_name: goal.event.name.clone(),
                timestamp,
                event_type: EventType::GoalEvent,
            })
            .collect();

        debug!(
            project_id = %self.obs.project_id,
            event = %goal.event.name,
            raw_users = raw_user_ids.len(),
            converted = converted.len(),
            "Located goal event"
        );
        Ok(converted)
    }

    /// Finds linked funnel events, only for users that already converted.
    pub async fn locate_linked(
        &self,
        linked: &[ResolvedEvent<'_>],
        converted: &ConvertedUsers,
        window: TimeWindow,
    ) -> Result<Vec<UserEventInfo>, CoreError> {
        let candidates = converted.raw_user_ids();
        if linked.is_empty() || candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut infos = Vec::new();
        for resolved in linked {
            let filters = PredicateGroups::compile(&resolved.event.properties)?;
            let lookup = EarliestOccurrenceLookup {
                store: self.store,
                project_id: &self.obs.project_id,
                event_name_ids: resolved.event_name_ids,
                window,
                filters: &filters,
                batch_size: self.batch_size,
            };
            let earliest_raw = lookup
                .lookup_all(candidates.as_slice())
                .await
                .map_err(self.obs.store_failure("linked_events"))?;

            let located = earliest_per_identity(&earliest_raw, &converted.raw_to_coalesced);
            debug!(
                project_id = %self.obs.project_id,
                event = %resolved.event.name,
                users = located.len(),
                "Located linked funnel event"
            );
            infos.extend(located.into_iter().map(|(coal_user_id, timestamp)| UserEventInfo {
                coal_user_id,
                event_name: resolved.event.name.clone(),
                timestamp,
                event_type: EventType::LinkedFunnelEvent,
            }));
        }
        Ok(infos)
    }
}
