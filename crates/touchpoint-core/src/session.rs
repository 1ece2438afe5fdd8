use std::collections::HashMap;

use serde::Serialize;

use crate::attribution::{AttributionKey, TimeWindow};

/// Earliest and latest time a user was exposed to one attribution key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TouchpointRange {
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    /// At least one exposure fell inside the query window.
    pub seen_in_query_period: bool,
}

impl TouchpointRange {
    pub fn new(timestamp: i64, in_query_period: bool) -> Self {
        Self {
            min_timestamp: timestamp,
            max_timestamp: timestamp,
            seen_in_query_period: in_query_period,
        }
    }

    pub fn observe(&mut self, timestamp: i64, in_query_period: bool) {
        self.min_timestamp = self.min_timestamp.min(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        self.seen_in_query_period |= in_query_period;
    }

    pub fn merge(&mut self, other: &TouchpointRange) {
        self.min_timestamp = self.min_timestamp.min(other.min_timestamp);
        self.max_timestamp = self.max_timestamp.max(other.max_timestamp);
        self.seen_in_query_period |= other.seen_in_query_period;
    }
}

/// One `$session` row as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchpointExposure {
    pub raw_user_id: String,
    /// `None` when the session carried no value for the key property.
    pub key: Option<String>,
    pub timestamp: i64,
}

pub type UserTouchpoints = HashMap<AttributionKey, TouchpointRange>;

/// Touchpoint history per coalesced identity. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct SessionMap {
    users: HashMap<String, UserTouchpoints>,
}

impl SessionMap {
    pub fn touchpoints(&self, coal_user_id: &str) -> Option<&UserTouchpoints> {
        self.users.get(coal_user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &UserTouchpoints)> {
        self.users.iter()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Accumulates exposures per raw user, then folds them onto coalesced
/// identities.
#[derive(Debug)]
pub struct SessionMapBuilder {
    query_period: TimeWindow,
    raw: HashMap<String, UserTouchpoints>,
}

impl SessionMapBuilder {
    pub fn new(query_period: TimeWindow) -> Self {
        Self {
            query_period,
            raw: HashMap::new(),
        }
    }

    pub fn observe(&mut self, exposure: &TouchpointExposure) {
        let key = AttributionKey::from_value(exposure.key.as_deref());
        let in_period = self.query_period.contains(exposure.timestamp);
        self.raw
            .entry(exposure.raw_user_id.clone())
            .or_default()
            .entry(key)
            .and_modify(|range| range.observe(exposure.timestamp, in_period))
            .or_insert_with(|| TouchpointRange::new(exposure.timestamp, in_period));
    }

    pub fn raw_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.raw.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Raw users missing from `identities` are dropped.
    pub fn coalesce(self, identities: &HashMap<String, String>) -> SessionMap {
        let mut users: HashMap<String, UserTouchpoints> = HashMap::new();
        for (raw_user_id, touchpoints) in self.raw {
            let Some(coal_user_id) = identities.get(&raw_user_id) else {
                continue;
            };
            let merged = users.entry(coal_user_id.clone()).or_default();
            for (key, range) in touchpoints {
                merged
                    .entry(key)
                    .and_modify(|existing| existing.merge(&range))
                    .or_insert(range);
            }
        }
        SessionMap { users }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure(user: &str, key: Option<&str>, ts: i64) -> TouchpointExposure {
        TouchpointExposure {
            raw_user_id: user.to_string(),
            key: key.map(str::to_string),
            timestamp: ts,
        }
    }

    #[test]
    fn tracks_running_min_and_max_per_key() {
        let mut builder = SessionMapBuilder::new(TimeWindow::new(0, 1_000));
        builder.observe(&exposure("u1", Some("brand"), 300));
        builder.observe(&exposure("u1", Some("brand"), 100));
        builder.observe(&exposure("u1", Some("brand"), 200));
        let identities = HashMap::from([("u1".to_string(), "c1".to_string())]);
        let sessions = builder.coalesce(&identities);

        let range = sessions.touchpoints("c1").expect("c1")[&AttributionKey::from("brand")];
        assert_eq!(range.min_timestamp, 100);
        assert_eq!(range.max_timestamp, 300);
    }

    #[test]
    fn missing_key_values_are_kept_under_none() {
        let mut builder = SessionMapBuilder::new(TimeWindow::new(0, 1_000));
        builder.observe(&exposure("u1", None, 50));
        builder.observe(&exposure("u1", Some(""), 70));
        let identities = HashMap::from([("u1".to_string(), "u1".to_string())]);
        let sessions = builder.coalesce(&identities);

        let touchpoints = sessions.touchpoints("u1").expect("u1");
        assert_eq!(touchpoints.len(), 1);
        let range = touchpoints[&AttributionKey::NoAttribution];
        assert_eq!((range.min_timestamp, range.max_timestamp), (50, 70));
    }

    #[test]
    fn raw_users_merge_onto_coalesced_identity() {
        let mut builder = SessionMapBuilder::new(TimeWindow::new(500, 1_000));
        builder.observe(&exposure("device_a", Some("brand"), 400));
        builder.observe(&exposure("device_b", Some("brand"), 900));
        builder.observe(&exposure("device_b", Some("retarget"), 950));
        builder.observe(&exposure("orphan", Some("brand"), 600));
        assert_eq!(builder.raw_user_ids(), vec!["device_a", "device_b", "orphan"]);

        let identities = HashMap::from([
            ("device_a".to_string(), "customer".to_string()),
            ("device_b".to_string(), "customer".to_string()),
        ]);
        let sessions = builder.coalesce(&identities);
        assert_eq!(sessions.len(), 1);

        let touchpoints = sessions.touchpoints("customer").expect("customer");
        let brand = touchpoints[&AttributionKey::from("brand")];
        assert_eq!((brand.min_timestamp, brand.max_timestamp), (400, 900));
        assert!(brand.seen_in_query_period);
        assert!(touchpoints.contains_key(&AttributionKey::from("retarget")));
    }

    #[test]
    fn query_period_flag_only_set_inside_window() {
        let mut builder = SessionMapBuilder::new(TimeWindow::new(500, 1_000));
        builder.observe(&exposure("u1", Some("brand"), 100));
        let identities = HashMap::from([("u1".to_string(), "u1".to_string())]);
        let sessions = builder.coalesce(&identities);
        assert!(!sessions.touchpoints("u1").expect("u1")[&AttributionKey::from("brand")]
            .seen_in_query_period);
    }
}
