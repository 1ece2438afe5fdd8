use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::attribution::{AttributionKey, PerformanceData};

/// Everything reported for one attribution key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributionData {
    pub conversion_count: u64,
    pub compare_conversion_count: u64,
    /// Linked funnel event name -> credited users.
    pub linked_event_counts: BTreeMap<String, u64>,
    pub website_visitors: u64,
    pub performance: PerformanceData,
}

/// Per-query attribution results keyed by attribution key.
#[derive(Debug, Clone, Default)]
pub struct AttributionAggregate {
    data: HashMap<AttributionKey, AttributionData>,
}

impl AttributionAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversion_credit(&mut self, key: &AttributionKey) {
        self.data.entry(key.clone()).or_default().conversion_count += 1;
    }

    pub fn add_linked_credit(&mut self, event_name: &str, key: &AttributionKey) {
        *self
            .data
            .entry(key.clone())
            .or_default()
            .linked_event_counts
            .entry(event_name.to_string())
            .or_default() += 1;
    }

    /// Folds the conversion counts of a second run into the compare column.
    /// Keys from either side are kept; the side that lacks a key reads zero.
    pub fn merge_compare(&mut self, other: AttributionAggregate) {
        for (key, data) in other.data {
            self.data.entry(key).or_default().compare_conversion_count += data.conversion_count;
        }
    }

    pub fn add_website_visit(&mut self, key: &AttributionKey) {
        self.data.entry(key.clone()).or_default().website_visitors += 1;
    }

    /// Keys only known to the ad platform get a row when they had any activity.
    pub fn attach_performance(&mut self, key: AttributionKey, performance: PerformanceData) {
        match self.data.get_mut(&key) {
            Some(existing) => existing.performance = performance,
            None if performance.has_activity() => {
                self.data.insert(
                    key,
                    AttributionData {
                        performance,
                        ..AttributionData::default()
                    },
                );
            }
            None => {}
        }
    }

    pub fn get(&self, key: &AttributionKey) -> Option<&AttributionData> {
        self.data.get(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn total_conversions(&self) -> u64 {
        self.data.values().map(|d| d.conversion_count).sum()
    }

    /// Entries ordered by key label so output is deterministic.
    pub fn into_sorted(self) -> Vec<(AttributionKey, AttributionData)> {
        let mut entries: Vec<_> = self.data.into_iter().collect();
        entries.sort_by(|a, b| a.0.label().cmp(b.0.label()));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: &str) -> AttributionKey {
        AttributionKey::from(label)
    }

    #[test]
    fn credits_accumulate_per_key() {
        let mut agg = AttributionAggregate::new();
        agg.add_conversion_credit(&key("brand"));
        agg.add_conversion_credit(&key("brand"));
        agg.add_linked_credit("purchase", &key("brand"));
        agg.add_linked_credit("purchase", &key("generic"));

        let brand = agg.get(&key("brand")).expect("brand");
        assert_eq!(brand.conversion_count, 2);
        assert_eq!(brand.linked_event_counts["purchase"], 1);

        let generic = agg.get(&key("generic")).expect("generic");
        assert_eq!(generic.conversion_count, 0);
        assert_eq!(agg.total_conversions(), 2);
    }

    #[test]
    fn merge_compare_unions_disjoint_keys() {
        let mut a = AttributionAggregate::new();
        a.add_conversion_credit(&key("A"));
        let mut b = AttributionAggregate::new();
        b.add_conversion_credit(&key("B"));
        b.add_conversion_credit(&key("B"));

        a.merge_compare(b);
        assert_eq!(a.len(), 2);
        let a_row = a.get(&key("A")).expect("A");
        assert_eq!((a_row.conversion_count, a_row.compare_conversion_count), (1, 0));
        let b_row = a.get(&key("B")).expect("B");
        assert_eq!((b_row.conversion_count, b_row.compare_conversion_count), (0, 2));
    }

    #[test]
    fn performance_only_creates_rows_with_activity() {
        let mut agg = AttributionAggregate::new();
        agg.attach_performance(key("idle"), PerformanceData::default());
        assert!(agg.is_empty());

        agg.attach_performance(
            key("paid"),
            PerformanceData {
                clicks: 4,
                ..PerformanceData::default()
            },
        );
        assert_eq!(agg.get(&key("paid")).expect("paid").performance.clicks, 4);
    }

    #[test]
    fn into_sorted_orders_by_label() {
        let mut agg = AttributionAggregate::new();
        agg.add_website_visit(&key("zeta"));
        agg.add_website_visit(&AttributionKey::NoAttribution);
        agg.add_website_visit(&key("alpha"));
        let labels: Vec<String> = agg
            .into_sorted()
            .into_iter()
            .map(|(k, _)| k.label().to_string())
            .collect();
        assert_eq!(labels, vec!["$none", "alpha", "zeta"]);
    }
}
