use std::collections::HashMap;

use chrono::NaiveDate;

use crate::attribution::{AttributionDimension, PerformanceData, TimeWindow};
use crate::filter::PredicateGroups;
use crate::session::TouchpointExposure;

/// One matching event row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventOccurrence {
    pub raw_user_id: String,
    pub timestamp: i64,
}

/// Parameters for [`AttributionStore::find_event_occurrences`].
#[derive(Debug, Clone)]
pub struct OccurrenceQuery<'a> {
    pub event_name_ids: &'a [String],
    pub window: TimeWindow,
    pub filters: &'a PredicateGroups,
    /// Restrict the scan to these raw users. Callers keep this under the
    /// configured batch size.
    pub candidate_user_ids: Option<&'a [String]>,
}

/// Read access to the event, identity and marketing data an attribution
/// run needs. Implemented by the DuckDB backend.
#[async_trait::async_trait]
pub trait AttributionStore: Send + Sync + 'static {
    /// Event name -> every id registered under that name.
    async fn event_name_ids(
        &self,
        project_id: &str,
        names: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<String>>>;

    /// Rows in scan order. Rows that cannot be decoded are skipped.
    async fn find_event_occurrences(
        &self,
        project_id: &str,
        query: &OccurrenceQuery<'_>,
    ) -> anyhow::Result<Vec<EventOccurrence>>;

    async fn find_touchpoint_exposures(
        &self,
        project_id: &str,
        session_event_name_ids: &[String],
        key_property: &str,
        window: TimeWindow,
    ) -> anyhow::Result<Vec<TouchpointExposure>>;

    /// Raw user id -> coalesced identity. Unknown ids are omitted.
    async fn resolve_coalesced_identity(
        &self,
        project_id: &str,
        raw_user_ids: &[String],
    ) -> anyhow::Result<HashMap<String, String>>;

    async fn fetch_performance_data(
        &self,
        project_id: &str,
        dimension: AttributionDimension,
        custom_dimensions: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<HashMap<String, PerformanceData>>;

    /// First ad account configured for the project, if any.
    async fn channel_account(&self, project_id: &str) -> anyhow::Result<Option<String>>;

    async fn fetch_currency(
        &self,
        project_id: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Option<String>>;
}
