use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use touchpoint_core::attribution::{AttributionDimension, PerformanceData, TimeWindow};
use touchpoint_core::session::TouchpointExposure;
use touchpoint_core::store::{AttributionStore, EventOccurrence, OccurrenceQuery};

use crate::DuckDbBackend;

#[async_trait]
impl AttributionStore for DuckDbBackend {
    async fn event_name_ids(
        &self,
        project_id: &str,
        names: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<String>>> {
        crate::queries::event_names::event_name_ids_inner(self, project_id, names).await
    }

    async fn find_event_occurrences(
        &self,
        project_id: &str,
        query: &OccurrenceQuery<'_>,
    ) -> anyhow::Result<Vec<EventOccurrence>> {
        crate::queries::occurrences::find_event_occurrences_inner(self, project_id, query).await
    }

    async fn find_touchpoint_exposures(
        &self,
        project_id: &str,
        session_event_name_ids: &[String],
        key_property: &str,
        window: TimeWindow,
    ) -> anyhow::Result<Vec<TouchpointExposure>> {
        crate::queries::exposures::find_touchpoint_exposures_inner(
            self,
            project_id,
            session_event_name_ids,
            key_property,
            window,
        )
        .await
    }

    async fn resolve_coalesced_identity(
        &self,
        project_id: &str,
        raw_user_ids: &[String],
    ) -> anyhow::Result<HashMap<String, String>> {
        crate::queries::identity::resolve_coalesced_identity_inner(self, project_id, raw_user_ids)
            .await
    }

    async fn fetch_performance_data(
        &self,
        project_id: &str,
        dimension: AttributionDimension,
        custom_dimensions: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<HashMap<String, PerformanceData>> {
        crate::queries::performance::fetch_performance_data_inner(
            self,
            project_id,
            dimension,
            custom_dimensions,
            from,
            to,
        )
        .await
    }

    async fn channel_account(&self, project_id: &str) -> anyhow::Result<Option<String>> {
        crate::queries::currency::channel_account_inner(self, project_id).await
    }

    async fn fetch_currency(
        &self,
        project_id: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> anyhow::Result<Option<String>> {
        crate::queries::currency::fetch_currency_inner(self, project_id, account_id, from, to)
            .await
    }
}
