use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn, Instrument};

use crate::aggregate::AttributionAggregate;
use crate::assign::{assign, AssignmentContext};
use crate::attribution::{
    AttributionKey, AttributionMethodology, AttributionQuery, LookbackPeriod, QueryMode,
    TimeWindow, UserEventInfo, LOOKBACK_CAP_DAYS, SESSION_EVENT_NAME,
};
use crate::batch::{BatchedLookup, IdentityResolver, DEFAULT_USER_BATCH_SIZE};
use crate::config::Config;
use crate::error::CoreError;
use crate::locator::{ConvertedUsers, EventLocator, ResolvedEvent};
use crate::observability::Observability;
use crate::report::{format_report, QueryResult, ReportLayout, ResultMeta};
use crate::session::{SessionMap, SessionMapBuilder, UserTouchpoints};
use crate::store::AttributionStore;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub user_batch_size: usize,
    pub lookback_cap_days: u32,
    pub query_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            user_batch_size: DEFAULT_USER_BATCH_SIZE,
            lookback_cap_days: LOOKBACK_CAP_DAYS,
            query_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            user_batch_size: config.user_batch_size,
            lookback_cap_days: config.lookback_cap_days,
            query_timeout: config.query_timeout(),
        }
    }
}

/// Runs attribution queries against an [`AttributionStore`].
///
/// Each run is sequential: locate converters, locate linked events, build
/// the session map, assign credit, then enrich and format. Nothing is
/// shared between runs.
pub struct AttributionEngine<S: AttributionStore> {
    store: Arc<S>,
    settings: EngineSettings,
}

impl<S: AttributionStore> AttributionEngine<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// [`run`](Self::run) bounded by the configured query timeout.
    pub async fn run_with_deadline(
        &self,
        query: &AttributionQuery,
        obs: &Observability,
    ) -> Result<QueryResult, CoreError> {
        let deadline = self.settings.query_timeout;
        match tokio::time::timeout(deadline, self.run(query, obs)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    project_id = %obs.project_id,
                    query_id = %obs.query_id,
                    ?deadline,
                    "Attribution query timed out"
                );
                Err(CoreError::Timeout(deadline))
            }
        }
    }

    pub async fn run(
        &self,
        query: &AttributionQuery,
        obs: &Observability,
    ) -> Result<QueryResult, CoreError> {
        self.run_inner(query, obs).instrument(obs.span()).await
    }

    async fn run_inner(
        &self,
        query: &AttributionQuery,
        obs: &Observability,
    ) -> Result<QueryResult, CoreError> {
        query.validate()?;
        warn_unrecognized_methodology(query);
        let mode = query.mode()?;
        let lookback = query.lookback(self.settings.lookback_cap_days);
        let campaign_window = query.campaign_window();
        let conversion_window = query.conversion_window(lookback);
        let store = self.store.as_ref();

        let name_ids = store
            .event_name_ids(&obs.project_id, &query.event_names())
            .await
            .map_err(obs.store_failure("event_names"))?;
        let goal = ResolvedEvent {
            event: &query.goal_event,
            event_name_ids: ids_for(&name_ids, &query.goal_event.name)?,
        };
        let linked = query
            .linked_events
            .iter()
            .map(|event| {
                Ok(ResolvedEvent {
                    event,
                    event_name_ids: ids_for(&name_ids, &event.name)?,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        let session_ids = ids_for(&name_ids, SESSION_EVENT_NAME)?;

        let locator = EventLocator::new(store, obs, self.settings.user_batch_size);
        let converted = locator.locate(goal, conversion_window).await?;
        let linked_infos = locator
            .locate_linked(&linked, &converted, conversion_window)
            .await?;
        info!(
            converted = converted.len(),
            linked = linked_infos.len(),
            "Located conversions"
        );

        let sessions = self
            .build_session_map(query, session_ids, lookback, obs)
            .await?;
        info!(users = sessions.len(), "Built session map");

        let run = AssignmentRun {
            sessions: &sessions,
            lookback,
            campaign_window,
            obs,
        };
        let mut aggregate = run.attribute(query.methodology, &converted, &linked_infos);

        match &mode {
            QueryMode::Single => {}
            QueryMode::MethodologyComparison(compare) => {
                aggregate.merge_compare(run.attribute(*compare, &converted, &[]));
            }
            QueryMode::GoalEventComparison(compare_goal) => {
                let compare = ResolvedEvent {
                    event: compare_goal,
                    event_name_ids: ids_for(&name_ids, &compare_goal.name)?,
                };
                let compare_converted = locator.locate(compare, conversion_window).await?;
                aggregate.merge_compare(run.attribute(query.methodology, &compare_converted, &[]));
            }
        }

        add_website_visitors(&mut aggregate, &sessions);

        let (from_date, to_date) = query.local_dates()?;
        let performance = store
            .fetch_performance_data(
                &obs.project_id,
                query.attribution_key,
                &query.custom_dimensions,
                from_date,
                to_date,
            )
            .await
            .map_err(obs.store_failure("performance"))?;
        for (key, data) in performance {
            aggregate.attach_performance(AttributionKey::from_value(Some(&key)), data);
        }

        let currency = match store
            .channel_account(&obs.project_id)
            .await
            .map_err(obs.store_failure("channel_account"))?
        {
            Some(account) => store
                .fetch_currency(&obs.project_id, &account, from_date, to_date)
                .await
                .map_err(obs.store_failure("currency"))?
                .unwrap_or_default(),
            None => String::new(),
        };

        let meta = ResultMeta {
            currency,
            methodology: query.methodology.as_str().to_string(),
            methodology_compare: query.methodology_compare.map(|m| m.as_str().to_string()),
            query_id: obs.query_id.clone(),
        };
        let keys = aggregate.len();
        let result = format_report(aggregate, &ReportLayout::for_query(query), &query.key_filters, meta);
        info!(keys, rows = result.rows.len(), "Attribution query complete");
        Ok(result)
    }

    async fn build_session_map(
        &self,
        query: &AttributionQuery,
        session_ids: &[String],
        lookback: LookbackPeriod,
        obs: &Observability,
    ) -> Result<SessionMap, CoreError> {
        let store = self.store.as_ref();
        let exposures = store
            .find_touchpoint_exposures(
                &obs.project_id,
                session_ids,
                query.attribution_key.session_property(),
                query.session_window(lookback),
            )
            .await
            .map_err(obs.store_failure("sessions"))?;

        let mut builder = SessionMapBuilder::new(query.campaign_window());
        for exposure in &exposures {
            builder.observe(exposure);
        }
        let raw_user_ids = builder.raw_user_ids();
        let identities = IdentityResolver::new(store, &obs.project_id, self.settings.user_batch_size)
            .lookup_all(raw_user_ids.as_slice())
            .await
            .map_err(obs.store_failure("session_identity"))?;
        Ok(builder.coalesce(&identities))
    }
}

/// Shared inputs for assigning credit over one population.
struct AssignmentRun<'a> {
    sessions: &'a SessionMap,
    lookback: LookbackPeriod,
    campaign_window: TimeWindow,
    obs: &'a Observability,
}

impl AssignmentRun<'_> {
    /// Linked funnel events are credited against the identity's goal
    /// conversion, so they share its lookback window.
    fn attribute(
        &self,
        methodology: AttributionMethodology,
        converted: &ConvertedUsers,
        linked: &[UserEventInfo],
    ) -> AttributionAggregate {
        let mut aggregate = AttributionAggregate::new();
        let mut converted_at: HashMap<&str, i64> = HashMap::with_capacity(converted.conversions.len());
        for info in &converted.conversions {
            converted_at.insert(info.coal_user_id.as_str(), info.timestamp);
            for key in self.assign_one(methodology, info, info.timestamp) {
                aggregate.add_conversion_credit(&key);
            }
        }
        for info in linked {
            let Some(&conversion_timestamp) = converted_at.get(info.coal_user_id.as_str()) else {
                warn!(
                    coal_user_id = %info.coal_user_id,
                    event = %info.event_name,
                    "Linked event for an identity without a goal conversion"
                );
                continue;
            };
            for key in self.assign_one(methodology, info, conversion_timestamp) {
                aggregate.add_linked_credit(&info.event_name, &key);
            }
        }
        aggregate
    }

    fn assign_one(
        &self,
        methodology: AttributionMethodology,
        info: &UserEventInfo,
        conversion_timestamp: i64,
    ) -> Vec<AttributionKey> {
        let empty = UserTouchpoints::new();
        let touchpoints = self.sessions.touchpoints(&info.coal_user_id).unwrap_or(&empty);
        let ctx = AssignmentContext {
            conversion_timestamp,
            lookback: self.lookback,
            campaign_window: self.campaign_window,
        };
        let keys = assign(methodology, touchpoints, &ctx);
        if self.obs.debug {
            debug!(
                coal_user_id = %info.coal_user_id,
                event = %info.event_name,
                timestamp = info.timestamp,
                conversion_timestamp,
                methodology = methodology.as_str(),
                touchpoints = touchpoints.len(),
                keys = ?keys.iter().map(|k| k.label()).collect::<Vec<_>>(),
                "Assigned attribution"
            );
        }
        keys
    }
}

/// Unknown methodology names deserialize to `Unrecognized` and credit only
/// `$none`. Flag them so a typo does not pass silently.
fn warn_unrecognized_methodology(query: &AttributionQuery) {
    let compare = query.methodology_compare.into_iter();
    for methodology in std::iter::once(query.methodology).chain(compare) {
        if methodology == AttributionMethodology::Unrecognized {
            warn!(
                goal_event = %query.goal_event.name,
                "Unrecognized attribution methodology, all conversions credited to $none"
            );
        }
    }
}

/// An event name without any registered id is a query error.
fn ids_for<'m>(
    name_ids: &'m HashMap<String, Vec<String>>,
    name: &str,
) -> Result<&'m [String], CoreError> {
    name_ids
        .get(name)
        .filter(|ids| !ids.is_empty())
        .map(Vec::as_slice)
        .ok_or_else(|| CoreError::UnknownEventName(name.to_string()))
}

/// One visitor per identity and key exposed inside the query window.
fn add_website_visitors(aggregate: &mut AttributionAggregate, sessions: &SessionMap) {
    for (_, touchpoints) in sessions.iter() {
        for (key, range) in touchpoints {
            if range.seen_in_query_period {
                aggregate.add_website_visit(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::{AttributionDimension, GoalEvent, PerformanceData, SECS_IN_A_DAY};
    use crate::session::TouchpointExposure;
    use crate::store::{EventOccurrence, OccurrenceQuery};
    use chrono::NaiveDate;

    #[derive(Default)]
    struct StubStore {
        slow_occurrences: bool,
        failing_sessions: bool,
        without_sessions: bool,
    }

    #[async_trait::async_trait]
    impl AttributionStore for StubStore {
        async fn event_name_ids(
            &self,
            _project_id: &str,
            _names: &[String],
        ) -> anyhow::Result<HashMap<String, Vec<String>>> {
            let mut ids = HashMap::new();
            ids.insert("signup".to_string(), vec!["n_signup".to_string()]);
            ids.insert("purchase".to_string(), vec!["n_purchase".to_string()]);
            if !self.without_sessions {
                ids.insert(SESSION_EVENT_NAME.to_string(), vec!["n_session".to_string()]);
            }
            Ok(ids)
        }

        async fn find_event_occurrences(
            &self,
            _project_id: &str,
            query: &OccurrenceQuery<'_>,
        ) -> anyhow::Result<Vec<EventOccurrence>> {
            if self.slow_occurrences {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let timestamp = if query.event_name_ids.iter().any(|id| id == "n_purchase") {
                PURCHASE_AT
            } else {
                500
            };
            Ok(vec![EventOccurrence {
                raw_user_id: "u1".to_string(),
                timestamp,
            }])
        }

        async fn find_touchpoint_exposures(
            &self,
            _project_id: &str,
            _session_event_name_ids: &[String],
            _key_property: &str,
            _window: TimeWindow,
        ) -> anyhow::Result<Vec<TouchpointExposure>> {
            if self.failing_sessions {
                anyhow::bail!("connection reset");
            }
            Ok(vec![TouchpointExposure {
                raw_user_id: "u1".to_string(),
                key: Some("spring".to_string()),
                timestamp: 100,
            }])
        }

        async fn resolve_coalesced_identity(
            &self,
            _project_id: &str,
            raw_user_ids: &[String],
        ) -> anyhow::Result<HashMap<String, String>> {
            Ok(raw_user_ids.iter().map(|id| (id.clone(), id.clone())).collect())
        }

        async fn fetch_performance_data(
            &self,
            _project_id: &str,
            _dimension: AttributionDimension,
            _custom_dimensions: &[String],
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> anyhow::Result<HashMap<String, PerformanceData>> {
            Ok(HashMap::new())
        }

        async fn channel_account(&self, _project_id: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        async fn fetch_currency(
            &self,
            _project_id: &str,
            _account_id: &str,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    /// Three days after the only session, well past a one-day lookback.
    const PURCHASE_AT: i64 = 100 + 3 * SECS_IN_A_DAY;

    fn query() -> AttributionQuery {
        AttributionQuery::new(GoalEvent::named("signup"), 0, 1_000, 1)
    }

    async fn run(store: StubStore, settings: EngineSettings) -> Result<QueryResult, CoreError> {
        run_query(store, settings, query()).await
    }

    async fn run_query(
        store: StubStore,
        settings: EngineSettings,
        query: AttributionQuery,
    ) -> Result<QueryResult, CoreError> {
        let obs = Observability::new("proj_1", &query, true).expect("observability");
        AttributionEngine::new(Arc::new(store), settings)
            .run_with_deadline(&query, &obs)
            .await
    }

    #[tokio::test]
    async fn credits_session_key_for_conversion() {
        let result = run(StubStore::default(), EngineSettings::default())
            .await
            .expect("run");
        assert_eq!(result.value("spring", "signup - Users"), Some(1.0));
        assert_eq!(result.meta.currency, "");
    }

    #[tokio::test]
    async fn linked_event_uses_goal_conversion_lookback() {
        let mut query = AttributionQuery::new(GoalEvent::named("signup"), 0, 10 * SECS_IN_A_DAY, 1);
        query.linked_events = vec![GoalEvent::named("purchase")];
        let result = run_query(StubStore::default(), EngineSettings::default(), query)
            .await
            .expect("run");
        assert_eq!(result.value("spring", "signup - Users"), Some(1.0));
        assert_eq!(result.value("spring", "purchase - Users"), Some(1.0));
        assert!(result.row("$none").is_none());
    }

    #[tokio::test]
    async fn unrecognized_methodology_credits_none() {
        let mut query = query();
        query.methodology = AttributionMethodology::Unrecognized;
        let result = run_query(StubStore::default(), EngineSettings::default(), query)
            .await
            .expect("run");
        assert_eq!(result.value("$none", "signup - Users"), Some(1.0));
        assert_eq!(result.value("spring", "signup - Users"), Some(0.0));
        assert_eq!(result.meta.methodology, "Unrecognized");
    }

    #[tokio::test]
    async fn slow_store_hits_deadline() {
        let store = StubStore {
            slow_occurrences: true,
            ..StubStore::default()
        };
        let settings = EngineSettings {
            query_timeout: Duration::from_millis(20),
            ..EngineSettings::default()
        };
        let err = run(store, settings).await.expect_err("must time out");
        assert!(matches!(err, CoreError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn store_failure_names_the_stage() {
        let store = StubStore {
            failing_sessions: true,
            ..StubStore::default()
        };
        let err = run(store, EngineSettings::default()).await.expect_err("must fail");
        assert!(matches!(err, CoreError::Store { stage: "sessions", .. }));
        assert!(!err.is_config_error());
    }

    #[tokio::test]
    async fn missing_session_event_is_unknown_name() {
        let store = StubStore {
            without_sessions: true,
            ..StubStore::default()
        };
        let err = run(store, EngineSettings::default()).await.expect_err("must fail");
        assert!(matches!(err, CoreError::UnknownEventName(ref name) if name == SESSION_EVENT_NAME));
    }

    #[test]
    fn settings_follow_config() {
        let config = Config {
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            user_batch_size: 50,
            lookback_cap_days: 90,
            query_timeout_secs: 12,
            attribution_debug: false,
        };
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.user_batch_size, 50);
        assert_eq!(settings.lookback_cap_days, 90);
        assert_eq!(settings.query_timeout, Duration::from_secs(12));
    }
}
