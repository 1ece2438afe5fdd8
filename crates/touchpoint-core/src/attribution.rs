use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CoreError;
use crate::filter::{KeyValueFilter, PropertyFilter};

/// External label of the "no attribution" key.
pub const NONE_KEY_LABEL: &str = "$none";
/// Name of the event that carries touchpoint exposures.
pub const SESSION_EVENT_NAME: &str = "$session";
pub const SECS_IN_A_DAY: i64 = 86_400;
/// Lookback requests above this many days are clamped.
pub const LOOKBACK_CAP_DAYS: u32 = 370;

/// A touchpoint value that can receive credit, or the sentinel for
/// conversions with no marketing touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributionKey {
    NoAttribution,
    Key(String),
}

impl AttributionKey {
    /// Missing, blank and literal `$none` values all map to the sentinel.
    pub fn from_value(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some(NONE_KEY_LABEL) => AttributionKey::NoAttribution,
            Some(value) => AttributionKey::Key(value.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            AttributionKey::NoAttribution => NONE_KEY_LABEL,
            AttributionKey::Key(value) => value,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AttributionKey::NoAttribution)
    }
}

impl fmt::Display for AttributionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for AttributionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl From<&str> for AttributionKey {
    fn from(value: &str) -> Self {
        AttributionKey::from_value(Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AttributionMethodology {
    #[default]
    #[serde(rename = "First_Touch")]
    FirstTouch,
    #[serde(rename = "First_Touch_ND")]
    FirstTouchNonDirect,
    #[serde(rename = "Last_Touch")]
    LastTouch,
    #[serde(rename = "Last_Touch_ND")]
    LastTouchNonDirect,
    #[serde(rename = "Linear")]
    Linear,
    /// Credits both the first and the last touch.
    #[serde(rename = "U_Shaped")]
    UShaped,
    /// Any methodology name this build does not know. Assigns no-attribution.
    #[serde(other)]
    Unrecognized,
}

impl AttributionMethodology {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionMethodology::FirstTouch => "First_Touch",
            AttributionMethodology::FirstTouchNonDirect => "First_Touch_ND",
            AttributionMethodology::LastTouch => "Last_Touch",
            AttributionMethodology::LastTouchNonDirect => "Last_Touch_ND",
            AttributionMethodology::Linear => "Linear",
            AttributionMethodology::UShaped => "U_Shaped",
            AttributionMethodology::Unrecognized => "Unrecognized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Conversions are counted inside the query window only.
    #[default]
    ConversionBased,
    /// Conversions up to one lookback period after the window still count.
    EngagementBased,
}

/// Marketing dimension used as the attribution key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributionDimension {
    #[default]
    Campaign,
    AdGroup,
    Keyword,
    Source,
    ChannelGroup,
}

impl AttributionDimension {
    /// Property on the `$session` event holding this dimension's value.
    pub fn session_property(&self) -> &'static str {
        match self {
            AttributionDimension::Campaign => "$campaign",
            AttributionDimension::AdGroup => "$adgroup",
            AttributionDimension::Keyword => "$keyword",
            AttributionDimension::Source => "$source",
            AttributionDimension::ChannelGroup => "$channel",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            AttributionDimension::Campaign => "Campaign",
            AttributionDimension::AdGroup => "AdGroup",
            AttributionDimension::Keyword => "Keyword",
            AttributionDimension::Source => "Source",
            AttributionDimension::ChannelGroup => "ChannelGroup",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributionDimension::Campaign => "campaign",
            AttributionDimension::AdGroup => "ad_group",
            AttributionDimension::Keyword => "keyword",
            AttributionDimension::Source => "source",
            AttributionDimension::ChannelGroup => "channel_group",
        }
    }
}

/// An event name plus the property filters its occurrences must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvent {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

impl GoalEvent {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackPeriod(i64);

impl LookbackPeriod {
    pub fn from_days(days: u32) -> Self {
        LookbackPeriod(i64::from(days) * SECS_IN_A_DAY)
    }

    pub fn secs(&self) -> i64 {
        self.0
    }
}

/// Inclusive range of unix-second timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.from <= timestamp && timestamp <= self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GoalEvent,
    LinkedFunnelEvent,
}

/// Earliest occurrence of one event for one coalesced identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEventInfo {
    pub coal_user_id: String,
    pub event_name: String,
    pub timestamp: i64,
    pub event_type: EventType,
}

/// Ad platform metrics for a single attribution key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceData {
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub channel: Option<String>,
    #[serde(default)]
    pub custom_dimensions: BTreeMap<String, String>,
}

impl PerformanceData {
    pub fn has_activity(&self) -> bool {
        self.impressions != 0 || self.clicks != 0 || self.spend != 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    Single,
    MethodologyComparison(AttributionMethodology),
    GoalEventComparison(GoalEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionQuery {
    pub goal_event: GoalEvent,
    #[serde(default)]
    pub goal_event_compare: Option<GoalEvent>,
    #[serde(default)]
    pub linked_events: Vec<GoalEvent>,
    #[serde(default)]
    pub methodology: AttributionMethodology,
    #[serde(default)]
    pub methodology_compare: Option<AttributionMethodology>,
    #[serde(default)]
    pub attribution_key: AttributionDimension,
    #[serde(default)]
    pub key_filters: Vec<KeyValueFilter>,
    #[serde(default)]
    pub custom_dimensions: Vec<String>,
    pub lookback_days: u32,
    #[serde(default)]
    pub query_type: QueryType,
    pub from: i64,
    pub to: i64,
    /// IANA name. `None` means UTC.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl AttributionQuery {
    pub fn new(goal_event: GoalEvent, from: i64, to: i64, lookback_days: u32) -> Self {
        Self {
            goal_event,
            goal_event_compare: None,
            linked_events: Vec::new(),
            methodology: AttributionMethodology::default(),
            methodology_compare: None,
            attribution_key: AttributionDimension::default(),
            key_filters: Vec::new(),
            custom_dimensions: Vec::new(),
            lookback_days,
            query_type: QueryType::default(),
            from,
            to,
            timezone: None,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.from > self.to {
            return Err(CoreError::InvalidQuery(format!(
                "from ({}) is after to ({})",
                self.from, self.to
            )));
        }
        if self.goal_event.name.trim().is_empty() {
            return Err(CoreError::InvalidQuery("goal event name is empty".to_string()));
        }
        if let Some(compare) = &self.goal_event_compare {
            if compare.name.trim().is_empty() {
                return Err(CoreError::InvalidQuery(
                    "comparison goal event name is empty".to_string(),
                ));
            }
        }
        if self.linked_events.iter().any(|e| e.name.trim().is_empty()) {
            return Err(CoreError::InvalidQuery("linked event name is empty".to_string()));
        }
        self.mode()?;
        self.tz()?;
        Ok(())
    }

    /// Methodology and goal-event comparison cannot be combined.
    pub fn mode(&self) -> Result<QueryMode, CoreError> {
        match (&self.methodology_compare, &self.goal_event_compare) {
            (Some(_), Some(_)) => Err(CoreError::InvalidQuery(
                "methodology comparison and goal event comparison are mutually exclusive"
                    .to_string(),
            )),
            (Some(methodology), None) => Ok(QueryMode::MethodologyComparison(*methodology)),
            (None, Some(goal)) => Ok(QueryMode::GoalEventComparison(goal.clone())),
            (None, None) => Ok(QueryMode::Single),
        }
    }

    pub fn lookback(&self, cap_days: u32) -> LookbackPeriod {
        LookbackPeriod::from_days(self.lookback_days.min(cap_days))
    }

    pub fn campaign_window(&self) -> TimeWindow {
        TimeWindow::new(self.from, self.to)
    }

    pub fn conversion_window(&self, lookback: LookbackPeriod) -> TimeWindow {
        match self.query_type {
            QueryType::ConversionBased => TimeWindow::new(self.from, self.to),
            QueryType::EngagementBased => TimeWindow::new(self.from, self.to + lookback.secs()),
        }
    }

    /// Touchpoints are read from one lookback period before the query window.
    pub fn session_window(&self, lookback: LookbackPeriod) -> TimeWindow {
        let conversion = self.conversion_window(lookback);
        TimeWindow::new(self.from - lookback.secs(), conversion.to)
    }

    pub fn tz(&self) -> Result<Tz, CoreError> {
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => Ok(Tz::UTC),
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| CoreError::InvalidQuery(format!("unknown timezone: {name}"))),
        }
    }

    /// Project-local calendar dates covered by the query window.
    pub fn local_dates(&self) -> Result<(NaiveDate, NaiveDate), CoreError> {
        let tz = self.tz()?;
        let to_date = |ts: i64| {
            DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.with_timezone(&tz).date_naive())
                .ok_or_else(|| CoreError::InvalidQuery(format!("timestamp out of range: {ts}")))
        };
        Ok((to_date(self.from)?, to_date(self.to)?))
    }

    /// Every event name the pipeline needs an id for.
    pub fn event_names(&self) -> Vec<String> {
        let mut names = vec![self.goal_event.name.clone()];
        if let Some(compare) = &self.goal_event_compare {
            names.push(compare.name.clone());
        }
        names.extend(self.linked_events.iter().map(|e| e.name.clone()));
        names.push(SESSION_EVENT_NAME.to_string());
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> AttributionQuery {
        AttributionQuery::new(GoalEvent::named("signup"), 1_000, 2_000, 2)
    }

    #[test]
    fn blank_and_sentinel_values_are_no_attribution() {
        assert_eq!(AttributionKey::from_value(None), AttributionKey::NoAttribution);
        assert_eq!(AttributionKey::from_value(Some("  ")), AttributionKey::NoAttribution);
        assert_eq!(AttributionKey::from_value(Some("$none")), AttributionKey::NoAttribution);
        assert_eq!(
            AttributionKey::from_value(Some("spring_sale")),
            AttributionKey::Key("spring_sale".to_string())
        );
        assert_eq!(AttributionKey::NoAttribution.label(), "$none");
    }

    #[test]
    fn methodology_wire_names() {
        let parsed: AttributionMethodology = serde_json::from_str("\"Last_Touch_ND\"").expect("parse");
        assert_eq!(parsed, AttributionMethodology::LastTouchNonDirect);
        let unknown: AttributionMethodology = serde_json::from_str("\"Time_Decay\"").expect("parse");
        assert_eq!(unknown, AttributionMethodology::Unrecognized);
        assert_eq!(AttributionMethodology::UShaped.as_str(), "U_Shaped");
    }

    #[test]
    fn engagement_based_extends_conversion_and_session_windows() {
        let mut q = query();
        let lookback = q.lookback(LOOKBACK_CAP_DAYS);
        assert_eq!(q.conversion_window(lookback), TimeWindow::new(1_000, 2_000));
        assert_eq!(
            q.session_window(lookback),
            TimeWindow::new(1_000 - 2 * SECS_IN_A_DAY, 2_000)
        );

        q.query_type = QueryType::EngagementBased;
        assert_eq!(
            q.conversion_window(lookback),
            TimeWindow::new(1_000, 2_000 + 2 * SECS_IN_A_DAY)
        );
        assert_eq!(q.session_window(lookback).to, 2_000 + 2 * SECS_IN_A_DAY);
        assert_eq!(q.campaign_window(), TimeWindow::new(1_000, 2_000));
    }

    #[test]
    fn lookback_is_clamped_to_cap() {
        let mut q = query();
        q.lookback_days = 1_000;
        assert_eq!(q.lookback(370).secs(), 370 * SECS_IN_A_DAY);
    }

    #[test]
    fn both_comparison_modes_is_rejected() {
        let mut q = query();
        q.methodology_compare = Some(AttributionMethodology::LastTouch);
        q.goal_event_compare = Some(GoalEvent::named("purchase"));
        let err = q.validate().expect_err("must reject");
        assert!(matches!(err, CoreError::InvalidQuery(_)));
    }

    #[test]
    fn inverted_time_range_is_rejected() {
        let mut q = query();
        q.from = 3_000;
        assert!(q.validate().is_err());
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut q = query();
        q.timezone = Some("Mars/Olympus".to_string());
        assert!(q.validate().is_err());
        q.timezone = Some("Asia/Kolkata".to_string());
        assert!(q.validate().is_ok());
    }

    #[test]
    fn local_dates_follow_timezone() {
        let mut q = AttributionQuery::new(GoalEvent::named("signup"), 1_700_000_000, 1_700_000_000, 1);
        // 2023-11-14T22:13:20Z
        assert_eq!(
            q.local_dates().expect("dates").0,
            NaiveDate::from_ymd_opt(2023, 11, 14).expect("date")
        );
        q.timezone = Some("Asia/Tokyo".to_string());
        assert_eq!(
            q.local_dates().expect("dates").0,
            NaiveDate::from_ymd_opt(2023, 11, 15).expect("date")
        );
    }

    #[test]
    fn event_names_include_session_and_dedup() {
        let mut q = query();
        q.linked_events = vec![GoalEvent::named("signup"), GoalEvent::named("purchase")];
        assert_eq!(q.event_names(), vec!["$session", "purchase", "signup"]);
    }
}
