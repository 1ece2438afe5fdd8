use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregate::{AttributionAggregate, AttributionData};
use crate::attribution::AttributionQuery;
use crate::filter::{key_passes, KeyValueFilter};

pub const GRAND_TOTAL_LABEL: &str = "Grand Total";
const USERS_SUFFIX: &str = " - Users";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Empty when no ad account is configured for the project.
    pub currency: String,
    pub methodology: String,
    pub methodology_compare: Option<String>,
    pub query_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub meta: ResultMeta,
}

impl QueryResult {
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Row whose first cell is `label`.
    pub fn row(&self, label: &str) -> Option<&[Cell]> {
        self.rows
            .iter()
            .find(|row| row.first().and_then(Cell::as_text) == Some(label))
            .map(Vec::as_slice)
    }

    pub fn grand_total(&self) -> Option<&[Cell]> {
        self.rows
            .last()
            .filter(|row| row.first().and_then(Cell::as_text) == Some(GRAND_TOTAL_LABEL))
            .map(Vec::as_slice)
    }

    pub fn value(&self, label: &str, header: &str) -> Option<f64> {
        let column = self.column(header)?;
        self.row(label)?.get(column)?.as_f64()
    }
}

/// Column layout of a report. Text columns come first.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub key_header: String,
    pub custom_dimensions: Vec<String>,
    pub goal_event: String,
    pub comparing: bool,
    pub linked_events: Vec<String>,
}

impl ReportLayout {
    pub fn for_query(query: &AttributionQuery) -> Self {
        Self {
            key_header: query.attribution_key.header().to_string(),
            custom_dimensions: query.custom_dimensions.clone(),
            goal_event: query.goal_event.name.clone(),
            comparing: query.methodology_compare.is_some() || query.goal_event_compare.is_some(),
            linked_events: query.linked_events.iter().map(|e| e.name.clone()).collect(),
        }
    }

    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec![self.key_header.clone(), "ChannelName".to_string()];
        headers.extend(self.custom_dimensions.iter().cloned());
        headers.extend(
            [
                "Impressions",
                "Clicks",
                "Spend",
                "CTR(%)",
                "Average CPC",
                "CPM",
                "ClickConversionRate(%)",
                "Website Visitors",
            ]
            .iter()
            .map(|h| h.to_string()),
        );
        headers.push(format!("{}{USERS_SUFFIX}", self.goal_event));
        headers.push("Cost Per Conversion".to_string());
        if self.comparing {
            headers.push(format!("Compare{USERS_SUFFIX}"));
            headers.push("Compare Cost Per Conversion".to_string());
        }
        for event in &self.linked_events {
            headers.push(format!("{event}{USERS_SUFFIX}"));
            headers.push(format!("{event} - CPC"));
        }
        headers
    }

    fn text_columns(&self) -> usize {
        2 + self.custom_dimensions.len()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `scale * numerator / denominator`, or zero when the denominator is zero.
fn ratio(numerator: f64, denominator: f64, scale: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        round2(scale * numerator / denominator)
    }
}

/// Summable counts for one row. Ratios are always derived from these so the
/// grand total can recompute them instead of summing percentages.
#[derive(Debug, Clone, Default)]
struct RowMetrics {
    impressions: i64,
    clicks: i64,
    spend: f64,
    website_visitors: u64,
    conversions: u64,
    compare_conversions: u64,
    linked: Vec<u64>,
}

impl RowMetrics {
    fn zeroed(layout: &ReportLayout) -> Self {
        Self {
            linked: vec![0; layout.linked_events.len()],
            ..Self::default()
        }
    }

    fn from_data(data: &AttributionData, layout: &ReportLayout) -> Self {
        Self {
            impressions: data.performance.impressions,
            clicks: data.performance.clicks,
            spend: data.performance.spend,
            website_visitors: data.website_visitors,
            conversions: data.conversion_count,
            compare_conversions: data.compare_conversion_count,
            linked: layout
                .linked_events
                .iter()
                .map(|event| data.linked_event_counts.get(event).copied().unwrap_or(0))
                .collect(),
        }
    }

    fn accumulate(&mut self, other: &RowMetrics) {
        self.impressions += other.impressions;
        self.clicks += other.clicks;
        self.spend += other.spend;
        self.website_visitors += other.website_visitors;
        self.conversions += other.conversions;
        self.compare_conversions += other.compare_conversions;
        for (total, count) in self.linked.iter_mut().zip(&other.linked) {
            *total += count;
        }
    }

    fn cells(&self, comparing: bool) -> Vec<Cell> {
        let impressions = self.impressions as f64;
        let clicks = self.clicks as f64;
        let conversions = self.conversions as f64;
        let mut cells = vec![
            Cell::Int(self.impressions),
            Cell::Int(self.clicks),
            Cell::Float(round2(self.spend)),
            Cell::Float(ratio(clicks, impressions, 100.0)),
            Cell::Float(ratio(self.spend, clicks, 1.0)),
            Cell::Float(ratio(self.spend, impressions, 1000.0)),
            Cell::Float(ratio(conversions, clicks, 100.0)),
            Cell::Int(self.website_visitors as i64),
            Cell::Int(self.conversions as i64),
            Cell::Float(ratio(self.spend, conversions, 1.0)),
        ];
        if comparing {
            cells.push(Cell::Int(self.compare_conversions as i64));
            cells.push(Cell::Float(ratio(self.spend, self.compare_conversions as f64, 1.0)));
        }
        for count in &self.linked {
            cells.push(Cell::Int(*count as i64));
            cells.push(Cell::Float(ratio(self.spend, *count as f64, 1.0)));
        }
        cells
    }
}

/// Builds the tabular report: filtered rows sorted by conversions, then a
/// trailing grand-total row.
pub fn format_report(
    aggregate: AttributionAggregate,
    layout: &ReportLayout,
    key_filters: &[KeyValueFilter],
    meta: ResultMeta,
) -> QueryResult {
    let headers = layout.headers();
    let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(aggregate.len() + 1);
    let mut totals = RowMetrics::zeroed(layout);

    for (key, data) in aggregate.into_sorted() {
        if !key_passes(key.label(), key_filters) {
            continue;
        }
        let metrics = RowMetrics::from_data(&data, layout);
        totals.accumulate(&metrics);

        let mut row = vec![
            Cell::Text(key.label().to_string()),
            Cell::Text(data.performance.channel.clone().unwrap_or_default()),
        ];
        for dimension in &layout.custom_dimensions {
            let value = data
                .performance
                .custom_dimensions
                .get(dimension)
                .cloned()
                .unwrap_or_default();
            row.push(Cell::Text(value));
        }
        row.extend(metrics.cells(layout.comparing));
        rows.push(row);
    }

    sort_by_conversions(&headers, &mut rows);

    let mut total_row = vec![Cell::Text(GRAND_TOTAL_LABEL.to_string()); layout.text_columns()];
    total_row.extend(totals.cells(layout.comparing));
    rows.push(total_row);

    QueryResult { headers, rows, meta }
}

/// Stable sort, descending, on the first `" - Users"` column. Rows that are
/// too short or hold a non-numeric value there keep their position.
pub fn sort_by_conversions(headers: &[String], rows: &mut [Vec<Cell>]) {
    let Some(column) = headers.iter().position(|h| h.ends_with(USERS_SUFFIX)) else {
        warn!("Report has no conversion column, rows left unsorted");
        return;
    };
    let value = |row: &Vec<Cell>| row.get(column).and_then(Cell::as_f64);

    let positions: Vec<usize> = (0..rows.len()).filter(|&i| value(&rows[i]).is_some()).collect();
    let malformed = rows.len() - positions.len();
    if malformed > 0 {
        warn!(malformed, column, "Report rows without a numeric conversion value left in place");
    }

    let mut sortable: Vec<Vec<Cell>> = positions.iter().map(|&i| rows[i].clone()).collect();
    sortable.sort_by(|a, b| {
        value(b)
            .unwrap_or(0.0)
            .partial_cmp(&value(a).unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });
    for (position, row) in positions.into_iter().zip(sortable) {
        rows[position] = row;
    }
}
