use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::NaiveDate;

use touchpoint_core::attribution::{AttributionDimension, PerformanceData};

use crate::queries::json_path;
use crate::DuckDbBackend;

/// Ad metrics summed per key over `[from, to]` (project-local dates).
pub async fn fetch_performance_data_inner(
    db: &DuckDbBackend,
    project_id: &str,
    dimension: AttributionDimension,
    custom_dimensions: &[String],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<HashMap<String, PerformanceData>> {
    let conn = db.conn.lock().await;
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![
        Box::new(project_id.to_string()),
        Box::new(dimension.as_str().to_string()),
        Box::new(from.format("%Y-%m-%d").to_string()),
        Box::new(to.format("%Y-%m-%d").to_string()),
    ];
    let mut custom_sql = String::new();
    for (offset, name) in custom_dimensions.iter().enumerate() {
        custom_sql.push_str(&format!(
            ",\n            MIN(json_extract_string(p.dimensions, ?{}))",
            5 + offset
        ));
        params.push(Box::new(json_path(name)));
    }

    let sql = format!(
        r#"
        SELECT
            p.key_value,
            MIN(p.channel),
            CAST(COALESCE(SUM(p.impressions), 0) AS BIGINT),
            CAST(COALESCE(SUM(p.clicks), 0) AS BIGINT),
            COALESCE(SUM(p.spend), 0.0){custom_sql}
        FROM marketing_performance p
        WHERE p.project_id = ?1
          AND p.dimension = ?2
          AND p.date >= CAST(?3 AS DATE)
          AND p.date <= CAST(?4 AS DATE)
        GROUP BY p.key_value
        "#
    );
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let mut dimensions = BTreeMap::new();
        for (offset, name) in custom_dimensions.iter().enumerate() {
            let value: Option<String> = row.get(5 + offset)?;
            if let Some(value) = value {
                dimensions.insert(name.clone(), value);
            }
        }
        Ok((
            row.get::<_, String>(0)?,
            PerformanceData {
                channel: row.get(1)?,
                impressions: row.get(2)?,
                clicks: row.get(3)?,
                spend: row.get(4)?,
                custom_dimensions: dimensions,
            },
        ))
    })?;

    let mut performance = HashMap::new();
    for row in rows {
        let (key, data) = row?;
        performance.insert(key, data);
    }
    Ok(performance)
}
