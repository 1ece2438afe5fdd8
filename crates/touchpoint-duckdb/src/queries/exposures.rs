use anyhow::Result;
use tracing::warn;

use touchpoint_core::attribution::TimeWindow;
use touchpoint_core::session::TouchpointExposure;

use crate::queries::{append_in_list, json_path};
use crate::DuckDbBackend;

/// Every `$session` row in `window` with the value of `key_property`.
/// A missing property comes back as `None`.
pub async fn find_touchpoint_exposures_inner(
    db: &DuckDbBackend,
    project_id: &str,
    session_event_name_ids: &[String],
    key_property: &str,
    window: TimeWindow,
) -> Result<Vec<TouchpointExposure>> {
    if session_event_name_ids.is_empty() {
        return Ok(Vec::new());
    }

    let conn = db.conn.lock().await;
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![
        Box::new(project_id.to_string()),
        Box::new(json_path(key_property)),
        Box::new(window.from),
        Box::new(window.to),
    ];
    let mut filter_sql = String::new();
    let mut param_idx = 5;
    append_in_list(
        "e.event_name_id",
        session_event_name_ids,
        &mut filter_sql,
        &mut params,
        &mut param_idx,
    );

    let sql = format!(
        r#"
        SELECT
            e.user_id,
            json_extract_string(e.properties, ?2) AS key_value,
            e.occurred_at
        FROM events e
        WHERE e.project_id = ?1
          AND e.occurred_at >= ?3
          AND e.occurred_at <= ?4
          {filter_sql}
        ORDER BY e.occurred_at ASC, e.id ASC
        "#
    );
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(TouchpointExposure {
            raw_user_id: row.get(0)?,
            key: row.get(1)?,
            timestamp: row.get(2)?,
        })
    })?;

    let mut exposures = Vec::new();
    for row in rows {
        match row {
            Ok(exposure) => exposures.push(exposure),
            Err(e) => warn!(project_id, error = %e, "Skipping undecodable session row"),
        }
    }
    Ok(exposures)
}
