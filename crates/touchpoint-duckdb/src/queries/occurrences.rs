use anyhow::Result;
use tracing::warn;

use touchpoint_core::store::{EventOccurrence, OccurrenceQuery};

use crate::queries::append_in_list;
use crate::queries::filters::append_property_filters;
use crate::DuckDbBackend;

pub async fn find_event_occurrences_inner(
    db: &DuckDbBackend,
    project_id: &str,
    query: &OccurrenceQuery<'_>,
) -> Result<Vec<EventOccurrence>> {
    if query.event_name_ids.is_empty() {
        return Ok(Vec::new());
    }
    if matches!(query.candidate_user_ids, Some(ids) if ids.is_empty()) {
        return Ok(Vec::new());
    }

    let conn = db.conn.lock().await;
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![
        Box::new(project_id.to_string()),
        Box::new(query.window.from),
        Box::new(query.window.to),
    ];
    let mut filter_sql = String::new();
    let mut param_idx = 4;
    append_in_list(
        "e.event_name_id",
        query.event_name_ids,
        &mut filter_sql,
        &mut params,
        &mut param_idx,
    );
    if let Some(candidates) = query.candidate_user_ids {
        append_in_list(
            "e.user_id",
            candidates,
            &mut filter_sql,
            &mut params,
            &mut param_idx,
        );
    }
    append_property_filters(query.filters, &mut filter_sql, &mut params, &mut param_idx);

    let sql = format!(
        r#"
        SELECT e.user_id, e.occurred_at
        FROM events e
        WHERE e.project_id = ?1
          AND e.occurred_at >= ?2
          AND e.occurred_at <= ?3
          {filter_sql}
        ORDER BY e.occurred_at ASC, e.id ASC
        "#
    );
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(EventOccurrence {
            raw_user_id: row.get(0)?,
            timestamp: row.get(1)?,
        })
    })?;

    let mut occurrences = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        match row {
            Ok(occurrence) => occurrences.push(occurrence),
            Err(e) => {
                skipped += 1;
                warn!(project_id, error = %e, "Skipping undecodable event row");
            }
        }
    }
    if skipped > 0 {
        warn!(project_id, skipped, "Event occurrence rows skipped");
    }
    Ok(occurrences)
}
