use std::collections::HashMap;

use anyhow::Result;

use crate::queries::placeholders;
use crate::DuckDbBackend;

/// Name -> every id registered under it. Names with no ids are absent.
pub async fn event_name_ids_inner(
    db: &DuckDbBackend,
    project_id: &str,
    names: &[String],
) -> Result<HashMap<String, Vec<String>>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }

    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT name, id FROM event_names WHERE project_id = ?1 AND name IN ({}) ORDER BY name, id",
        placeholders(2, names.len())
    );
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![Box::new(project_id.to_string())];
    for name in names {
        params.push(Box::new(name.clone()));
    }
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut ids: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (name, id) = row?;
        ids.entry(name).or_default().push(id);
    }
    Ok(ids)
}
