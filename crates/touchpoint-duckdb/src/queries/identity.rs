use std::collections::HashMap;

use anyhow::Result;

use crate::queries::append_in_list;
use crate::DuckDbBackend;

/// Raw user id -> `COALESCE(customer_user_id, id)`. Callers batch the ids.
pub async fn resolve_coalesced_identity_inner(
    db: &DuckDbBackend,
    project_id: &str,
    raw_user_ids: &[String],
) -> Result<HashMap<String, String>> {
    if raw_user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let conn = db.conn.lock().await;
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![Box::new(project_id.to_string())];
    let mut filter_sql = String::new();
    let mut param_idx = 2;
    append_in_list("u.id", raw_user_ids, &mut filter_sql, &mut params, &mut param_idx);

    let sql = format!(
        r#"
        SELECT u.id, COALESCE(NULLIF(u.customer_user_id, ''), u.id)
        FROM users u
        WHERE u.project_id = ?1
          {filter_sql}
        "#
    );
    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut identities = HashMap::with_capacity(raw_user_ids.len());
    for row in rows {
        let (raw_user_id, coal_user_id) = row?;
        identities.insert(raw_user_id, coal_user_id);
    }
    Ok(identities)
}
