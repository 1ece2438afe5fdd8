use anyhow::Result;
use chrono::NaiveDate;

use crate::DuckDbBackend;

/// First configured account id, or `None` when the project has no ad
/// channel set up.
pub async fn channel_account_inner(db: &DuckDbBackend, project_id: &str) -> Result<Option<String>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare("SELECT account_ids FROM project_settings WHERE project_id = ?1")?;
    let rows = stmt.query_map(duckdb::params![project_id], |row| row.get::<_, String>(0))?;

    for row in rows {
        let account_ids = row?;
        if let Some(first) = account_ids
            .split(',')
            .map(str::trim)
            .find(|id| !id.is_empty())
        {
            return Ok(Some(first.to_string()));
        }
    }
    Ok(None)
}

/// Most recent currency recorded for the account inside `[from, to]`.
pub async fn fetch_currency_inner(
    db: &DuckDbBackend,
    project_id: &str,
    account_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Option<String>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        r#"
        SELECT currency
        FROM channel_currency
        WHERE project_id = ?1
          AND account_id = ?2
          AND date >= CAST(?3 AS DATE)
          AND date <= CAST(?4 AS DATE)
        ORDER BY date DESC
        LIMIT 1
        "#,
    )?;
    let mut rows = stmt.query_map(
        duckdb::params![
            project_id,
            account_id,
            from.format("%Y-%m-%d").to_string(),
            to.format("%Y-%m-%d").to_string()
        ],
        |row| row.get::<_, String>(0),
    )?;

    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}
