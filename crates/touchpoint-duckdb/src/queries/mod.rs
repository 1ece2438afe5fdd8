pub mod currency;
pub mod event_names;
pub mod exposures;
pub mod filters;
pub mod identity;
pub mod occurrences;
pub mod performance;

/// `?start, ?start+1, ...` for an `IN (...)` list of `count` values.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Appends ` AND {column} IN (...)` binding every value.
pub(crate) fn append_in_list(
    column: &str,
    values: &[String],
    filter_sql: &mut String,
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) {
    filter_sql.push_str(&format!(
        " AND {column} IN ({})",
        placeholders(*param_idx, values.len())
    ));
    for value in values {
        params.push(Box::new(value.clone()));
    }
    *param_idx += values.len();
}

/// JSON path for a top-level property, quoted so names like `$campaign`
/// are taken literally.
pub(crate) fn json_path(property: &str) -> String {
    format!("$.\"{}\"", property.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(4, 3), "?4, ?5, ?6");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn in_list_advances_param_index() {
        let mut sql = String::new();
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 2;
        append_in_list(
            "e.user_id",
            &["a".to_string(), "b".to_string()],
            &mut sql,
            &mut params,
            &mut idx,
        );
        assert_eq!(sql, " AND e.user_id IN (?2, ?3)");
        assert_eq!(params.len(), 2);
        assert_eq!(idx, 4);
    }

    #[test]
    fn json_path_quotes_property() {
        assert_eq!(json_path("$campaign"), "$.\"$campaign\"");
    }
}
