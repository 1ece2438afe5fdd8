//! SQL for property filters on goal and linked events.
//!
//! Predicates are grouped in order: an `AND` predicate opens a new group and
//! an `OR` predicate joins the current one. Members of a group are ORed and
//! the groups are ANDed, so `a, OR b, AND c` reads `(a OR b) AND (c)`.
//! Event-level and user-level groups are always ANDed.

use touchpoint_core::filter::{
    FilterOperator, FilterValue, LogicalOp, PredicateGroups, PropertyPredicate,
};

use super::json_path;

fn bind(
    value: Box<dyn duckdb::types::ToSql>,
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) -> String {
    let placeholder = format!("?{}", *param_idx);
    params.push(value);
    *param_idx += 1;
    placeholder
}

fn extract(
    column: &str,
    property: &str,
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) -> String {
    let path = bind(Box::new(json_path(property)), params, param_idx);
    format!("json_extract_string({column}, {path})")
}

fn predicate_sql(
    column: &str,
    predicate: &PropertyPredicate,
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) -> String {
    let property = predicate.property.as_str();
    let first = extract(column, property, params, param_idx);

    match (&predicate.value, predicate.operator) {
        (FilterValue::None, FilterOperator::Equals) => {
            let second = extract(column, property, params, param_idx);
            format!("({first} IS NULL OR {second} = '')")
        }
        (FilterValue::None, _) => {
            let second = extract(column, property, params, param_idx);
            format!("({first} IS NOT NULL AND {second} <> '')")
        }
        (FilterValue::Text(text), FilterOperator::NotEqual) => {
            let second = extract(column, property, params, param_idx);
            let value = bind(Box::new(text.clone()), params, param_idx);
            format!("({first} IS NULL OR {second} <> {value})")
        }
        (FilterValue::Text(text), FilterOperator::NotContains) => {
            let second = extract(column, property, params, param_idx);
            let value = bind(Box::new(format!("%{text}%")), params, param_idx);
            format!("({first} IS NULL OR {second} NOT LIKE {value})")
        }
        (FilterValue::Text(text), FilterOperator::Contains) => {
            let value = bind(Box::new(format!("%{text}%")), params, param_idx);
            format!("{first} LIKE {value}")
        }
        (FilterValue::Text(text), operator) => {
            let op = match operator {
                FilterOperator::GreaterThan => ">",
                FilterOperator::LesserThan => "<",
                _ => "=",
            };
            let value = bind(Box::new(text.clone()), params, param_idx);
            format!("{first} {op} {value}")
        }
        (FilterValue::Number(number), FilterOperator::Contains) => {
            let value = bind(Box::new(format!("%{number}%")), params, param_idx);
            format!("{first} LIKE {value}")
        }
        (FilterValue::Number(number), FilterOperator::NotContains) => {
            let value = bind(Box::new(format!("%{number}%")), params, param_idx);
            format!("{first} NOT LIKE {value}")
        }
        (FilterValue::Number(number), operator) => {
            let op = match operator {
                FilterOperator::NotEqual => "<>",
                FilterOperator::GreaterThan => ">",
                FilterOperator::LesserThan => "<",
                _ => "=",
            };
            let value = bind(Box::new(*number), params, param_idx);
            format!("TRY_CAST({first} AS DOUBLE) {op} {value}")
        }
    }
}

/// `None` when there is nothing to filter on.
pub(crate) fn group_sql(
    column: &str,
    predicates: &[PropertyPredicate],
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) -> Option<String> {
    let mut groups: Vec<Vec<&PropertyPredicate>> = Vec::new();
    for predicate in predicates {
        match groups.last_mut() {
            Some(current) if predicate.logical_op == LogicalOp::Or => current.push(predicate),
            _ => groups.push(vec![predicate]),
        }
    }
    if groups.is_empty() {
        return None;
    }

    let mut clauses = Vec::with_capacity(groups.len());
    for members in &groups {
        let mut parts = Vec::with_capacity(members.len());
        for predicate in members {
            parts.push(predicate_sql(column, predicate, params, param_idx));
        }
        clauses.push(format!("({})", parts.join(" OR ")));
    }
    let sql = clauses.join(" AND ");
    Some(format!("({sql})"))
}

pub(crate) fn append_property_filters(
    groups: &PredicateGroups,
    filter_sql: &mut String,
    params: &mut Vec<Box<dyn duckdb::types::ToSql>>,
    param_idx: &mut usize,
) {
    if let Some(sql) = group_sql("e.properties", &groups.event, params, param_idx) {
        filter_sql.push_str(&format!(" AND {sql}"));
    }
    if let Some(sql) = group_sql("e.user_properties", &groups.user, params, param_idx) {
        filter_sql.push_str(&format!(" AND {sql}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use touchpoint_core::filter::PropertyFilter;

    fn compile(filters: &[PropertyFilter]) -> PredicateGroups {
        PredicateGroups::compile(filters).expect("compile")
    }

    #[test]
    fn or_joins_the_current_group() {
        let groups = compile(&[
            PropertyFilter::event("plan", "equals", "pro"),
            PropertyFilter::event("plan", "equals", "team").with_logical_op("OR"),
        ]);
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1;
        let sql = group_sql("e.properties", &groups.event, &mut params, &mut idx).expect("sql");
        assert_eq!(
            sql,
            "((json_extract_string(e.properties, ?1) = ?2 OR json_extract_string(e.properties, ?3) = ?4))"
        );
        assert_eq!(params.len(), 4);
        assert_eq!(idx, 5);
    }

    #[test]
    fn and_opens_a_new_group_and_groups_are_anded() {
        let groups = compile(&[
            PropertyFilter::event("a", "equals", "1"),
            PropertyFilter::event("b", "equals", "1").with_logical_op("OR"),
            PropertyFilter::event("c", "equals", "1").with_logical_op("AND"),
        ]);
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1;
        let sql = group_sql("e.properties", &groups.event, &mut params, &mut idx).expect("sql");
        assert_eq!(
            sql,
            "((json_extract_string(e.properties, ?1) = ?2 OR json_extract_string(e.properties, ?3) = ?4) \
             AND (json_extract_string(e.properties, ?5) = ?6))"
        );
        assert_eq!(idx, 7);
    }

    #[test]
    fn different_properties_with_or_share_a_group() {
        let groups = compile(&[
            PropertyFilter::event("plan", "equals", "pro"),
            PropertyFilter::event("country", "equals", "DE").with_logical_op("OR"),
        ]);
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1;
        let sql = group_sql("e.properties", &groups.event, &mut params, &mut idx).expect("sql");
        assert!(!sql.contains(" AND "), "{sql}");
        assert!(sql.contains(" OR "), "{sql}");
    }

    #[test]
    fn none_value_checks_missing_or_empty() {
        let groups = compile(&[PropertyFilter::user("email", "equals", "$none")]);
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1;
        let sql = group_sql("e.user_properties", &groups.user, &mut params, &mut idx).expect("sql");
        assert!(sql.contains("IS NULL OR"), "{sql}");
        assert!(sql.contains("= ''"), "{sql}");
    }

    #[test]
    fn event_and_user_groups_are_anded() {
        let groups = compile(&[
            PropertyFilter::event("plan", "contains", "pro"),
            PropertyFilter::user("amount", "greaterThan", "10").numerical(),
        ]);
        let mut filter_sql = String::new();
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 4;
        append_property_filters(&groups, &mut filter_sql, &mut params, &mut idx);
        assert!(filter_sql.starts_with(" AND ((json_extract_string(e.properties, ?4) LIKE ?5))"));
        assert!(filter_sql.contains(" AND ((TRY_CAST(json_extract_string(e.user_properties, ?6) AS DOUBLE) > ?7))"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn no_predicates_no_sql() {
        let mut params: Vec<Box<dyn duckdb::types::ToSql>> = Vec::new();
        let mut idx = 1;
        assert!(group_sql("e.properties", &[], &mut params, &mut idx).is_none());
    }
}
