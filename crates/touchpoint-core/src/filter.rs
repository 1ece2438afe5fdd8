use serde::{Deserialize, Serialize};

use crate::attribution::NONE_KEY_LABEL;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterEntity {
    #[default]
    Event,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValueType {
    #[default]
    Categorical,
    Numerical,
}

/// A property filter exactly as it arrives on the query.
///
/// `operator` and `logical_op` stay as raw strings so an unsupported value
/// is reported as a filter error instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    #[serde(default)]
    pub entity: FilterEntity,
    pub property: String,
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub value_type: PropertyValueType,
    #[serde(default)]
    pub logical_op: Option<String>,
}

impl PropertyFilter {
    pub fn event(property: &str, operator: &str, value: &str) -> Self {
        Self {
            entity: FilterEntity::Event,
            property: property.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
            value_type: PropertyValueType::Categorical,
            logical_op: None,
        }
    }

    pub fn user(property: &str, operator: &str, value: &str) -> Self {
        Self {
            entity: FilterEntity::User,
            ..Self::event(property, operator, value)
        }
    }

    pub fn with_logical_op(mut self, op: &str) -> Self {
        self.logical_op = Some(op.to_string());
        self
    }

    pub fn numerical(mut self) -> Self {
        self.value_type = PropertyValueType::Numerical;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equals,
    NotEqual,
    Contains,
    NotContains,
    GreaterThan,
    LesserThan,
}

impl FilterOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "equals" => Some(FilterOperator::Equals),
            "notEqual" => Some(FilterOperator::NotEqual),
            "contains" => Some(FilterOperator::Contains),
            "notContains" => Some(FilterOperator::NotContains),
            "greaterThan" => Some(FilterOperator::GreaterThan),
            "lesserThan" => Some(FilterOperator::LesserThan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicalOp {
    #[default]
    And,
    Or,
}

impl LogicalOp {
    /// Missing or blank means AND; anything other than AND/OR is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self, CoreError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(LogicalOp::And),
            Some(op) if op.eq_ignore_ascii_case("and") => Ok(LogicalOp::And),
            Some(op) if op.eq_ignore_ascii_case("or") => Ok(LogicalOp::Or),
            Some(op) => Err(CoreError::InvalidFilter(format!("unknown logical operator: {op}"))),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Property is missing or empty.
    None,
    Text(String),
    Number(f64),
}

/// A validated property filter, ready to be turned into a store predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPredicate {
    pub property: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
    pub logical_op: LogicalOp,
}

impl PropertyPredicate {
    pub fn compile(filter: &PropertyFilter) -> Result<Self, CoreError> {
        if filter.property.trim().is_empty() {
            return Err(CoreError::InvalidFilter("property name is empty".to_string()));
        }
        let operator = FilterOperator::parse(&filter.operator).ok_or_else(|| {
            CoreError::InvalidFilter(format!(
                "unknown operator {} on property {}",
                filter.operator, filter.property
            ))
        })?;
        let logical_op = LogicalOp::parse(filter.logical_op.as_deref())?;

        let value = if filter.value == NONE_KEY_LABEL {
            if !matches!(operator, FilterOperator::Equals | FilterOperator::NotEqual) {
                return Err(CoreError::InvalidFilter(format!(
                    "operator {} is not supported with {NONE_KEY_LABEL} on property {}",
                    filter.operator, filter.property
                )));
            }
            FilterValue::None
        } else {
            match filter.value_type {
                PropertyValueType::Numerical => {
                    let number = filter.value.trim().parse::<f64>().map_err(|_| {
                        CoreError::InvalidFilter(format!(
                            "value {} on property {} is not numerical",
                            filter.value, filter.property
                        ))
                    })?;
                    FilterValue::Number(number)
                }
                PropertyValueType::Categorical => {
                    if matches!(operator, FilterOperator::GreaterThan | FilterOperator::LesserThan)
                    {
                        return Err(CoreError::InvalidFilter(format!(
                            "operator {} requires a numerical value on property {}",
                            filter.operator, filter.property
                        )));
                    }
                    FilterValue::Text(filter.value.clone())
                }
            }
        };

        Ok(Self {
            property: filter.property.clone(),
            operator,
            value,
            logical_op,
        })
    }
}

/// Event-level and user-level predicates. The two groups are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateGroups {
    pub event: Vec<PropertyPredicate>,
    pub user: Vec<PropertyPredicate>,
}

impl PredicateGroups {
    pub fn compile(filters: &[PropertyFilter]) -> Result<Self, CoreError> {
        let mut groups = PredicateGroups::default();
        for filter in filters {
            let predicate = PropertyPredicate::compile(filter)?;
            match filter.entity {
                FilterEntity::Event => groups.event.push(predicate),
                FilterEntity::User => groups.user.push(predicate),
            }
        }
        Ok(groups)
    }

    pub fn is_empty(&self) -> bool {
        self.event.is_empty() && self.user.is_empty()
    }
}

/// Filter on the attribution key label, applied when the report is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValueFilter {
    pub operator: String,
    pub value: String,
    #[serde(default)]
    pub logical_op: Option<String>,
}

impl KeyValueFilter {
    pub fn new(operator: &str, value: &str) -> Self {
        Self {
            operator: operator.to_string(),
            value: value.to_string(),
            logical_op: None,
        }
    }

    fn is_or(&self) -> bool {
        self.logical_op
            .as_deref()
            .map(|op| op.trim().eq_ignore_ascii_case("or"))
            .unwrap_or(false)
    }

    /// Unknown operators never match.
    fn matches(&self, label: &str) -> bool {
        match self.operator.as_str() {
            "equals" => label == self.value,
            "notEqual" => label != self.value,
            "contains" => label.contains(&self.value),
            "notContains" => !label.contains(&self.value),
            _ => false,
        }
    }
}

/// A key survives when every AND filter passes or any OR filter passes.
pub fn key_passes(label: &str, filters: &[KeyValueFilter]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let (ors, ands): (Vec<&KeyValueFilter>, Vec<&KeyValueFilter>) =
        filters.iter().partition(|f| f.is_or());
    let and_ok = !ands.is_empty() && ands.iter().all(|f| f.matches(label));
    let or_ok = ors.iter().any(|f| f.matches(label));
    and_ok || or_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_splits_event_and_user_filters() {
        let groups = PredicateGroups::compile(&[
            PropertyFilter::event("plan", "equals", "pro"),
            PropertyFilter::user("country", "notEqual", "US").with_logical_op("OR"),
        ])
        .expect("compile");
        assert_eq!(groups.event.len(), 1);
        assert_eq!(groups.user.len(), 1);
        assert_eq!(groups.user[0].logical_op, LogicalOp::Or);
        assert_eq!(groups.event[0].logical_op, LogicalOp::And);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = PredicateGroups::compile(&[PropertyFilter::event("plan", "startsWith", "p")])
            .expect_err("must reject");
        assert!(matches!(err, CoreError::InvalidFilter(_)));
    }

    #[test]
    fn unknown_logical_op_is_rejected() {
        let filter = PropertyFilter::event("plan", "equals", "pro").with_logical_op("XOR");
        assert!(PropertyPredicate::compile(&filter).is_err());
    }

    #[test]
    fn none_value_only_supports_equality() {
        let eq = PropertyPredicate::compile(&PropertyFilter::event("plan", "equals", "$none"))
            .expect("compile");
        assert_eq!(eq.value, FilterValue::None);
        assert!(
            PropertyPredicate::compile(&PropertyFilter::event("plan", "contains", "$none")).is_err()
        );
    }

    #[test]
    fn numerical_values_must_parse() {
        let ok = PropertyPredicate::compile(
            &PropertyFilter::event("amount", "greaterThan", "10.5").numerical(),
        )
        .expect("compile");
        assert_eq!(ok.value, FilterValue::Number(10.5));
        assert!(PropertyPredicate::compile(
            &PropertyFilter::event("amount", "equals", "ten").numerical()
        )
        .is_err());
        assert!(
            PropertyPredicate::compile(&PropertyFilter::event("amount", "greaterThan", "10"))
                .is_err()
        );
    }

    #[test]
    fn key_filters_and_or_semantics() {
        let ands = vec![
            KeyValueFilter::new("contains", "sale"),
            KeyValueFilter::new("notEqual", "winter_sale"),
        ];
        assert!(key_passes("spring_sale", &ands));
        assert!(!key_passes("winter_sale", &ands));
        assert!(!key_passes("brand", &ands));

        let mut with_or = ands.clone();
        let mut brand = KeyValueFilter::new("equals", "brand");
        brand.logical_op = Some("OR".to_string());
        with_or.push(brand);
        assert!(key_passes("brand", &with_or));
        assert!(!key_passes("generic", &with_or));
    }

    #[test]
    fn unknown_key_operator_never_matches() {
        assert!(!key_passes("spring_sale", &[KeyValueFilter::new("regex", ".*")]));
        assert!(key_passes("anything", &[]));
    }
}
