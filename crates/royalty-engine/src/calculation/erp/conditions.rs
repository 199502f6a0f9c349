use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::calculation::domain::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    StartsWith,
    /// Comma separated list of accepted values.
    In,
    IsEmpty,
    IsNotEmpty,
}

/// Connects a condition to the running result of the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpMappingCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub logic_operator: LogicOperator,
}

impl ErpMappingCondition {
    pub fn holds(&self, actual: &FieldValue) -> bool {
        let expected = self.value.trim();
        match self.operator {
            ConditionOperator::IsEmpty => actual.is_null(),
            ConditionOperator::IsNotEmpty => !actual.is_null(),
            ConditionOperator::Equals => compare(actual, expected) == Some(Ordering::Equal),
            ConditionOperator::NotEquals => compare(actual, expected) != Some(Ordering::Equal),
            ConditionOperator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
            ConditionOperator::GreaterThanOrEqual => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::LessThan => compare(actual, expected) == Some(Ordering::Less),
            ConditionOperator::LessThanOrEqual => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::Contains => actual.as_text().map_or(false, |text| {
                text.to_lowercase().contains(&expected.to_lowercase())
            }),
            ConditionOperator::StartsWith => actual.as_text().map_or(false, |text| {
                text.to_lowercase().starts_with(&expected.to_lowercase())
            }),
            ConditionOperator::In => expected
                .split(',')
                .any(|candidate| compare(actual, candidate.trim()) == Some(Ordering::Equal)),
        }
    }
}

/// Numeric comparison when both sides parse as numbers, otherwise case-insensitive text.
fn compare(actual: &FieldValue, expected: &str) -> Option<Ordering> {
    if actual.is_null() {
        return None;
    }
    let expected_value = FieldValue::Text(expected.to_string());
    if let (Some(left), Some(right)) = (actual.as_decimal(), expected_value.as_decimal()) {
        return Some(left.cmp(&right));
    }
    let left = actual.as_text()?.trim().to_lowercase();
    Some(left.as_str().cmp(expected.to_lowercase().as_str()))
}

/// Fold a condition chain strictly left to right.
///
/// Each condition's `logic_operator` joins it to the accumulated result of
/// everything before it; the first condition's operator is ignored and there
/// is no AND-over-OR precedence. An empty chain passes.
pub fn evaluate_chain<F>(conditions: &[ErpMappingCondition], mut lookup: F) -> bool
where
    F: FnMut(&str) -> FieldValue,
{
    let mut iter = conditions.iter();
    let Some(first) = iter.next() else {
        return true;
    };
    let mut result = first.holds(&lookup(&first.field));
    for condition in iter {
        let holds = condition.holds(&lookup(&condition.field));
        result = match condition.logic_operator {
            LogicOperator::And => result && holds,
            LogicOperator::Or => result || holds,
        };
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn condition(field: &str, operator: ConditionOperator, value: &str, logic: LogicOperator) -> ErpMappingCondition {
        ErpMappingCondition {
            field: field.to_string(),
            operator,
            value: value.to_string(),
            logic_operator: logic,
        }
    }

    fn row() -> BTreeMap<&'static str, FieldValue> {
        BTreeMap::from([
            ("REGION", FieldValue::Text("West".to_string())),
            ("QTY", FieldValue::Number(Decimal::from(40))),
            ("CHANNEL", FieldValue::Text("retail".to_string())),
        ])
    }

    #[test]
    fn folds_left_to_right_without_precedence() {
        let values = row();
        let lookup = |field: &str| values.get(field).cloned().unwrap_or(FieldValue::Null);
        // (false OR true) AND false == false; AND-first grouping would give true.
        let chain = vec![
            condition("REGION", ConditionOperator::Equals, "east", LogicOperator::And),
            condition("QTY", ConditionOperator::GreaterThan, "10", LogicOperator::Or),
            condition("CHANNEL", ConditionOperator::Equals, "wholesale", LogicOperator::And),
        ];
        assert!(!evaluate_chain(&chain, lookup));

        // false AND false OR true == true under a left fold.
        let chain = vec![
            condition("REGION", ConditionOperator::Equals, "east", LogicOperator::And),
            condition("CHANNEL", ConditionOperator::Equals, "wholesale", LogicOperator::And),
            condition("QTY", ConditionOperator::GreaterThanOrEqual, "40", LogicOperator::Or),
        ];
        assert!(evaluate_chain(&chain, lookup));
    }

    #[test]
    fn empty_chain_passes() {
        assert!(evaluate_chain(&[], |_| FieldValue::Null));
    }

    #[test]
    fn numeric_comparison_beats_lexical() {
        let small = FieldValue::Text("9".to_string());
        let check = condition("QTY", ConditionOperator::LessThan, "10", LogicOperator::And);
        assert!(check.holds(&small));
    }

    #[test]
    fn membership_and_emptiness() {
        let check = condition("REGION", ConditionOperator::In, "East, West", LogicOperator::And);
        assert!(check.holds(&FieldValue::Text("west".to_string())));
        let empty = condition("REGION", ConditionOperator::IsEmpty, "", LogicOperator::And);
        assert!(empty.holds(&FieldValue::Null));
        assert!(!check.holds(&FieldValue::Null));
    }
}
