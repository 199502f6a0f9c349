use rust_decimal::Decimal;

use super::{RoyaltyRule, RuleType};
use crate::calculation::minimum::MinimumGuarantee;

/// Malformed rule definitions, rejected before any calculation uses them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("tier table is empty")]
    EmptyTierTable,
    #[error("tier {index} has a negative lower bound")]
    NegativeTierBound { index: usize },
    #[error("tier {index} has max below min")]
    InvertedTier { index: usize },
    #[error("tier {index} is open ended but is not the last tier")]
    OpenTierNotLast { index: usize },
    #[error("tier {index} is not sorted ascending")]
    UnsortedTiers { index: usize },
    #[error("tier {index} overlaps the previous tier")]
    OverlappingTiers { index: usize },
    #[error("rule '{rule}' ({rule_type}) requires {field}")]
    MissingField {
        rule: String,
        rule_type: &'static str,
        field: &'static str,
    },
    #[error("rule '{rule}' has a negative {field}")]
    NegativeValue { rule: String, field: &'static str },
    #[error("rule '{rule}' lists container size '{size}' more than once")]
    DuplicateContainerSize { rule: String, size: String },
    #[error("rule '{rule}' has a range criterion with min above max")]
    InvertedRange { rule: String },
}

/// Check the fields each rule type depends on.
pub fn validate_rule(rule: &RoyaltyRule) -> Result<(), ValidationError> {
    let missing = |field: &'static str| ValidationError::MissingField {
        rule: rule.rule_name.clone(),
        rule_type: rule.rule_type.label(),
        field,
    };

    for criterion in &rule.criteria {
        if let super::MatchCriteria::Range {
            min: Some(min),
            max: Some(max),
        } = &criterion.criteria
        {
            if min > max {
                return Err(ValidationError::InvertedRange {
                    rule: rule.rule_name.clone(),
                });
            }
        }
    }

    match rule.rule_type {
        RuleType::Percentage | RuleType::Bonus | RuleType::UsageBased | RuleType::Deduction => {
            let rate = rule.base_rate.ok_or_else(|| missing("base_rate"))?;
            non_negative(rule, "base_rate", rate)?;
        }
        RuleType::Tiered => {
            if rule.volume_tiers.is_none() {
                return Err(missing("volume_tiers"));
            }
        }
        RuleType::ContainerSizeTiered => {
            if rule.container_size_rates.is_empty() {
                return Err(missing("container_size_rates"));
            }
            let mut seen = std::collections::BTreeSet::new();
            for schedule in &rule.container_size_rates {
                let key = schedule.container_size.trim().to_ascii_lowercase();
                if !seen.insert(key) {
                    return Err(ValidationError::DuplicateContainerSize {
                        rule: rule.rule_name.clone(),
                        size: schedule.container_size.clone(),
                    });
                }
                non_negative(rule, "base_rate", schedule.base_rate)?;
                non_negative(rule, "discounted_rate", schedule.discounted_rate)?;
                non_negative(rule, "volume_threshold", schedule.volume_threshold)?;
            }
        }
        RuleType::Formula => {
            if rule.formula_definition.is_none() {
                return Err(missing("formula_definition"));
            }
        }
        RuleType::FixedFee | RuleType::Cap => {
            let amount = rule.amount.ok_or_else(|| missing("amount"))?;
            non_negative(rule, "amount", amount)?;
        }
        RuleType::MinimumGuarantee => {
            let schedule = rule
                .minimum_guarantee
                .as_ref()
                .ok_or_else(|| missing("minimum_guarantee"))?;
            for amount in schedule_amounts(schedule) {
                non_negative(rule, "minimum_guarantee", amount)?;
            }
        }
    }

    Ok(())
}

fn schedule_amounts(schedule: &MinimumGuarantee) -> Vec<Decimal> {
    match schedule {
        MinimumGuarantee::Annual { amount } => vec![*amount],
        MinimumGuarantee::Quarterly {
            quarters,
            annual_true_up,
        } => quarters.iter().copied().chain(*annual_true_up).collect(),
    }
}

fn non_negative(
    rule: &RoyaltyRule,
    field: &'static str,
    value: Decimal,
) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::NegativeValue {
            rule: rule.rule_name.clone(),
            field,
        });
    }
    Ok(())
}
