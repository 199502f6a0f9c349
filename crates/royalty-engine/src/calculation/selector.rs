use super::rules::{RoyaltyRule, RuleClass};

/// Rules that apply to one transaction. Period rules are settled when the run closes.
#[derive(Debug, Clone, Default)]
pub struct RuleSelection<'a> {
    pub primary: Option<&'a RoyaltyRule>,
    pub additive: Vec<&'a RoyaltyRule>,
    pub deductions: Vec<&'a RoyaltyRule>,
}

pub struct RuleSelector;

impl RuleSelector {
    /// Sort rules into evaluation order: ascending priority, earliest creation, then id.
    pub fn order<'a>(rules: impl IntoIterator<Item = &'a RoyaltyRule>) -> Vec<&'a RoyaltyRule> {
        let mut ordered: Vec<&RoyaltyRule> =
            rules.into_iter().filter(|rule| rule.is_active).collect();
        ordered.sort_by(|a, b| a.precedence_key().cmp(&b.precedence_key()));
        ordered
    }

    /// Match with a caller supplied predicate, so rules bound to ERP fields
    /// can match on their blueprint. `ordered` must already be in precedence order.
    pub fn select_with<'a, F>(ordered: &[&'a RoyaltyRule], mut matches: F) -> RuleSelection<'a>
    where
        F: FnMut(&RoyaltyRule) -> bool,
    {
        let mut selection = RuleSelection::default();
        for rule in ordered.iter().copied() {
            if !rule.is_active {
                continue;
            }
            let class = rule.class();
            if class == RuleClass::Period
                || (class == RuleClass::FeeDetermining && selection.primary.is_some())
            {
                continue;
            }
            if !matches(rule) {
                continue;
            }
            match class {
                RuleClass::FeeDetermining => selection.primary = Some(rule),
                RuleClass::Additive => selection.additive.push(rule),
                RuleClass::Deduction => selection.deductions.push(rule),
                RuleClass::Period => {}
            }
        }
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::domain::{Dimension, SalesTransaction, TransactionId};
    use crate::calculation::rules::fixtures::rule;
    use crate::calculation::rules::{Criterion, MatchCriteria, RuleType};
    use chrono::{Duration, NaiveDate};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn transaction(category: &str, territory: &str) -> SalesTransaction {
        SalesTransaction {
            id: TransactionId("t-1".to_string()),
            date: NaiveDate::from_ymd_opt(2025, 2, 3).expect("valid date"),
            product: Some("Blue Fescue".to_string()),
            category: Some(category.to_string()),
            territory: Some(territory.to_string()),
            container_size: Some("1-gallon".to_string()),
            vendor: Some("Green Acres".to_string()),
            quantity: Decimal::from(10),
            gross_amount: Decimal::from(100),
            custom_fields: BTreeMap::new(),
        }
    }

    fn select<'a>(transaction: &SalesTransaction, ordered: &[&'a RoyaltyRule]) -> RuleSelection<'a> {
        RuleSelector::select_with(ordered, |rule| rule.matches(transaction))
    }

    fn scoped(id: &str, rule_type: RuleType, priority: i32, categories: &[&str]) -> RoyaltyRule {
        let mut candidate = rule(id, rule_type, priority);
        candidate.criteria = vec![Criterion::new(
            Dimension::ProductCategory,
            MatchCriteria::one_of(categories.iter().copied()),
        )];
        candidate
    }

    #[test]
    fn first_fee_rule_by_priority_wins() {
        let broad = scoped("broad", RuleType::Percentage, 20, &[]);
        let grasses = scoped("grasses", RuleType::Tiered, 10, &["Grasses"]);
        let ordered = RuleSelector::order([&broad, &grasses]);

        let selection = select(&transaction("grasses", "US"), &ordered);
        assert_eq!(selection.primary.map(|rule| rule.id.0.as_str()), Some("grasses"));

        let selection = select(&transaction("Shrubs", "US"), &ordered);
        assert_eq!(selection.primary.map(|rule| rule.id.0.as_str()), Some("broad"));
    }

    #[test]
    fn ties_resolve_by_earliest_creation() {
        let mut older = scoped("older", RuleType::Percentage, 5, &[]);
        let mut newer = scoped("newer", RuleType::Percentage, 5, &[]);
        newer.created_at = older.created_at + Duration::days(1);
        older.id.0 = "z-older".to_string();
        let ordered = RuleSelector::order([&newer, &older]);

        let selection = select(&transaction("Grasses", "US"), &ordered);
        assert_eq!(selection.primary.map(|rule| rule.id.0.as_str()), Some("z-older"));
    }

    #[test]
    fn additive_rules_are_collected_alongside_primary() {
        let primary = scoped("royalty", RuleType::Percentage, 1, &[]);
        let bonus = scoped("bonus", RuleType::Bonus, 2, &["Grasses"]);
        let usage = scoped("usage", RuleType::UsageBased, 3, &[]);
        let minimum = scoped("minimum", RuleType::MinimumGuarantee, 4, &[]);
        let ordered = RuleSelector::order([&primary, &bonus, &usage, &minimum]);

        let selection = select(&transaction("Grasses", "US"), &ordered);
        assert!(selection.primary.is_some());
        assert_eq!(selection.additive.len(), 2);
        assert!(selection.deductions.is_empty());
    }

    #[test]
    fn unmatched_when_no_rule_or_wildcard_applies() {
        let perennials = scoped("perennials", RuleType::Percentage, 1, &["Perennials"]);
        let ordered = RuleSelector::order([&perennials]);
        let selection = select(&transaction("Annuals", "US"), &ordered);
        assert!(selection.primary.is_none());
    }

    #[test]
    fn inactive_rules_are_ignored() {
        let mut retired = scoped("retired", RuleType::Percentage, 1, &[]);
        retired.is_active = false;
        let ordered = RuleSelector::order([&retired]);
        assert!(ordered.is_empty());
    }
}
