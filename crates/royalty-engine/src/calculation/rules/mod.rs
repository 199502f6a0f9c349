mod book;
mod criteria;
mod validation;

pub use book::{RuleBook, RuleBookError};
pub use criteria::{Criterion, MatchCriteria};
pub use validation::{validate_rule, ValidationError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{ContractId, Dimension, RuleId, SalesTransaction};
use super::formula::Expr;
use super::minimum::MinimumGuarantee;
use super::tiers::{ContainerSizeRate, TierBasis, TierMethod, TierTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Percentage,
    Tiered,
    MinimumGuarantee,
    Cap,
    Deduction,
    FixedFee,
    ContainerSizeTiered,
    Formula,
    Bonus,
    UsageBased,
}

/// How a rule participates in a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleClass {
    /// Mutually exclusive; the first match by priority sets the fee.
    FeeDetermining,
    /// Charged on top of the primary fee.
    Additive,
    /// Reduces the amount basis before the primary fee.
    Deduction,
    /// Settled once per period after all transactions.
    Period,
}

impl RuleType {
    pub const fn class(self) -> RuleClass {
        match self {
            RuleType::Percentage
            | RuleType::Tiered
            | RuleType::ContainerSizeTiered
            | RuleType::Formula => RuleClass::FeeDetermining,
            RuleType::Bonus | RuleType::UsageBased => RuleClass::Additive,
            RuleType::Deduction => RuleClass::Deduction,
            RuleType::MinimumGuarantee | RuleType::Cap | RuleType::FixedFee => RuleClass::Period,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RuleType::Percentage => "percentage",
            RuleType::Tiered => "tiered",
            RuleType::MinimumGuarantee => "minimum_guarantee",
            RuleType::Cap => "cap",
            RuleType::Deduction => "deduction",
            RuleType::FixedFee => "fixed_fee",
            RuleType::ContainerSizeTiered => "container_size_tiered",
            RuleType::Formula => "formula",
            RuleType::Bonus => "bonus",
            RuleType::UsageBased => "usage_based",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

/// Scope of the running total used by blended tiers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierGrouping {
    Contract,
    #[default]
    ProductCategory,
    Dimension(Dimension),
}

/// Contract-scoped pricing rule. Published versions are never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyaltyRule {
    pub id: RuleId,
    pub contract_id: ContractId,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub predecessor: Option<RuleId>,
    pub created_at: DateTime<Utc>,
    pub rule_type: RuleType,
    pub rule_name: String,
    pub priority: i32,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub tier_basis: TierBasis,
    #[serde(default)]
    pub tier_method: TierMethod,
    #[serde(default)]
    pub tier_grouping: TierGrouping,
    #[serde(default)]
    pub volume_tiers: Option<TierTable>,
    #[serde(default)]
    pub container_size_rates: Vec<ContainerSizeRate>,
    #[serde(default)]
    pub base_rate: Option<Decimal>,
    /// Flat amount for fixed fees and caps.
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub minimum_guarantee: Option<MinimumGuarantee>,
    #[serde(default)]
    pub formula_definition: Option<Expr>,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub review_status: ReviewStatus,
}

fn first_version() -> u32 {
    1
}

fn active() -> bool {
    true
}

impl RoyaltyRule {
    pub fn class(&self) -> RuleClass {
        self.rule_type.class()
    }

    /// True when every dimension criterion accepts the transaction.
    pub fn matches(&self, transaction: &SalesTransaction) -> bool {
        self.criteria.iter().all(|criterion| {
            criterion
                .criteria
                .matches(transaction.dimension_value(&criterion.dimension))
        })
    }

    /// Dimensions that actually constrain matching.
    pub fn constrained_dimensions(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria
            .iter()
            .filter(|criterion| !criterion.criteria.is_wildcard())
    }

    /// Quantity or amount the rule's rate is charged on.
    pub fn basis(&self) -> TierBasis {
        match self.rule_type {
            RuleType::Percentage | RuleType::Bonus | RuleType::Deduction => TierBasis::Amount,
            RuleType::ContainerSizeTiered | RuleType::UsageBased => TierBasis::Quantity,
            _ => self.tier_basis,
        }
    }

    /// Priority ordering: ascending priority, then earliest creation, then id.
    pub fn precedence_key(&self) -> (i32, DateTime<Utc>, &RuleId) {
        (self.priority, self.created_at, &self.id)
    }

    pub(crate) fn grouping_key(&self, transaction: &SalesTransaction) -> String {
        match &self.tier_grouping {
            TierGrouping::Contract => "*".to_string(),
            TierGrouping::ProductCategory => transaction
                .dimension_value(&Dimension::ProductCategory)
                .unwrap_or("(none)")
                .to_ascii_lowercase(),
            TierGrouping::Dimension(dimension) => transaction
                .dimension_value(dimension)
                .unwrap_or("(none)")
                .to_ascii_lowercase(),
        }
    }
}
