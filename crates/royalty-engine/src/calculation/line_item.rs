use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{RuleId, RunId, SalesTransaction, TransactionId};
use super::rules::{RoyaltyRule, RuleType};
use super::tiers::BandCharge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationPath {
    Manual,
    ErpMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Matched,
    Unmatched,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    FixedFee,
    Cap,
    MinimumGuarantee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "adjustment", rename_all = "snake_case")]
pub enum LineItemKind {
    Transaction,
    Adjustment(AdjustmentKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    Primary,
    /// Charged on top of the primary fee; period adjustments carry a signed amount.
    Additive,
    /// Amount removed from the gross basis; not part of the fee.
    Deduction,
}

/// One contribution to a line item, with its unrounded tier bands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeComponent {
    pub role: ComponentRole,
    pub source: String,
    pub rule_type: Option<RuleType>,
    pub basis: Decimal,
    pub rate: Option<Decimal>,
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bands: Vec<BandCharge>,
    pub amount: Decimal,
}

impl FeeComponent {
    pub fn counts_toward_fee(&self) -> bool {
        self.role != ComponentRole::Deduction
    }
}

/// Immutable result record for one transaction or one period adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationLineItem {
    pub id: String,
    pub run_id: RunId,
    pub kind: LineItemKind,
    pub status: LineItemStatus,
    pub path: Option<CalculationPath>,
    pub transaction_id: Option<TransactionId>,
    pub transaction_date: Option<NaiveDate>,
    pub period: String,
    pub vendor: Option<String>,
    pub item: Option<String>,
    pub category: Option<String>,
    pub territory: Option<String>,
    pub container_size: Option<String>,
    pub dimensions: BTreeMap<String, String>,
    pub quantity: Decimal,
    pub gross_amount: Decimal,
    pub net_amount: Decimal,
    pub rule_id: Option<RuleId>,
    pub rule_name: Option<String>,
    pub rule_type: Option<RuleType>,
    pub tier_applied: Option<String>,
    pub applied_rate: Option<Decimal>,
    pub components: Vec<FeeComponent>,
    pub calculated_fee: Decimal,
    pub message: Option<String>,
}

impl CalculationLineItem {
    pub fn is_adjustment(&self) -> bool {
        matches!(self.kind, LineItemKind::Adjustment(_))
    }
}

/// Fee computed for a matched transaction, ready to be recorded.
#[derive(Debug, Clone)]
pub struct Pricing<'a> {
    pub path: CalculationPath,
    pub rule: &'a RoyaltyRule,
    pub net_amount: Decimal,
    pub tier_applied: Option<String>,
    pub applied_rate: Option<Decimal>,
    pub components: Vec<FeeComponent>,
}

/// Builds the line items of one run with sequential ids.
pub struct LineItemGenerator {
    run_id: RunId,
    default_vendor: Option<String>,
    sequence: u32,
}

impl LineItemGenerator {
    pub fn new(run_id: RunId, default_vendor: Option<String>) -> Self {
        Self {
            run_id,
            default_vendor,
            sequence: 0,
        }
    }

    pub fn priced(&mut self, transaction: &SalesTransaction, pricing: Pricing<'_>) -> CalculationLineItem {
        let mut item = self.base(transaction, LineItemStatus::Matched);
        item.path = Some(pricing.path);
        item.net_amount = pricing.net_amount;
        item.rule_id = Some(pricing.rule.id.clone());
        item.rule_name = Some(pricing.rule.rule_name.clone());
        item.rule_type = Some(pricing.rule.rule_type);
        item.tier_applied = pricing.tier_applied;
        item.applied_rate = pricing.applied_rate;
        item.calculated_fee = pricing
            .components
            .iter()
            .filter(|component| component.counts_toward_fee())
            .map(|component| component.amount)
            .sum();
        item.components = pricing.components;
        item
    }

    pub fn unmatched(&mut self, transaction: &SalesTransaction, message: impl Into<String>) -> CalculationLineItem {
        let mut item = self.base(transaction, LineItemStatus::Unmatched);
        item.message = Some(message.into());
        item
    }

    pub fn failed(
        &mut self,
        transaction: &SalesTransaction,
        rule: Option<&RoyaltyRule>,
        path: CalculationPath,
        message: impl Into<String>,
    ) -> CalculationLineItem {
        let mut item = self.base(transaction, LineItemStatus::Failed);
        item.path = Some(path);
        if let Some(rule) = rule {
            item.rule_id = Some(rule.id.clone());
            item.rule_name = Some(rule.rule_name.clone());
            item.rule_type = Some(rule.rule_type);
        }
        item.message = Some(message.into());
        item
    }

    pub fn adjustment(
        &mut self,
        kind: AdjustmentKind,
        rule: &RoyaltyRule,
        period: String,
        amount: Decimal,
        message: impl Into<String>,
    ) -> CalculationLineItem {
        CalculationLineItem {
            id: self.next_id(),
            run_id: self.run_id.clone(),
            kind: LineItemKind::Adjustment(kind),
            status: LineItemStatus::Matched,
            path: None,
            transaction_id: None,
            transaction_date: None,
            period,
            vendor: self.default_vendor.clone(),
            item: None,
            category: None,
            territory: None,
            container_size: None,
            dimensions: BTreeMap::new(),
            quantity: Decimal::ZERO,
            gross_amount: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.rule_name.clone()),
            rule_type: Some(rule.rule_type),
            tier_applied: None,
            applied_rate: None,
            components: vec![FeeComponent {
                role: ComponentRole::Additive,
                source: rule.id.0.clone(),
                rule_type: Some(rule.rule_type),
                basis: Decimal::ZERO,
                rate: None,
                tier: None,
                bands: Vec::new(),
                amount,
            }],
            calculated_fee: amount,
            message: Some(message.into()),
        }
    }

    fn base(&mut self, transaction: &SalesTransaction, status: LineItemStatus) -> CalculationLineItem {
        let vendor = transaction
            .vendor
            .clone()
            .or_else(|| self.default_vendor.clone());
        let mut dimensions = transaction.custom_fields.clone();
        for (key, value) in [
            ("item", transaction.product.as_ref()),
            ("category", transaction.category.as_ref()),
            ("territory", transaction.territory.as_ref()),
            ("container_size", transaction.container_size.as_ref()),
            ("vendor", vendor.as_ref()),
        ] {
            if let Some(value) = value {
                dimensions.insert(key.to_string(), value.clone());
            }
        }

        CalculationLineItem {
            id: self.next_id(),
            run_id: self.run_id.clone(),
            kind: LineItemKind::Transaction,
            status,
            path: None,
            transaction_id: Some(transaction.id.clone()),
            transaction_date: Some(transaction.date),
            period: transaction.period().label(),
            vendor,
            item: transaction.product.clone(),
            category: transaction.category.clone(),
            territory: transaction.territory.clone(),
            container_size: transaction.container_size.clone(),
            dimensions,
            quantity: transaction.quantity,
            gross_amount: transaction.gross_amount,
            net_amount: transaction.gross_amount,
            rule_id: None,
            rule_name: None,
            rule_type: None,
            tier_applied: None,
            applied_rate: None,
            components: Vec::new(),
            calculated_fee: Decimal::ZERO,
            message: None,
        }
    }

    fn next_id(&mut self) -> String {
        self.sequence += 1;
        format!("{}-{:05}", self.run_id, self.sequence)
    }
}
