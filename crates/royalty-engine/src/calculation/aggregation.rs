use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::line_item::{CalculationLineItem, LineItemKind};

const UNASSIGNED: &str = "(unassigned)";

/// Reporting key for grouping line items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationDimension {
    Vendor,
    Item,
    Territory,
    Period,
    Category,
    Rule,
    ContainerSize,
    Custom(String),
}

impl AggregationDimension {
    /// Known keys by name; anything else groups on a custom field.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return None;
        }
        Some(match key.to_ascii_lowercase().as_str() {
            "vendor" => Self::Vendor,
            "item" | "product" => Self::Item,
            "territory" => Self::Territory,
            "period" => Self::Period,
            "category" | "product_category" => Self::Category,
            "rule" => Self::Rule,
            "container_size" => Self::ContainerSize,
            _ => Self::Custom(key.to_string()),
        })
    }

    fn value_of(&self, item: &CalculationLineItem) -> Option<String> {
        match self {
            Self::Vendor => item.vendor.clone(),
            Self::Item => item.item.clone(),
            Self::Territory => item.territory.clone(),
            Self::Period => Some(item.period.clone()),
            Self::Category => item.category.clone(),
            Self::Rule => item
                .rule_name
                .clone()
                .or_else(|| item.rule_id.as_ref().map(|id| id.0.clone())),
            Self::ContainerSize => item.container_size.clone(),
            Self::Custom(key) => item.dimensions.get(key).cloned(),
        }
    }
}

impl fmt::Display for AggregationDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendor => f.write_str("vendor"),
            Self::Item => f.write_str("item"),
            Self::Territory => f.write_str("territory"),
            Self::Period => f.write_str("period"),
            Self::Category => f.write_str("category"),
            Self::Rule => f.write_str("rule"),
            Self::ContainerSize => f.write_str("container_size"),
            Self::Custom(key) => f.write_str(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRow {
    pub dimension_value: String,
    pub transaction_count: u64,
    pub total_quantity: Decimal,
    pub total_sales_amount: Decimal,
    pub total_fee: Decimal,
    pub percent_of_total: Decimal,
}

impl AggregationRow {
    fn empty(dimension_value: String) -> Self {
        Self {
            dimension_value,
            transaction_count: 0,
            total_quantity: Decimal::ZERO,
            total_sales_amount: Decimal::ZERO,
            total_fee: Decimal::ZERO,
            percent_of_total: Decimal::ZERO,
        }
    }

    fn add(&mut self, item: &CalculationLineItem) {
        if item.kind == LineItemKind::Transaction {
            self.transaction_count += 1;
            self.total_quantity += item.quantity;
            self.total_sales_amount += item.gross_amount;
        }
        self.total_fee += item.calculated_fee;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub dimension: String,
    pub rows: Vec<AggregationRow>,
    pub totals: AggregationRow,
}

pub struct AggregationReporter;

impl AggregationReporter {
    /// Group line items by `dimension`, rows in first-seen order.
    ///
    /// Period adjustments are included so row fees add up to the run total;
    /// they do not count as transactions.
    pub fn aggregate(
        items: &[CalculationLineItem],
        dimension: &AggregationDimension,
    ) -> AggregationReport {
        let mut rows: Vec<AggregationRow> = Vec::new();
        let mut totals = AggregationRow::empty("total".to_string());

        for item in items {
            let value = dimension
                .value_of(item)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| UNASSIGNED.to_string());
            let position = match rows.iter().position(|row| row.dimension_value == value) {
                Some(position) => position,
                None => {
                    rows.push(AggregationRow::empty(value));
                    rows.len() - 1
                }
            };
            rows[position].add(item);
            totals.add(item);
        }

        let grand_total = totals.total_fee;
        for row in &mut rows {
            row.percent_of_total = percent(row.total_fee, grand_total);
        }
        totals.percent_of_total = percent(grand_total, grand_total);

        AggregationReport {
            dimension: dimension.to_string(),
            rows,
            totals,
        }
    }
}

fn percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    (part * Decimal::ONE_HUNDRED / whole).round_dp(2)
}
