use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for licensing contracts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractId(pub String);

/// Identifier wrapper for royalty rules. Each published version carries its own id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// Identifier wrapper for calculation runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

/// Identifier wrapper for imported sales transactions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

macro_rules! display_id {
    ($($name:ident),*) => {
        $(impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_id!(ContractId, RuleId, RunId, TransactionId);

/// Categorical attribute used for rule matching and report grouping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ProductCategory,
    Territory,
    ContainerSize,
    Product,
    Vendor,
    Custom(String),
}

impl Dimension {
    /// Canonical contract term used when binding the dimension to ERP fields.
    pub fn contract_term(&self) -> &str {
        match self {
            Dimension::ProductCategory => "product_category",
            Dimension::Territory => "territory",
            Dimension::ContainerSize => "container_size",
            Dimension::Product => "product",
            Dimension::Vendor => "vendor",
            Dimension::Custom(name) => name.as_str(),
        }
    }
}

/// Sales row handed over by the import/ERP ingestion subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesTransaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub territory: Option<String>,
    #[serde(default)]
    pub container_size: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    pub quantity: Decimal,
    pub gross_amount: Decimal,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, String>,
}

impl SalesTransaction {
    pub fn dimension_value(&self, dimension: &Dimension) -> Option<&str> {
        let value = match dimension {
            Dimension::ProductCategory => self.category.as_deref(),
            Dimension::Territory => self.territory.as_deref(),
            Dimension::ContainerSize => self.container_size.as_deref(),
            Dimension::Product => self.product.as_deref(),
            Dimension::Vendor => self.vendor.as_deref(),
            Dimension::Custom(name) => self.custom_fields.get(name).map(String::as_str),
        };
        value.filter(|raw| !raw.trim().is_empty())
    }

    /// Resolve a field by name, checking the standard columns before custom ERP fields.
    pub fn field(&self, name: &str) -> FieldValue {
        match name {
            "quantity" => FieldValue::Number(self.quantity),
            "gross_amount" | "amount" => FieldValue::Number(self.gross_amount),
            "date" => FieldValue::Text(self.date.format("%Y-%m-%d").to_string()),
            "id" | "transaction_id" => FieldValue::Text(self.id.0.clone()),
            "product" => FieldValue::from_optional(self.product.as_deref()),
            "category" | "product_category" => FieldValue::from_optional(self.category.as_deref()),
            "territory" => FieldValue::from_optional(self.territory.as_deref()),
            "container_size" => FieldValue::from_optional(self.container_size.as_deref()),
            "vendor" => FieldValue::from_optional(self.vendor.as_deref()),
            other => FieldValue::from_optional(self.custom_fields.get(other).map(String::as_str)),
        }
    }

    pub fn period(&self) -> Quarter {
        Quarter::containing(self.date)
    }
}

/// Loosely typed value produced while resolving ERP fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Number(Decimal),
    Text(String),
}

impl FieldValue {
    pub fn from_optional(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => FieldValue::Null,
            Some(text) => FieldValue::Text(text.to_string()),
        }
    }

    /// Numeric view of the value; text is parsed leniently (thousands separators and `$` stripped).
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Null => None,
            FieldValue::Number(value) => Some(*value),
            FieldValue::Text(text) => parse_decimal(text),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Number(value) => Some(value.normalize().to_string()),
            FieldValue::Text(text) => Some(text.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, ',' | '$' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}

/// A money or quantity computation left the representable decimal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("arithmetic overflowed the decimal range")]
pub struct ArithmeticOverflow;

/// Sum that reports overflow instead of panicking.
pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, ArithmeticOverflow> {
    values.into_iter().try_fold(Decimal::ZERO, |total, value| {
        total.checked_add(value).ok_or(ArithmeticOverflow)
    })
}

/// Calendar quarter used for period labels and quarterly minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quarter {
    pub year: i32,
    pub quarter: u8,
}

impl Quarter {
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            quarter: ((date.month0() / 3) + 1) as u8,
        }
    }

    pub fn label(&self) -> String {
        format!("{}-Q{}", self.year, self.quarter)
    }

    /// First and last calendar day of the quarter.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first_month = u32::from(self.quarter.checked_sub(1)?) * 3 + 1;
        let first = NaiveDate::from_ymd_opt(self.year, first_month, 1)?;
        let last = match self.quarter {
            4 => NaiveDate::from_ymd_opt(self.year, 12, 31)?,
            _ => NaiveDate::from_ymd_opt(self.year, first_month + 3, 1)?.pred_opt()?,
        };
        Some((first, last))
    }

    /// Quarters touched by the inclusive date range, in order.
    pub fn spanning(start: NaiveDate, end: NaiveDate) -> Vec<Quarter> {
        let mut quarters = Vec::new();
        if end < start {
            return quarters;
        }
        let last = Quarter::containing(end);
        let mut current = Quarter::containing(start);
        while current <= last {
            quarters.push(current);
            current = current.next();
        }
        quarters
    }

    fn next(self) -> Self {
        if self.quarter == 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }
}

/// Inclusive reporting window for a calculation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CalculationPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn overlaps(&self, other: &CalculationPeriod) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}
