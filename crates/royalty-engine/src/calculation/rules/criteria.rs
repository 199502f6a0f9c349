use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::super::domain::{parse_decimal, Dimension};

/// Matching predicate for a single dimension.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchCriteria {
    #[default]
    Wildcard,
    SetMembership {
        values: BTreeSet<String>,
    },
    /// Inclusive numeric range; either side may be open.
    Range {
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
}

impl MatchCriteria {
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            MatchCriteria::Wildcard
        } else {
            MatchCriteria::SetMembership { values }
        }
    }

    pub fn is_wildcard(&self) -> bool {
        match self {
            MatchCriteria::Wildcard => true,
            MatchCriteria::SetMembership { values } => values.is_empty(),
            MatchCriteria::Range { min, max } => min.is_none() && max.is_none(),
        }
    }

    /// A missing value only satisfies a wildcard.
    pub fn matches(&self, value: Option<&str>) -> bool {
        if self.is_wildcard() {
            return true;
        }
        let Some(value) = value.map(str::trim) else {
            return false;
        };
        match self {
            MatchCriteria::Wildcard => true,
            MatchCriteria::SetMembership { values } => values
                .iter()
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(value)),
            MatchCriteria::Range { min, max } => match parse_decimal(value) {
                Some(number) => {
                    min.map_or(true, |min| number >= min) && max.map_or(true, |max| number <= max)
                }
                None => false,
            },
        }
    }

    /// Human readable form stored on blueprint dimensions.
    pub fn describe(&self) -> String {
        match self {
            MatchCriteria::Wildcard => "*".to_string(),
            MatchCriteria::SetMembership { values } => {
                values.iter().cloned().collect::<Vec<_>>().join("|")
            }
            MatchCriteria::Range { min, max } => format!(
                "{}..={}",
                min.map(|value| value.normalize().to_string())
                    .unwrap_or_default(),
                max.map(|value| value.normalize().to_string())
                    .unwrap_or_default()
            ),
        }
    }
}

/// A rule's criterion on one dimension. Dimensions without a criterion are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub dimension: Dimension,
    #[serde(flatten)]
    pub criteria: MatchCriteria,
}

impl Criterion {
    pub fn new(dimension: Dimension, criteria: MatchCriteria) -> Self {
        Self {
            dimension,
            criteria,
        }
    }
}
