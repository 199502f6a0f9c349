use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{checked_sum, ArithmeticOverflow, CalculationPeriod, Quarter};

/// Contractual floor on payable fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule", rename_all = "snake_case")]
pub enum MinimumGuarantee {
    /// Flat minimum settled at calendar year end.
    Annual { amount: Decimal },
    /// Independent per-quarter minimums (Q1..Q4) with an optional year-end true-up.
    Quarterly {
        quarters: [Decimal; 4],
        #[serde(default)]
        annual_true_up: Option<Decimal>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuaranteeScope {
    Quarter { period: Quarter },
    Annual { year: i32 },
}

impl GuaranteeScope {
    pub fn label(&self) -> String {
        match self {
            GuaranteeScope::Quarter { period } => period.label(),
            GuaranteeScope::Annual { year } => format!("{year}"),
        }
    }
}

/// Informational result of a minimum-guarantee check; a shortfall is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinimumGuaranteeOutcome {
    pub scope: GuaranteeScope,
    pub calculated_total: Decimal,
    pub minimum: Decimal,
    pub final_total: Decimal,
    pub minimum_guarantee_applied: bool,
    pub shortfall: Decimal,
}

/// Fees a run charged within one calendar quarter, adjustments included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterFee {
    pub quarter: Quarter,
    pub fee: Decimal,
}

/// Periods and fees of earlier approved runs for the same contract.
///
/// A minimum is settled once its whole quarter or year is covered by these
/// periods together with the current run, against the combined fees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettledHistory {
    periods: Vec<CalculationPeriod>,
    fees: BTreeMap<Quarter, Decimal>,
}

impl SettledHistory {
    pub fn record(
        &mut self,
        period: CalculationPeriod,
        fees: &[QuarterFee],
    ) -> Result<(), ArithmeticOverflow> {
        for entry in fees {
            let total = self.fees.entry(entry.quarter).or_default();
            *total = total.checked_add(entry.fee).ok_or(ArithmeticOverflow)?;
        }
        self.periods.push(period);
        Ok(())
    }

    fn fee(&self, quarter: &Quarter) -> Decimal {
        self.fees.get(quarter).copied().unwrap_or_default()
    }

    /// True when `current` and the recorded periods leave no day of `start..=end` uncovered.
    fn covers(&self, current: &CalculationPeriod, start: NaiveDate, end: NaiveDate) -> bool {
        let mut windows: Vec<&CalculationPeriod> =
            self.periods.iter().chain(std::iter::once(current)).collect();
        windows.sort_by_key(|window| window.start);

        let mut next = start;
        for window in windows {
            if window.start > next {
                return false;
            }
            if window.end >= next {
                match window.end.succ_opt() {
                    Some(day) => next = day,
                    None => return true,
                }
            }
            if next > end {
                return true;
            }
        }
        next > end
    }
}

pub struct MinimumGuaranteeEnforcer;

impl MinimumGuaranteeEnforcer {
    /// `final_total = max(calculated_total, minimum)`.
    pub fn apply(
        scope: GuaranteeScope,
        calculated_total: Decimal,
        minimum: Decimal,
    ) -> MinimumGuaranteeOutcome {
        let final_total = calculated_total.max(minimum);
        let shortfall = final_total - calculated_total;
        MinimumGuaranteeOutcome {
            scope,
            calculated_total,
            minimum,
            final_total,
            minimum_guarantee_applied: shortfall > Decimal::ZERO,
            shortfall,
        }
    }

    /// Settle a schedule for a run period.
    ///
    /// A quarterly minimum is settled for each quarter the run touches once
    /// the quarter is fully covered, on the quarter's fees from this run and
    /// `settled`. The annual amount (or quarterly true-up) is settled for each
    /// December 31st inside the run once the whole year is covered, against the
    /// year's fees plus this run's quarterly shortfalls. Anything not yet
    /// covered is left for the run that completes it.
    pub fn enforce(
        schedule: &MinimumGuarantee,
        period: &CalculationPeriod,
        quarter_totals: &BTreeMap<Quarter, Decimal>,
        settled: &SettledHistory,
    ) -> Result<Vec<MinimumGuaranteeOutcome>, ArithmeticOverflow> {
        let mut outcomes = Vec::new();
        let combined = |quarter: &Quarter| {
            quarter_totals
                .get(quarter)
                .copied()
                .unwrap_or_default()
                .checked_add(settled.fee(quarter))
                .ok_or(ArithmeticOverflow)
        };

        let annual_minimum = match schedule {
            MinimumGuarantee::Annual { amount } => Some(*amount),
            MinimumGuarantee::Quarterly {
                quarters,
                annual_true_up,
            } => {
                for quarter in Quarter::spanning(period.start, period.end) {
                    let Some((first, last)) = quarter.bounds() else {
                        continue;
                    };
                    if !settled.covers(period, first, last) {
                        continue;
                    }
                    let minimum = quarters[usize::from(quarter.quarter - 1)];
                    outcomes.push(Self::apply(
                        GuaranteeScope::Quarter { period: quarter },
                        combined(&quarter)?,
                        minimum,
                    ));
                }
                *annual_true_up
            }
        };

        let Some(minimum) = annual_minimum else {
            return Ok(outcomes);
        };
        for year in period.start.year()..=period.end.year() {
            let (Some(first), Some(last)) = (
                NaiveDate::from_ymd_opt(year, 1, 1),
                NaiveDate::from_ymd_opt(year, 12, 31),
            ) else {
                continue;
            };
            if !period.contains(last) || !settled.covers(period, first, last) {
                continue;
            }
            let mut year_fees = Vec::new();
            for quarter in 1..=4 {
                year_fees.push(combined(&Quarter { year, quarter })?);
            }
            let quarterly_shortfalls = outcomes.iter().filter_map(|outcome| match outcome.scope {
                GuaranteeScope::Quarter { period } if period.year == year => Some(outcome.shortfall),
                _ => None,
            });
            let year_total = checked_sum(year_fees.into_iter().chain(quarterly_shortfalls))?;
            outcomes.push(Self::apply(GuaranteeScope::Annual { year }, year_total, minimum));
        }

        Ok(outcomes)
    }
}
