//! Tiered rate evaluation.
//!
//! Two strategies are supported. Marginal evaluation splits the basis across
//! bands and charges each band at its own rate. Blended evaluation charges the
//! whole cumulative basis of a grouping at the rate of the tier that contains
//! it; the per-transaction fee is the change in the rounded group fee, so the
//! line items of a group always add up to `cumulative * final_rate`.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::domain::ArithmeticOverflow;
use super::rules::ValidationError;

/// Rounding applied once to a final fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfDown,
    Up,
}

impl RoundingMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "half_up" | "half-up" | "round_half_up" => Some(Self::HalfUp),
            "half_down" | "half-down" | "round_half_down" => Some(Self::HalfDown),
            "up" | "round_up" | "ceiling" => Some(Self::Up),
            _ => None,
        }
    }

    pub fn apply(self, value: Decimal, scale: u32) -> Decimal {
        let strategy = match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfDown => RoundingStrategy::MidpointTowardZero,
            RoundingMode::Up => RoundingStrategy::AwayFromZero,
        };
        value.round_dp_with_strategy(scale, strategy)
    }
}

/// Which transaction quantity a tier table is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierBasis {
    #[default]
    Quantity,
    Amount,
}

impl TierBasis {
    pub fn field_name(self) -> &'static str {
        match self {
            TierBasis::Quantity => "quantity",
            TierBasis::Amount => "gross_amount",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierMethod {
    #[default]
    Marginal,
    Total,
}

/// One contiguous band of a rate table. A missing `max` means open ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTier {
    pub min: Decimal,
    #[serde(default)]
    pub max: Option<Decimal>,
    pub rate: Decimal,
}

impl VolumeTier {
    pub fn label(&self) -> String {
        match self.max {
            Some(max) => format!("{}-{}", self.min.normalize(), max.normalize()),
            None => format!("{}+", self.min.normalize()),
        }
    }
}

/// Validated, ascending, non-overlapping tier table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<VolumeTier>", into = "Vec<VolumeTier>")]
pub struct TierTable {
    tiers: Vec<VolumeTier>,
}

impl TierTable {
    pub fn new(tiers: Vec<VolumeTier>) -> Result<Self, ValidationError> {
        if tiers.is_empty() {
            return Err(ValidationError::EmptyTierTable);
        }

        for (index, tier) in tiers.iter().enumerate() {
            if tier.min < Decimal::ZERO {
                return Err(ValidationError::NegativeTierBound { index });
            }
            match tier.max {
                Some(max) if max < tier.min => {
                    return Err(ValidationError::InvertedTier { index });
                }
                None if index + 1 != tiers.len() => {
                    return Err(ValidationError::OpenTierNotLast { index });
                }
                _ => {}
            }
            if index > 0 {
                let previous = &tiers[index - 1];
                if tier.min < previous.min {
                    return Err(ValidationError::UnsortedTiers { index });
                }
                if let Some(previous_max) = previous.max {
                    if tier.min < previous_max {
                        return Err(ValidationError::OverlappingTiers { index });
                    }
                }
            }
        }

        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[VolumeTier] {
        &self.tiers
    }

    /// Index of the tier holding `value`; bands are `(previous max, max]`.
    /// Values below the first tier's minimum sit outside the table.
    pub fn tier_index_for(&self, value: Decimal) -> Option<usize> {
        let first = self.tiers.first()?;
        if value < first.min {
            return None;
        }
        self.tiers
            .iter()
            .position(|tier| tier.max.map_or(true, |max| value <= max))
    }
}

impl TryFrom<Vec<VolumeTier>> for TierTable {
    type Error = ValidationError;

    fn try_from(value: Vec<VolumeTier>) -> Result<Self, Self::Error> {
        TierTable::new(value)
    }
}

impl From<TierTable> for Vec<VolumeTier> {
    fn from(value: TierTable) -> Self {
        value.tiers
    }
}

/// Unrounded contribution of one band, kept for the audit breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandCharge {
    pub tier: String,
    pub units: Decimal,
    pub rate: Decimal,
    pub subtotal: Decimal,
}

/// Result of marginal evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginalCharge {
    pub unrounded: Decimal,
    pub bands: Vec<BandCharge>,
    pub top_tier: Option<String>,
}

impl MarginalCharge {
    /// Blended rate actually paid across the bands.
    pub fn effective_rate(&self, basis: Decimal) -> Decimal {
        self.unrounded.checked_div(basis).unwrap_or_default()
    }
}

/// Running state for one blended grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CumulativeState {
    pub basis: Decimal,
    pub fee: Decimal,
}

/// Blended state for every grouping seen so far in a run, keyed by rule and grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierAccumulator {
    groups: BTreeMap<String, CumulativeState>,
}

impl TierAccumulator {
    pub fn state(&self, key: &str) -> CumulativeState {
        self.groups.get(key).copied().unwrap_or_default()
    }

    /// Apply the updates staged by one successfully priced transaction.
    pub fn commit(&mut self, updates: impl IntoIterator<Item = (String, CumulativeState)>) {
        for (key, state) in updates {
            self.groups.insert(key, state);
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Result of blended evaluation for a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlendedCharge {
    pub tier: Option<String>,
    pub rate: Decimal,
    pub unrounded_group_fee: Decimal,
    pub fee: Decimal,
    pub next: CumulativeState,
}

/// Container-size schedule: base rate below the threshold, discounted at or above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSizeRate {
    pub container_size: String,
    pub base_rate: Decimal,
    pub volume_threshold: Decimal,
    pub discounted_rate: Decimal,
}

pub struct TierEvaluator;

impl TierEvaluator {
    pub fn marginal(table: &TierTable, basis: Decimal) -> Result<MarginalCharge, ArithmeticOverflow> {
        let sign = if basis.is_sign_negative() {
            Decimal::NEGATIVE_ONE
        } else {
            Decimal::ONE
        };
        let magnitude = basis.abs();

        let mut bands = Vec::new();
        let mut unrounded = Decimal::ZERO;
        let mut top_tier = None;
        let mut lower = table.tiers[0].min;

        for tier in &table.tiers {
            if magnitude <= lower {
                break;
            }
            let upper = match tier.max {
                Some(max) => magnitude.min(max),
                None => magnitude,
            };
            let units = upper - lower;
            if units > Decimal::ZERO {
                let subtotal = units
                    .checked_mul(tier.rate)
                    .map(|amount| amount * sign)
                    .ok_or(ArithmeticOverflow)?;
                unrounded = unrounded.checked_add(subtotal).ok_or(ArithmeticOverflow)?;
                top_tier = Some(tier.label());
                bands.push(BandCharge {
                    tier: tier.label(),
                    units: units * sign,
                    rate: tier.rate,
                    subtotal,
                });
            }
            match tier.max {
                Some(max) => lower = max,
                None => break,
            }
        }

        Ok(MarginalCharge {
            unrounded,
            bands,
            top_tier,
        })
    }

    pub fn blended(
        table: &TierTable,
        state: CumulativeState,
        basis: Decimal,
        rounding: RoundingMode,
        scale: u32,
    ) -> Result<BlendedCharge, ArithmeticOverflow> {
        let cumulative = state.basis.checked_add(basis).ok_or(ArithmeticOverflow)?;
        let (tier, rate) = match table.tier_index_for(cumulative.abs()) {
            Some(index) => {
                let tier = &table.tiers[index];
                (Some(tier.label()), tier.rate)
            }
            None => (None, Decimal::ZERO),
        };
        Self::settle(state, cumulative, tier, rate, rounding, scale)
    }

    pub fn container_size(
        schedule: &ContainerSizeRate,
        state: CumulativeState,
        volume: Decimal,
        rounding: RoundingMode,
        scale: u32,
    ) -> Result<BlendedCharge, ArithmeticOverflow> {
        let cumulative = state.basis.checked_add(volume).ok_or(ArithmeticOverflow)?;
        let (tier, rate) = if cumulative.abs() >= schedule.volume_threshold {
            (
                format!("{}>={}", schedule.container_size, schedule.volume_threshold.normalize()),
                schedule.discounted_rate,
            )
        } else {
            (
                format!("{}<{}", schedule.container_size, schedule.volume_threshold.normalize()),
                schedule.base_rate,
            )
        };
        Self::settle(state, cumulative, Some(tier), rate, rounding, scale)
    }

    fn settle(
        state: CumulativeState,
        cumulative: Decimal,
        tier: Option<String>,
        rate: Decimal,
        rounding: RoundingMode,
        scale: u32,
    ) -> Result<BlendedCharge, ArithmeticOverflow> {
        let unrounded_group_fee = cumulative.checked_mul(rate).ok_or(ArithmeticOverflow)?;
        let group_fee = rounding.apply(unrounded_group_fee, scale);
        Ok(BlendedCharge {
            tier,
            rate,
            unrounded_group_fee,
            fee: group_fee.checked_sub(state.fee).ok_or(ArithmeticOverflow)?,
            next: CumulativeState {
                basis: cumulative,
                fee: group_fee,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(raw: &str) -> Decimal {
        raw.parse().expect("valid decimal")
    }

    fn tier(min: &str, max: Option<&str>, rate: &str) -> VolumeTier {
        VolumeTier {
            min: d(min),
            max: max.map(d),
            rate: d(rate),
        }
    }

    fn unit_ladder() -> TierTable {
        TierTable::new(vec![
            tier("0", Some("4999"), "1.25"),
            tier("5000", Some("14999"), "1.10"),
            tier("15000", None, "0.95"),
        ])
        .expect("valid ladder")
    }

    #[test]
    fn marginal_splits_units_across_bands() {
        let charge = TierEvaluator::marginal(&unit_ladder(), d("6500")).expect("fits");
        let expected = d("4999") * d("1.25") + d("1501") * d("1.10");
        assert_eq!(charge.unrounded, expected);
        assert_eq!(charge.bands.len(), 2);
        assert_eq!(charge.bands[1].units, d("1501"));
        assert_eq!(charge.top_tier.as_deref(), Some("5000-14999"));
    }

    #[test]
    fn marginal_matches_unit_by_unit_reference() {
        let table = unit_ladder();
        for quantity in [0u32, 1, 4998, 4999, 5000, 5001, 14999, 15000, 15001, 20000] {
            let reference: Decimal = (1..=quantity)
                .map(|unit| {
                    let index = table
                        .tier_index_for(Decimal::from(unit))
                        .expect("unit inside table");
                    table.tiers()[index].rate
                })
                .sum();
            let charge = TierEvaluator::marginal(&table, Decimal::from(quantity)).expect("fits");
            assert_eq!(charge.unrounded, reference, "quantity {quantity}");
        }
    }

    #[test]
    fn marginal_preserves_sign_for_returns() {
        let forward = TierEvaluator::marginal(&unit_ladder(), d("6500")).expect("fits");
        let back = TierEvaluator::marginal(&unit_ladder(), d("-6500")).expect("fits");
        assert_eq!(back.unrounded, -forward.unrounded);
    }

    #[test]
    fn marginal_charges_everything_above_top_tier_at_its_rate() {
        let charge = TierEvaluator::marginal(&unit_ladder(), d("20000")).expect("fits");
        let last = charge.bands.last().expect("top band");
        assert_eq!(last.units, d("5001"));
        assert_eq!(last.rate, d("0.95"));
    }

    #[test]
    fn oversized_basis_reports_overflow() {
        let basis = d("70000000000000000000000000000");
        let flat = TierTable::new(vec![tier("0", None, "2")]).expect("valid table");
        assert_eq!(TierEvaluator::marginal(&flat, basis), Err(ArithmeticOverflow));
        assert_eq!(
            TierEvaluator::blended(&flat, CumulativeState::default(), basis, RoundingMode::HalfUp, 2),
            Err(ArithmeticOverflow)
        );
    }

    #[test]
    fn blended_charges_whole_basis_at_final_tier() {
        let table = TierTable::new(vec![
            tier("0", Some("999999"), "0"),
            tier("1000000", Some("2499999"), "0.02"),
            tier("2500000", None, "0.04"),
        ])
        .expect("valid rebate table");

        let mut state = CumulativeState::default();
        let mut total = Decimal::ZERO;
        for amount in ["800000", "900000", "1300000"] {
            let charge = TierEvaluator::blended(&table, state, d(amount), RoundingMode::HalfUp, 2)
                .expect("fits");
            total += charge.fee;
            state = charge.next;
        }

        assert_eq!(state.basis, d("3000000"));
        assert_eq!(total, d("120000"));
    }

    #[test]
    fn container_size_switches_to_discount_at_threshold() {
        let schedule = ContainerSizeRate {
            container_size: "1-gallon".to_string(),
            base_rate: d("1.25"),
            volume_threshold: d("5000"),
            discounted_rate: d("1.10"),
        };

        let first = TierEvaluator::container_size(
            &schedule,
            CumulativeState::default(),
            d("4000"),
            RoundingMode::HalfUp,
            2,
        )
        .expect("fits");
        assert_eq!(first.fee, d("5000"));
        let second =
            TierEvaluator::container_size(&schedule, first.next, d("2000"), RoundingMode::HalfUp, 2)
                .expect("fits");
        assert_eq!(second.rate, d("1.10"));
        assert_eq!(first.fee + second.fee, d("6600"));
    }

    #[test]
    fn rejects_overlapping_and_unsorted_tables() {
        let overlapping = TierTable::new(vec![
            tier("0", Some("100"), "1"),
            tier("50", None, "2"),
        ]);
        assert_eq!(
            overlapping,
            Err(ValidationError::OverlappingTiers { index: 1 })
        );

        let unsorted = TierTable::new(vec![
            tier("100", Some("200"), "1"),
            tier("0", Some("99"), "2"),
        ]);
        assert_eq!(unsorted, Err(ValidationError::UnsortedTiers { index: 1 }));

        let open_middle = TierTable::new(vec![tier("0", None, "1"), tier("10", None, "2")]);
        assert_eq!(open_middle, Err(ValidationError::OpenTierNotLast { index: 0 }));
    }

    #[test]
    fn rounding_modes_differ_at_midpoint() {
        let value = d("10.125");
        assert_eq!(RoundingMode::HalfUp.apply(value, 2), d("10.13"));
        assert_eq!(RoundingMode::HalfDown.apply(value, 2), d("10.12"));
        assert_eq!(RoundingMode::Up.apply(d("10.121"), 2), d("10.13"));
    }
}
