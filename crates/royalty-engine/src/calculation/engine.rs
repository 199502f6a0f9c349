//! Run orchestration.
//!
//! A run validates the contract snapshot, decides per rule whether it is
//! priced on the manual or the ERP-mapping path, folds the period's
//! transactions in `(date, id)` order with an explicit tier accumulator, and
//! closes with the period adjustments: fixed fees, caps, then minimum
//! guarantees. Every fee lands in a line item, so the items always add up to
//! the run total.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::blueprint::{BlueprintMaterializer, CalculationBlueprint, FieldMapping};
use super::domain::{
    checked_sum, CalculationPeriod, ContractId, Quarter, RuleId, RunId,
    SalesTransaction,
};
use super::erp::{ErpMappingRuleExecutor, ErpMappingRuleSet, ErpOutcome, ExecutionLog, LookupTables};
use super::formula::evaluate;
use super::line_item::{
    AdjustmentKind, CalculationLineItem, CalculationPath, ComponentRole, FeeComponent,
    LineItemGenerator, Pricing,
};
use super::minimum::{
    GuaranteeScope, MinimumGuaranteeEnforcer, MinimumGuaranteeOutcome, QuarterFee, SettledHistory,
};
use super::rules::{validate_rule, ReviewStatus, RoyaltyRule, RuleClass, RuleType, ValidationError};
use super::run::{CalculationRun, RuleBreakdown, RunCounts, RunStatus};
use super::selector::{RuleSelection, RuleSelector};
use super::tiers::{CumulativeState, TierAccumulator, TierBasis, TierEvaluator, TierMethod};
use crate::config::{CalculationApproach, CalculationConfig, IncompleteBlueprintPolicy};

type Update = (String, CumulativeState);

/// Read-only view of a contract handed to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSnapshot {
    pub contract_id: ContractId,
    /// Vendor recorded on line items whose transaction does not name one.
    #[serde(default)]
    pub vendor: Option<String>,
    pub rules: Vec<RoyaltyRule>,
    #[serde(default)]
    pub erp_rule_sets: Vec<ErpMappingRuleSet>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub lookup_tables: LookupTables,
    /// Previously materialized blueprints, used to keep versions stable.
    #[serde(default)]
    pub blueprints: Vec<CalculationBlueprint>,
}

impl ContractSnapshot {
    pub fn linked_rule_set(&self, rule: &RuleId) -> Option<&ErpMappingRuleSet> {
        self.erp_rule_sets
            .iter()
            .find(|set| set.is_active && set.royalty_rule_id.as_ref() == Some(rule))
    }

    fn latest_blueprint(&self, rule: &RuleId) -> Option<&CalculationBlueprint> {
        self.blueprints
            .iter()
            .filter(|blueprint| &blueprint.rule_id == rule)
            .max_by_key(|blueprint| blueprint.version)
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub period: CalculationPeriod,
    pub requested_at: DateTime<Utc>,
    /// Earlier approved runs whose fees count towards this run's minimums.
    pub settled: SettledHistory,
}

/// Everything a successful run produces; persisted together.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationOutcome {
    pub run: CalculationRun,
    pub line_items: Vec<CalculationLineItem>,
    pub execution_logs: Vec<ExecutionLog>,
}

/// Run-level failures. Transaction-level problems never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("period start {start} is after period end {end}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },
    #[error("contract {0} not found")]
    ContractNotFound(ContractId),
    #[error("contract {0} has no active royalty rules")]
    NoActiveRules(ContractId),
    #[error("rule {rule} is invalid: {source}")]
    InvalidRule {
        rule: RuleId,
        #[source]
        source: ValidationError,
    },
    #[error("rule {rule} is not fully mapped to ERP fields (unmapped: {})", .unmapped.join(", "))]
    MappingIncomplete { rule: RuleId, unmapped: Vec<String> },
    #[error("{0} exceed the supported decimal range")]
    Overflow(&'static str),
}

/// Per-rule decision on which path prices the rule.
struct ErpPlan<'s> {
    lookups: &'s LookupTables,
    blueprints: BTreeMap<RuleId, CalculationBlueprint>,
    erp_rules: BTreeSet<RuleId>,
    rule_sets: BTreeMap<RuleId, &'s ErpMappingRuleSet>,
}

impl<'s> ErpPlan<'s> {
    fn manual(lookups: &'s LookupTables) -> Self {
        Self {
            lookups,
            blueprints: BTreeMap::new(),
            erp_rules: BTreeSet::new(),
            rule_sets: BTreeMap::new(),
        }
    }

    /// Blueprint used to match and price `rule`, when it runs on the ERP path.
    fn blueprint_for(&self, rule: &RoyaltyRule) -> Option<&CalculationBlueprint> {
        if self.erp_rules.contains(&rule.id) {
            self.blueprints.get(&rule.id)
        } else {
            None
        }
    }
}

struct PrimaryCharge {
    components: Vec<FeeComponent>,
    tier: Option<String>,
    rate: Option<Decimal>,
    updates: Vec<Update>,
}

struct PricingFailure {
    path: CalculationPath,
    message: String,
}

pub struct CalculationEngine {
    config: CalculationConfig,
}

impl CalculationEngine {
    pub fn new(config: CalculationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalculationConfig {
        &self.config
    }

    /// Price a batch of transactions against a contract snapshot.
    ///
    /// Pure with respect to its inputs: the same snapshot, transactions and
    /// request always yield the same line items and totals.
    pub fn run(
        &self,
        snapshot: &ContractSnapshot,
        transactions: &[SalesTransaction],
        request: &RunRequest,
    ) -> Result<CalculationOutcome, RunError> {
        let period = request.period;
        if period.start > period.end {
            return Err(RunError::InvalidPeriod {
                start: period.start,
                end: period.end,
            });
        }

        let mut warnings = Vec::new();
        let eligible: Vec<&RoyaltyRule> = snapshot
            .rules
            .iter()
            .filter(|rule| rule.review_status != ReviewStatus::Rejected)
            .collect();
        let ordered = RuleSelector::order(eligible);
        if ordered.is_empty() {
            return Err(RunError::NoActiveRules(snapshot.contract_id.clone()));
        }
        for rule in &ordered {
            validate_rule(rule).map_err(|source| RunError::InvalidRule {
                rule: rule.id.clone(),
                source,
            })?;
        }

        let plan = self.plan(snapshot, &ordered, &mut warnings)?;

        let mut batch: Vec<&SalesTransaction> = transactions
            .iter()
            .filter(|transaction| period.contains(transaction.date))
            .collect();
        let skipped = transactions.len() - batch.len();
        if skipped > 0 {
            warnings.push(format!(
                "{skipped} transaction(s) outside {}..{} were skipped",
                period.start, period.end
            ));
        }
        batch.sort_by(|a, b| (a.date, &a.id).cmp(&(b.date, &b.id)));

        info!(
            contract = %snapshot.contract_id,
            run = %request.run_id,
            transactions = batch.len(),
            rules = ordered.len(),
            approach = ?self.config.approach,
            "starting calculation run"
        );

        let mut generator = LineItemGenerator::new(request.run_id.clone(), snapshot.vendor.clone());
        let mut accumulator = TierAccumulator::default();
        let mut line_items = Vec::with_capacity(batch.len());
        let mut execution_logs = Vec::new();
        let mut counts = RunCounts::default();
        let mut quarter_totals: BTreeMap<Quarter, Decimal> = BTreeMap::new();
        let mut breakdown: Vec<RuleBreakdown> = Vec::new();

        for transaction in batch.iter().copied() {
            let selection = RuleSelector::select_with(&ordered, |rule| {
                match plan.blueprint_for(rule) {
                    Some(blueprint) => blueprint.matches(transaction),
                    None => rule.matches(transaction),
                }
            });

            let Some(primary) = selection.primary else {
                counts.unmatched += 1;
                line_items.push(
                    generator.unmatched(transaction, "no active rule matched the transaction"),
                );
                continue;
            };

            let (result, log) = self.price(transaction, primary, &selection, &plan, &accumulator);
            if let Some(log) = log {
                execution_logs.push(log);
            }

            match result {
                Ok((pricing, updates)) => {
                    accumulator.commit(updates);
                    let item = generator.priced(transaction, pricing);
                    counts.matched += 1;
                    add_to_quarter(&mut quarter_totals, transaction.period(), item.calculated_fee)?;
                    record_breakdown(&mut breakdown, primary, item.path, item.calculated_fee)?;
                    line_items.push(item);
                }
                Err(failure) => {
                    warn!(
                        transaction = %transaction.id,
                        rule = %primary.id,
                        error = %failure.message,
                        "transaction could not be priced"
                    );
                    counts.failed += 1;
                    line_items.push(generator.failed(
                        transaction,
                        Some(primary),
                        failure.path,
                        failure.message,
                    ));
                }
            }
        }

        let calculated_fee = checked_sum(line_items.iter().map(|item| item.calculated_fee))
            .map_err(|_| RunError::Overflow("transaction fees"))?;
        let minimum_guarantees = self.settle_period(
            &ordered,
            &period,
            &request.settled,
            &mut generator,
            &mut quarter_totals,
            calculated_fee,
            &mut line_items,
            &mut breakdown,
        )?;
        let total_fee = checked_sum(line_items.iter().map(|item| item.calculated_fee))
            .map_err(|_| RunError::Overflow("period fees"))?;
        let total_sales_amount =
            checked_sum(batch.iter().map(|transaction| transaction.gross_amount))
                .map_err(|_| RunError::Overflow("sales amounts"))?;

        let run = CalculationRun {
            id: request.run_id.clone(),
            contract_id: snapshot.contract_id.clone(),
            period,
            approach: self.config.approach,
            total_sales_amount,
            calculated_fee,
            total_fee,
            sales_count: batch.len() as u64,
            counts,
            breakdown,
            minimum_guarantees,
            quarter_fees: quarter_totals
                .into_iter()
                .map(|(quarter, fee)| QuarterFee { quarter, fee })
                .collect(),
            blueprints: plan.blueprints.into_values().collect(),
            warnings,
            status: RunStatus::PendingApproval,
            error_message: None,
            approvals: Vec::new(),
            created_at: request.requested_at,
        };

        info!(
            run = %run.id,
            matched = counts.matched,
            unmatched = counts.unmatched,
            failed = counts.failed,
            total_fee = %run.total_fee,
            "calculation run complete"
        );

        Ok(CalculationOutcome {
            run,
            line_items,
            execution_logs,
        })
    }

    fn plan<'s>(
        &self,
        snapshot: &'s ContractSnapshot,
        ordered: &[&RoyaltyRule],
        warnings: &mut Vec<String>,
    ) -> Result<ErpPlan<'s>, RunError> {
        let mut plan = ErpPlan::manual(&snapshot.lookup_tables);
        if self.config.approach == CalculationApproach::Manual {
            return Ok(plan);
        }

        for rule in ordered
            .iter()
            .filter(|rule| rule.class() == RuleClass::FeeDetermining)
        {
            let rule_set = snapshot.linked_rule_set(&rule.id);
            if self.config.approach == CalculationApproach::Hybrid && rule_set.is_none() {
                continue;
            }

            let blueprint = BlueprintMaterializer::materialize(
                rule,
                &snapshot.field_mappings,
                snapshot.latest_blueprint(&rule.id),
            );

            if blueprint.is_fully_mapped() {
                plan.erp_rules.insert(rule.id.clone());
                if let Some(rule_set) = rule_set {
                    plan.rule_sets.insert(rule.id.clone(), rule_set);
                }
            } else {
                match self.config.incomplete_blueprint {
                    IncompleteBlueprintPolicy::Halt => {
                        return Err(RunError::MappingIncomplete {
                            rule: rule.id.clone(),
                            unmapped: blueprint.unmapped_fields.clone(),
                        });
                    }
                    IncompleteBlueprintPolicy::FallbackToManual => {
                        let message = format!(
                            "rule {} priced manually; unmapped ERP fields: {}",
                            rule.id,
                            blueprint.unmapped_fields.join(", ")
                        );
                        warn!(rule = %rule.id, "{message}");
                        warnings.push(message);
                    }
                }
            }
            plan.blueprints.insert(rule.id.clone(), blueprint);
        }

        Ok(plan)
    }

    fn price<'r>(
        &self,
        transaction: &SalesTransaction,
        primary: &'r RoyaltyRule,
        selection: &RuleSelection<'r>,
        plan: &ErpPlan<'_>,
        accumulator: &TierAccumulator,
    ) -> (Result<(Pricing<'r>, Vec<Update>), PricingFailure>, Option<ExecutionLog>) {
        let blueprint = plan.blueprint_for(primary);
        let path = if blueprint.is_some() {
            CalculationPath::ErpMapping
        } else {
            CalculationPath::Manual
        };
        let fail = |message: String| PricingFailure { path, message };
        let overflowed = || {
            fail(format!(
                "fee for transaction {} overflowed the decimal range",
                transaction.id
            ))
        };

        let mut components = Vec::new();
        let mut deducted = Decimal::ZERO;
        for rule in &selection.deductions {
            let rate = rule.base_rate.unwrap_or_default();
            let Some(amount) = transaction.gross_amount.checked_mul(rate) else {
                return (Err(overflowed()), None);
            };
            let Some(total) = deducted.checked_add(amount) else {
                return (Err(overflowed()), None);
            };
            deducted = total;
            components.push(FeeComponent {
                role: ComponentRole::Deduction,
                source: rule.id.0.clone(),
                rule_type: Some(rule.rule_type),
                basis: transaction.gross_amount,
                rate: Some(rate),
                tier: None,
                bands: Vec::new(),
                amount,
            });
        }
        let Some(net_amount) = transaction.gross_amount.checked_sub(deducted) else {
            return (Err(overflowed()), None);
        };

        let mut log = None;
        let charge = match (blueprint, plan.rule_sets.get(&primary.id)) {
            (Some(_), Some(rule_set)) => {
                let execution =
                    ErpMappingRuleExecutor::new(rule_set, plan.lookups).execute(transaction, accumulator);
                log = Some(execution.log);
                execution
                    .result
                    .map(|outcome| erp_charge(rule_set, outcome))
                    .map_err(|failure| failure.to_string())
            }
            (blueprint, _) => {
                let bound_basis = match blueprint.and_then(CalculationBlueprint::basis_field) {
                    Some(field) => match transaction.field(field).as_decimal() {
                        Some(value) => Some(value),
                        None => {
                            return (
                                Err(fail(format!("ERP basis field `{field}` is empty or not numeric"))),
                                None,
                            )
                        }
                    },
                    None => None,
                };
                let basis = match (primary.basis(), bound_basis) {
                    (TierBasis::Quantity, bound) => bound.unwrap_or(transaction.quantity),
                    (TierBasis::Amount, Some(gross)) => match gross.checked_sub(deducted) {
                        Some(basis) => basis,
                        None => return (Err(overflowed()), None),
                    },
                    (TierBasis::Amount, None) => net_amount,
                };
                self.manual_charge(transaction, primary, basis, net_amount, accumulator)
            }
        };

        let charge = match charge {
            Ok(charge) => charge,
            Err(message) => return (Err(fail(message)), log),
        };
        components.extend(charge.components);

        for rule in &selection.additive {
            match self.additive_component(transaction, rule, net_amount) {
                Ok(component) => components.push(component),
                Err(message) => return (Err(fail(message)), log),
            }
        }
        let counted = components
            .iter()
            .filter(|component| component.counts_toward_fee())
            .map(|component| component.amount);
        if checked_sum(counted).is_err() {
            return (Err(overflowed()), log);
        }

        let pricing = Pricing {
            path,
            rule: primary,
            net_amount,
            tier_applied: charge.tier,
            applied_rate: charge.rate,
            components,
        };
        (Ok((pricing, charge.updates)), log)
    }

    fn manual_charge(
        &self,
        transaction: &SalesTransaction,
        rule: &RoyaltyRule,
        basis: Decimal,
        net_amount: Decimal,
        accumulator: &TierAccumulator,
    ) -> Result<PrimaryCharge, String> {
        let rounding = self.config.rounding;
        let scale = self.config.scale;
        let mut charge = PrimaryCharge {
            components: Vec::new(),
            tier: None,
            rate: None,
            updates: Vec::new(),
        };
        let mut component = FeeComponent {
            role: ComponentRole::Primary,
            source: rule.id.0.clone(),
            rule_type: Some(rule.rule_type),
            basis,
            rate: None,
            tier: None,
            bands: Vec::new(),
            amount: Decimal::ZERO,
        };

        match rule.rule_type {
            RuleType::Percentage => {
                let rate = rule
                    .base_rate
                    .ok_or_else(|| format!("rule {} has no base rate", rule.id))?;
                component.rate = Some(rate);
                let fee = basis.checked_mul(rate).ok_or_else(|| overflow_message(rule))?;
                component.amount = rounding.apply(fee, scale);
            }
            RuleType::Tiered => {
                let table = rule
                    .volume_tiers
                    .as_ref()
                    .ok_or_else(|| format!("rule {} has no volume tiers", rule.id))?;
                match rule.tier_method {
                    TierMethod::Marginal => {
                        let marginal =
                            TierEvaluator::marginal(table, basis).map_err(|_| overflow_message(rule))?;
                        component.rate = Some(marginal.effective_rate(basis));
                        component.amount = rounding.apply(marginal.unrounded, scale);
                        component.tier = marginal.top_tier;
                        component.bands = marginal.bands;
                    }
                    TierMethod::Total => {
                        let key = format!("rule:{}:{}", rule.id, rule.grouping_key(transaction));
                        let blended = TierEvaluator::blended(
                            table,
                            accumulator.state(&key),
                            basis,
                            rounding,
                            scale,
                        )
                        .map_err(|_| overflow_message(rule))?;
                        component.rate = Some(blended.rate);
                        component.amount = blended.fee;
                        component.tier = blended.tier;
                        charge.updates.push((key, blended.next));
                    }
                }
            }
            RuleType::ContainerSizeTiered => {
                let size = transaction
                    .container_size
                    .as_deref()
                    .map(str::trim)
                    .filter(|size| !size.is_empty())
                    .ok_or_else(|| "transaction has no container size".to_string())?;
                let schedule = rule
                    .container_size_rates
                    .iter()
                    .find(|schedule| schedule.container_size.trim().eq_ignore_ascii_case(size))
                    .ok_or_else(|| format!("rule {} has no rate for container size `{size}`", rule.id))?;
                let key = format!("rule:{}:size:{}", rule.id, size.to_ascii_lowercase());
                let blended = TierEvaluator::container_size(
                    schedule,
                    accumulator.state(&key),
                    basis,
                    rounding,
                    scale,
                )
                .map_err(|_| overflow_message(rule))?;
                component.rate = Some(blended.rate);
                component.amount = blended.fee;
                component.tier = blended.tier;
                charge.updates.push((key, blended.next));
            }
            RuleType::Formula => {
                let expression = rule
                    .formula_definition
                    .as_ref()
                    .ok_or_else(|| format!("rule {} has no formula", rule.id))?;
                let resolver = |field: &str| match field {
                    "net_amount" => Some(net_amount),
                    "basis" => Some(basis),
                    other => transaction.field(other).as_decimal(),
                };
                let value = evaluate(expression, &resolver)
                    .map_err(|error| format!("formula for rule {} failed: {error}", rule.id))?;
                component.amount = rounding.apply(value, scale);
            }
            other => {
                return Err(format!(
                    "{} rules cannot set a transaction fee",
                    other.label()
                ));
            }
        }

        charge.tier = component.tier.clone();
        charge.rate = component.rate;
        charge.components.push(component);
        Ok(charge)
    }

    fn additive_component(
        &self,
        transaction: &SalesTransaction,
        rule: &RoyaltyRule,
        net_amount: Decimal,
    ) -> Result<FeeComponent, String> {
        let rate = rule
            .base_rate
            .ok_or_else(|| format!("rule {} has no base rate", rule.id))?;
        let basis = match rule.basis() {
            TierBasis::Quantity => transaction.quantity,
            TierBasis::Amount => net_amount,
        };
        let amount = basis.checked_mul(rate).ok_or_else(|| overflow_message(rule))?;
        Ok(FeeComponent {
            role: ComponentRole::Additive,
            source: rule.id.0.clone(),
            rule_type: Some(rule.rule_type),
            basis,
            rate: Some(rate),
            tier: None,
            bands: Vec::new(),
            amount: self.config.rounding.apply(amount, self.config.scale),
        })
    }

    /// Append fixed fee, cap and minimum-guarantee adjustments, in that order.
    #[allow(clippy::too_many_arguments)]
    fn settle_period(
        &self,
        ordered: &[&RoyaltyRule],
        period: &CalculationPeriod,
        settled: &SettledHistory,
        generator: &mut LineItemGenerator,
        quarter_totals: &mut BTreeMap<Quarter, Decimal>,
        calculated_fee: Decimal,
        line_items: &mut Vec<CalculationLineItem>,
        breakdown: &mut Vec<RuleBreakdown>,
    ) -> Result<Vec<MinimumGuaranteeOutcome>, RunError> {
        let label = format!("{}..{}", period.start, period.end);
        let closing_quarter = Quarter::containing(period.end);
        let mut running = calculated_fee;
        let mut outcomes = Vec::new();

        for rule in rules_of_type(ordered, RuleType::FixedFee) {
            let amount = self
                .config
                .rounding
                .apply(rule.amount.unwrap_or_default(), self.config.scale);
            running = running
                .checked_add(amount)
                .ok_or(RunError::Overflow("period fees"))?;
            add_to_quarter(quarter_totals, closing_quarter, amount)?;
            record_breakdown(breakdown, rule, None, amount)?;
            line_items.push(generator.adjustment(
                AdjustmentKind::FixedFee,
                rule,
                label.clone(),
                amount,
                "fixed fee for the period",
            ));
        }

        for rule in rules_of_type(ordered, RuleType::Cap) {
            let cap = rule.amount.unwrap_or_default();
            if running <= cap {
                continue;
            }
            let reduction = cap - running;
            running = cap;
            add_to_quarter(quarter_totals, closing_quarter, reduction)?;
            record_breakdown(breakdown, rule, None, reduction)?;
            line_items.push(generator.adjustment(
                AdjustmentKind::Cap,
                rule,
                label.clone(),
                reduction,
                format!("fees capped at {cap}"),
            ));
        }

        for rule in rules_of_type(ordered, RuleType::MinimumGuarantee) {
            let Some(schedule) = rule.minimum_guarantee.as_ref() else {
                continue;
            };
            let settlements =
                MinimumGuaranteeEnforcer::enforce(schedule, period, quarter_totals, settled)
                    .map_err(|_| RunError::Overflow("minimum guarantee totals"))?;
            for outcome in &settlements {
                if !outcome.minimum_guarantee_applied {
                    continue;
                }
                let quarter = match outcome.scope {
                    GuaranteeScope::Quarter { period: quarter } => quarter,
                    GuaranteeScope::Annual { .. } => closing_quarter,
                };
                add_to_quarter(quarter_totals, quarter, outcome.shortfall)?;
                running = running
                    .checked_add(outcome.shortfall)
                    .ok_or(RunError::Overflow("period fees"))?;
                record_breakdown(breakdown, rule, None, outcome.shortfall)?;
                line_items.push(generator.adjustment(
                    AdjustmentKind::MinimumGuarantee,
                    rule,
                    outcome.scope.label(),
                    outcome.shortfall,
                    format!(
                        "minimum guarantee of {} exceeds calculated {}",
                        outcome.minimum, outcome.calculated_total
                    ),
                ));
            }
            outcomes.extend(settlements);
        }

        Ok(outcomes)
    }
}

fn overflow_message(rule: &RoyaltyRule) -> String {
    format!("fee for rule {} overflowed the decimal range", rule.id)
}

fn add_to_quarter(
    totals: &mut BTreeMap<Quarter, Decimal>,
    quarter: Quarter,
    fee: Decimal,
) -> Result<(), RunError> {
    let total = totals.entry(quarter).or_default();
    *total = total
        .checked_add(fee)
        .ok_or(RunError::Overflow("quarterly fees"))?;
    Ok(())
}

fn erp_charge(rule_set: &ErpMappingRuleSet, outcome: ErpOutcome) -> PrimaryCharge {
    let single = outcome.charges.len() == 1;
    let tier = outcome.charges.iter().rev().find_map(|charge| charge.tier.clone());
    let rate = if single {
        outcome.charges.first().and_then(|charge| charge.rate)
    } else {
        None
    };
    let mut components: Vec<FeeComponent> = outcome
        .charges
        .into_iter()
        .map(|charge| FeeComponent {
            role: ComponentRole::Primary,
            source: format!("{}/{}/{}", rule_set.id, charge.rule_id, charge.output),
            rule_type: None,
            basis: charge.basis,
            rate: charge.rate,
            tier: charge.tier,
            bands: charge.bands,
            amount: charge.fee,
        })
        .collect();
    if components.is_empty() {
        components.push(FeeComponent {
            role: ComponentRole::Primary,
            source: rule_set.id.clone(),
            rule_type: None,
            basis: Decimal::ZERO,
            rate: None,
            tier: None,
            bands: Vec::new(),
            amount: Decimal::ZERO,
        });
    }
    PrimaryCharge {
        components,
        tier,
        rate,
        updates: outcome.updates,
    }
}

fn rules_of_type<'a>(
    ordered: &'a [&'a RoyaltyRule],
    rule_type: RuleType,
) -> impl Iterator<Item = &'a RoyaltyRule> + 'a {
    ordered
        .iter()
        .copied()
        .filter(move |rule| rule.rule_type == rule_type)
}

fn record_breakdown(
    breakdown: &mut Vec<RuleBreakdown>,
    rule: &RoyaltyRule,
    path: Option<CalculationPath>,
    fee: Decimal,
) -> Result<(), RunError> {
    match breakdown.iter_mut().find(|entry| entry.rule_id == rule.id) {
        Some(entry) => {
            entry.line_items += 1;
            entry.total_fee = entry
                .total_fee
                .checked_add(fee)
                .ok_or(RunError::Overflow("rule totals"))?;
        }
        None => breakdown.push(RuleBreakdown {
            rule_id: rule.id.clone(),
            rule_name: rule.rule_name.clone(),
            rule_type: rule.rule_type,
            path,
            line_items: 1,
            total_fee: fee,
        }),
    }
    Ok(())
}
