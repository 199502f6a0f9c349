use std::collections::BTreeMap;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::conditions::evaluate_chain;
use super::{ErpMappingOutput, ErpMappingRule, ErpMappingRuleSet, OutputCalculation, Transformation};
use crate::calculation::domain::{
    checked_sum, ArithmeticOverflow, FieldValue, SalesTransaction, TransactionId,
};
use crate::calculation::formula::{evaluate, Expr, FormulaError};
use crate::calculation::tiers::{
    BandCharge, CumulativeState, TierAccumulator, TierEvaluator, TierMethod,
};

/// Named lookup tables: table name to (ERP value to mapped value).
pub type LookupTables = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    NoRuleApplied,
    Failed,
}

/// Audit record of one rule set execution against one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub transaction_id: TransactionId,
    pub rule_set_id: String,
    pub input: BTreeMap<String, FieldValue>,
    pub output: BTreeMap<String, FieldValue>,
    pub rules_applied: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_micros: u64,
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

/// Fee produced by one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCharge {
    pub rule_id: String,
    pub output: String,
    pub basis: Decimal,
    pub rate: Option<Decimal>,
    pub tier: Option<String>,
    pub bands: Vec<BandCharge>,
    pub fee: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErpOutcome {
    pub fee: Decimal,
    pub charges: Vec<OutputCharge>,
    pub resolved: BTreeMap<String, FieldValue>,
    pub rules_applied: Vec<String>,
    /// Blended state to commit once the whole transaction has been priced.
    pub updates: Vec<(String, CumulativeState)>,
}

impl ErpOutcome {
    pub fn applied(&self) -> bool {
        !self.rules_applied.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleExecutionFailure {
    #[error("mapping rule `{rule}` failed: {source}")]
    Formula {
        rule: String,
        #[source]
        source: FormulaError,
    },
    #[error("output `{output}` of mapping rule `{rule}` needs a number in `{field}`")]
    NonNumeric {
        rule: String,
        output: String,
        field: String,
    },
    #[error("output `{output}` of mapping rule `{rule}` overflowed the decimal range")]
    Overflow { rule: String, output: String },
}

#[derive(Debug, Clone)]
pub struct ErpExecution {
    pub result: Result<ErpOutcome, RuleExecutionFailure>,
    pub log: ExecutionLog,
}

/// Field values seen while executing one transaction.
struct Scratch<'t> {
    transaction: &'t SalesTransaction,
    resolved: BTreeMap<String, FieldValue>,
    input: BTreeMap<String, FieldValue>,
    warnings: Vec<String>,
}

impl<'t> Scratch<'t> {
    fn new(transaction: &'t SalesTransaction) -> Self {
        Self {
            transaction,
            resolved: BTreeMap::new(),
            input: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Resolved target fields shadow transaction fields.
    fn peek(&self, field: &str) -> FieldValue {
        match self.resolved.get(field) {
            Some(value) => value.clone(),
            None => self.transaction.field(field),
        }
    }

    fn read(&mut self, field: &str) -> FieldValue {
        let value = self.peek(field);
        if !self.resolved.contains_key(field) {
            self.input
                .entry(field.to_string())
                .or_insert_with(|| value.clone());
        }
        value
    }

    fn evaluate(&mut self, rule: &ErpMappingRule, expr: &Expr) -> Result<Decimal, RuleExecutionFailure> {
        for field in expr.referenced_fields() {
            self.read(field);
        }
        let resolver = |field: &str| self.peek(field).as_decimal();
        evaluate(expr, &resolver).map_err(|source| RuleExecutionFailure::Formula {
            rule: rule.id.clone(),
            source,
        })
    }

    fn warn(&mut self, message: String) {
        warn!(transaction = %self.transaction.id, "{message}");
        self.warnings.push(message);
    }
}

pub struct ErpMappingRuleExecutor<'a> {
    rule_set: &'a ErpMappingRuleSet,
    lookups: &'a LookupTables,
}

impl<'a> ErpMappingRuleExecutor<'a> {
    pub fn new(rule_set: &'a ErpMappingRuleSet, lookups: &'a LookupTables) -> Self {
        Self { rule_set, lookups }
    }

    pub fn rule_set(&self) -> &ErpMappingRuleSet {
        self.rule_set
    }

    /// Run every applicable mapping rule against one transaction.
    ///
    /// Rules run in ascending priority and each sees the target fields
    /// resolved by the rules before it. The accumulator is read but never
    /// written; blended updates are returned for the caller to commit.
    pub fn execute(
        &self,
        transaction: &SalesTransaction,
        accumulator: &TierAccumulator,
    ) -> ErpExecution {
        let started = Instant::now();
        let mut scratch = Scratch::new(transaction);
        let result = self.run(&mut scratch, accumulator);
        let duration_micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

        let mut output = scratch.resolved.clone();
        let (status, error, rules_applied) = match &result {
            Ok(outcome) => {
                output.insert("fee".to_string(), FieldValue::Number(outcome.fee));
                let status = if outcome.applied() {
                    ExecutionStatus::Success
                } else {
                    ExecutionStatus::NoRuleApplied
                };
                (status, None, outcome.rules_applied.clone())
            }
            Err(failure) => (ExecutionStatus::Failed, Some(failure.to_string()), Vec::new()),
        };

        debug!(
            rule_set = %self.rule_set.id,
            transaction = %transaction.id,
            ?status,
            duration_micros,
            "executed erp mapping rule set"
        );

        ErpExecution {
            result,
            log: ExecutionLog {
                transaction_id: transaction.id.clone(),
                rule_set_id: self.rule_set.id.clone(),
                input: scratch.input,
                output,
                rules_applied,
                warnings: scratch.warnings,
                duration_micros,
                status,
                error,
            },
        }
    }

    fn run(
        &self,
        scratch: &mut Scratch<'_>,
        accumulator: &TierAccumulator,
    ) -> Result<ErpOutcome, RuleExecutionFailure> {
        let mut rules_applied = Vec::new();
        let mut charges = Vec::new();
        let mut updates: Vec<(String, CumulativeState)> = Vec::new();

        for rule in self.rule_set.ordered_rules() {
            if !evaluate_chain(&rule.conditions, |field| scratch.read(field)) {
                continue;
            }
            let value = self.transform(rule, scratch)?;
            scratch.resolved.insert(rule.target_field.clone(), value);
            rules_applied.push(rule.id.clone());

            for output in &rule.outputs {
                if let Some(charge) =
                    self.charge(rule, output, scratch, accumulator, &mut updates)?
                {
                    charges.push(charge);
                }
            }
        }

        let fee = checked_sum(charges.iter().map(|charge| charge.fee)).map_err(|_| {
            RuleExecutionFailure::Overflow {
                rule: self.rule_set.id.clone(),
                output: "total".to_string(),
            }
        })?;
        Ok(ErpOutcome {
            fee,
            charges,
            resolved: scratch.resolved.clone(),
            rules_applied,
            updates,
        })
    }

    fn transform(
        &self,
        rule: &ErpMappingRule,
        scratch: &mut Scratch<'_>,
    ) -> Result<FieldValue, RuleExecutionFailure> {
        match &rule.transformation {
            Transformation::Direct => Ok(scratch.read(&rule.source_field)),
            Transformation::Lookup { table } => {
                let key = scratch.read(&rule.source_field);
                let Some(key) = key.as_text() else {
                    return Ok(FieldValue::Null);
                };
                match self.lookup(table, &key) {
                    Some(mapped) => Ok(FieldValue::Text(mapped.to_string())),
                    None => {
                        scratch.warn(format!(
                            "lookup `{table}` has no entry for `{key}` (rule `{}`)",
                            rule.id
                        ));
                        Ok(FieldValue::Null)
                    }
                }
            }
            Transformation::Formula { expression } => {
                scratch.evaluate(rule, expression).map(FieldValue::Number)
            }
            Transformation::Conditional { branches, otherwise } => {
                for branch in branches {
                    if evaluate_chain(&branch.conditions, |field| scratch.read(field)) {
                        return scratch
                            .evaluate(rule, &branch.expression)
                            .map(FieldValue::Number);
                    }
                }
                match otherwise {
                    Some(expression) => scratch.evaluate(rule, expression).map(FieldValue::Number),
                    None => Ok(FieldValue::Null),
                }
            }
        }
    }

    /// Exact key first, then a case-insensitive match.
    fn lookup(&self, table: &str, key: &str) -> Option<&'a str> {
        let entries = self.lookups.get(table)?;
        let key = key.trim();
        entries
            .get(key)
            .or_else(|| {
                entries
                    .iter()
                    .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    fn charge(
        &self,
        rule: &ErpMappingRule,
        output: &ErpMappingOutput,
        scratch: &mut Scratch<'_>,
        accumulator: &TierAccumulator,
        updates: &mut Vec<(String, CumulativeState)>,
    ) -> Result<Option<OutputCharge>, RuleExecutionFailure> {
        let field = output
            .source_field
            .as_deref()
            .unwrap_or(rule.target_field.as_str());
        let mut charge = OutputCharge {
            rule_id: rule.id.clone(),
            output: output.name.clone(),
            basis: Decimal::ZERO,
            rate: None,
            tier: None,
            bands: Vec::new(),
            fee: Decimal::ZERO,
        };

        if let OutputCalculation::Fixed { amount } = &output.calculation {
            charge.fee = output.rounding.apply(*amount, output.scale);
            return Ok(Some(charge));
        }
        if let OutputCalculation::Formula { expression } = &output.calculation {
            let value = scratch.evaluate(rule, expression)?;
            charge.fee = output.rounding.apply(value, output.scale);
            return Ok(Some(charge));
        }

        let value = scratch.read(field);
        if value.is_null() {
            scratch.warn(format!(
                "output `{}` of rule `{}` skipped: `{field}` is empty",
                output.name, rule.id
            ));
            return Ok(None);
        }
        let basis = value
            .as_decimal()
            .ok_or_else(|| RuleExecutionFailure::NonNumeric {
                rule: rule.id.clone(),
                output: output.name.clone(),
                field: field.to_string(),
            })?;
        charge.basis = basis;
        let overflow = |_: ArithmeticOverflow| RuleExecutionFailure::Overflow {
            rule: rule.id.clone(),
            output: output.name.clone(),
        };

        match &output.calculation {
            OutputCalculation::Percentage { rate } => {
                charge.rate = Some(*rate);
                let fee = basis.checked_mul(*rate).ok_or(ArithmeticOverflow).map_err(overflow)?;
                charge.fee = output.rounding.apply(fee, output.scale);
            }
            OutputCalculation::Tiered {
                tiers,
                method: TierMethod::Marginal,
            } => {
                let marginal = TierEvaluator::marginal(tiers, basis).map_err(overflow)?;
                charge.rate = Some(marginal.effective_rate(basis));
                charge.fee = output.rounding.apply(marginal.unrounded, output.scale);
                charge.tier = marginal.top_tier;
                charge.bands = marginal.bands;
            }
            OutputCalculation::Tiered {
                tiers,
                method: TierMethod::Total,
            } => {
                let key = format!("erp:{}:{}:{}", self.rule_set.id, rule.id, output.name);
                let state = updates
                    .iter()
                    .rev()
                    .find(|(staged, _)| staged == &key)
                    .map(|(_, state)| *state)
                    .unwrap_or_else(|| accumulator.state(&key));
                let blended =
                    TierEvaluator::blended(tiers, state, basis, output.rounding, output.scale)
                        .map_err(overflow)?;
                charge.rate = Some(blended.rate);
                charge.fee = blended.fee;
                charge.tier = blended.tier;
                updates.push((key, blended.next));
            }
            OutputCalculation::Fixed { .. } | OutputCalculation::Formula { .. } => {}
        }

        Ok(Some(charge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculation::domain::ContractId;
    use crate::calculation::erp::{
        ConditionOperator, ConditionalBranch, ErpMappingCondition, LogicOperator,
    };
    use crate::calculation::formula::BinaryOperator;
    use crate::calculation::tiers::{RoundingMode, TierTable, VolumeTier};
    use chrono::NaiveDate;

    fn d(raw: &str) -> Decimal {
        raw.parse().expect("valid decimal")
    }

    fn transaction(id: &str, fields: &[(&str, &str)]) -> SalesTransaction {
        SalesTransaction {
            id: TransactionId(id.to_string()),
            date: NaiveDate::from_ymd_opt(2025, 5, 1).expect("valid date"),
            product: None,
            category: None,
            territory: None,
            container_size: None,
            vendor: None,
            quantity: Decimal::ZERO,
            gross_amount: Decimal::ZERO,
            custom_fields: fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    fn output(name: &str, source: Option<&str>, calculation: OutputCalculation) -> ErpMappingOutput {
        ErpMappingOutput {
            name: name.to_string(),
            source_field: source.map(str::to_string),
            calculation,
            rounding: RoundingMode::HalfUp,
            scale: 2,
        }
    }

    fn mapping_rule(id: &str, priority: i32, source: &str, target: &str) -> ErpMappingRule {
        ErpMappingRule {
            id: id.to_string(),
            name: id.to_string(),
            priority,
            source_field: source.to_string(),
            target_field: target.to_string(),
            transformation: Transformation::Direct,
            conditions: Vec::new(),
            outputs: Vec::new(),
            is_active: true,
        }
    }

    fn rule_set(rules: Vec<ErpMappingRule>) -> ErpMappingRuleSet {
        ErpMappingRuleSet {
            id: "set-1".to_string(),
            contract_id: ContractId("contract-1".to_string()),
            royalty_rule_id: None,
            name: "ERP royalty".to_string(),
            is_active: true,
            rules,
        }
    }

    fn rate_tables() -> LookupTables {
        BTreeMap::from([(
            "class_rates".to_string(),
            BTreeMap::from([
                ("GR".to_string(), "0.05".to_string()),
                ("SH".to_string(), "0.03".to_string()),
            ]),
        )])
    }

    #[test]
    fn later_rules_see_resolved_targets() {
        let mut rate = mapping_rule("rate", 1, "ITEM_CLASS", "royalty_rate");
        rate.transformation = Transformation::Lookup {
            table: "class_rates".to_string(),
        };
        let mut fee = mapping_rule("fee", 2, "EXT_AMT", "net_sales");
        fee.outputs = vec![output(
            "royalty",
            None,
            OutputCalculation::Formula {
                expression: Expr::binary(
                    BinaryOperator::Multiply,
                    Expr::field("net_sales"),
                    Expr::field("royalty_rate"),
                ),
            },
        )];
        let set = rule_set(vec![fee, rate]);
        let tables = rate_tables();
        let executor = ErpMappingRuleExecutor::new(&set, &tables);

        let execution = executor.execute(
            &transaction("t-1", &[("ITEM_CLASS", "gr"), ("EXT_AMT", "1,234.50")]),
            &TierAccumulator::default(),
        );
        let outcome = execution.result.expect("execution succeeds");
        assert_eq!(outcome.fee, d("61.73"));
        assert_eq!(outcome.rules_applied, vec!["rate", "fee"]);
        assert_eq!(execution.log.status, ExecutionStatus::Success);
        assert!(execution.log.input.contains_key("ITEM_CLASS"));
        assert_eq!(
            execution.log.output.get("fee"),
            Some(&FieldValue::Number(d("61.73")))
        );
    }

    #[test]
    fn lookup_miss_resolves_to_null_with_warning() {
        let mut rate = mapping_rule("rate", 1, "ITEM_CLASS", "royalty_rate");
        rate.transformation = Transformation::Lookup {
            table: "class_rates".to_string(),
        };
        rate.outputs = vec![output(
            "royalty",
            None,
            OutputCalculation::Percentage { rate: d("1") },
        )];
        let set = rule_set(vec![rate]);
        let tables = rate_tables();
        let execution = ErpMappingRuleExecutor::new(&set, &tables)
            .execute(&transaction("t-2", &[("ITEM_CLASS", "TR")]), &TierAccumulator::default());

        let outcome = execution.result.expect("miss is not a failure");
        assert_eq!(outcome.resolved.get("royalty_rate"), Some(&FieldValue::Null));
        assert_eq!(outcome.fee, Decimal::ZERO);
        assert_eq!(execution.log.warnings.len(), 2);
    }

    #[test]
    fn conditional_picks_first_passing_branch() {
        let mut rate = mapping_rule("rate", 1, "REGION", "rate");
        rate.transformation = Transformation::Conditional {
            branches: vec![ConditionalBranch {
                conditions: vec![ErpMappingCondition {
                    field: "REGION".to_string(),
                    operator: ConditionOperator::Equals,
                    value: "EU".to_string(),
                    logic_operator: LogicOperator::And,
                }],
                expression: Expr::literal(d("0.07")),
            }],
            otherwise: Some(Expr::literal(d("0.04"))),
        };
        rate.outputs = vec![output(
            "royalty",
            Some("rate"),
            OutputCalculation::Formula {
                expression: Expr::binary(
                    BinaryOperator::Multiply,
                    Expr::field("rate"),
                    Expr::field("NET"),
                ),
            },
        )];
        let set = rule_set(vec![rate]);
        let tables = LookupTables::new();
        let executor = ErpMappingRuleExecutor::new(&set, &tables);
        let accumulator = TierAccumulator::default();

        let eu = executor.execute(&transaction("t-3", &[("REGION", "eu"), ("NET", "100")]), &accumulator);
        let us = executor.execute(&transaction("t-4", &[("REGION", "US"), ("NET", "100")]), &accumulator);
        assert_eq!(eu.result.expect("eu").fee, d("7.00"));
        assert_eq!(us.result.expect("us").fee, d("4.00"));
    }

    #[test]
    fn blended_outputs_stage_updates_without_mutating_state() {
        let table = TierTable::new(vec![
            VolumeTier {
                min: d("0"),
                max: Some(d("100")),
                rate: d("0.10"),
            },
            VolumeTier {
                min: d("100"),
                max: None,
                rate: d("0.20"),
            },
        ])
        .expect("valid table");
        let mut units = mapping_rule("units", 1, "QTY", "units");
        units.outputs = vec![output(
            "volume",
            None,
            OutputCalculation::Tiered {
                tiers: table,
                method: TierMethod::Total,
            },
        )];
        let set = rule_set(vec![units]);
        let tables = LookupTables::new();
        let executor = ErpMappingRuleExecutor::new(&set, &tables);
        let mut accumulator = TierAccumulator::default();

        let first = executor
            .execute(&transaction("t-5", &[("QTY", "80")]), &accumulator)
            .result
            .expect("first");
        assert_eq!(first.fee, d("8.00"));
        assert!(accumulator.is_empty());
        accumulator.commit(first.updates);

        let second = executor
            .execute(&transaction("t-6", &[("QTY", "40")]), &accumulator)
            .result
            .expect("second");
        // 120 * 0.20 = 24.00 for the group, 8.00 already charged.
        assert_eq!(second.fee, d("16.00"));
    }

    #[test]
    fn non_numeric_basis_fails_the_transaction() {
        let mut units = mapping_rule("units", 1, "QTY", "units");
        units.outputs = vec![output(
            "royalty",
            None,
            OutputCalculation::Percentage { rate: d("0.1") },
        )];
        let set = rule_set(vec![units]);
        let tables = LookupTables::new();
        let execution = ErpMappingRuleExecutor::new(&set, &tables)
            .execute(&transaction("t-7", &[("QTY", "twelve")]), &TierAccumulator::default());

        assert!(matches!(
            execution.result,
            Err(RuleExecutionFailure::NonNumeric { .. })
        ));
        assert_eq!(execution.log.status, ExecutionStatus::Failed);
        assert!(execution.log.error.is_some());
    }

    #[test]
    fn oversized_basis_fails_instead_of_overflowing() {
        let mut fee = mapping_rule("fee", 1, "EXT_AMT", "net_sales");
        fee.outputs = vec![output(
            "royalty",
            None,
            OutputCalculation::Percentage { rate: d("2") },
        )];
        let set = rule_set(vec![fee]);
        let tables = LookupTables::new();
        let execution = ErpMappingRuleExecutor::new(&set, &tables).execute(
            &transaction("t-9", &[("EXT_AMT", "70000000000000000000000000000")]),
            &TierAccumulator::default(),
        );

        assert!(matches!(
            execution.result,
            Err(RuleExecutionFailure::Overflow { .. })
        ));
        assert_eq!(execution.log.status, ExecutionStatus::Failed);
    }

    #[test]
    fn nothing_applied_when_conditions_fail() {
        let mut units = mapping_rule("units", 1, "QTY", "units");
        units.conditions = vec![ErpMappingCondition {
            field: "QTY".to_string(),
            operator: ConditionOperator::GreaterThan,
            value: "100".to_string(),
            logic_operator: LogicOperator::And,
        }];
        let set = rule_set(vec![units]);
        let tables = LookupTables::new();
        let execution = ErpMappingRuleExecutor::new(&set, &tables)
            .execute(&transaction("t-8", &[("QTY", "5")]), &TierAccumulator::default());

        assert_eq!(execution.log.status, ExecutionStatus::NoRuleApplied);
        assert!(!execution.result.expect("no failure").applied());
    }
}
