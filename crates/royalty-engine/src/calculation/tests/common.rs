use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::calculation::blueprint::{FieldMapping, MappingStatus};
use crate::calculation::domain::{
    CalculationPeriod, ContractId, Dimension, RunId, SalesTransaction, TransactionId,
};
use crate::calculation::engine::{CalculationEngine, ContractSnapshot, RunRequest};
use crate::calculation::minimum::{MinimumGuarantee, SettledHistory};
use crate::calculation::repository::{ContractSource, RepositoryError, RunRecord, RunRepository};
use crate::calculation::rules::fixtures::rule;
use crate::calculation::rules::{Criterion, MatchCriteria, RoyaltyRule, RuleType, TierGrouping};
use crate::calculation::run::{CalculationRun, RunStatus};
use crate::calculation::service::CalculationService;
use crate::calculation::tiers::{ContainerSizeRate, TierBasis, TierMethod, TierTable, VolumeTier};
use crate::config::CalculationConfig;

pub(super) const CONTRACT: &str = "contract-1";

pub(super) fn d(raw: &str) -> Decimal {
    raw.parse().expect("valid decimal")
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn q1() -> CalculationPeriod {
    CalculationPeriod {
        start: date(2025, 1, 1),
        end: date(2025, 3, 31),
    }
}

pub(super) fn full_year() -> CalculationPeriod {
    CalculationPeriod {
        start: date(2025, 1, 1),
        end: date(2025, 12, 31),
    }
}

pub(super) fn request(period: CalculationPeriod) -> RunRequest {
    RunRequest {
        run_id: RunId("calc-test".to_string()),
        period,
        requested_at: Utc
            .with_ymd_and_hms(2025, 4, 2, 9, 30, 0)
            .single()
            .expect("valid timestamp"),
        settled: SettledHistory::default(),
    }
}

pub(super) fn engine() -> CalculationEngine {
    CalculationEngine::new(CalculationConfig::default())
}

pub(super) fn sale(id: &str, on: NaiveDate, quantity: &str, amount: &str) -> SalesTransaction {
    SalesTransaction {
        id: TransactionId(id.to_string()),
        date: on,
        product: Some("Blue Fescue".to_string()),
        category: Some("Grasses".to_string()),
        territory: Some("US".to_string()),
        container_size: None,
        vendor: None,
        quantity: d(quantity),
        gross_amount: d(amount),
        custom_fields: BTreeMap::new(),
    }
}

pub(super) fn tiers(bands: &[(&str, Option<&str>, &str)]) -> TierTable {
    TierTable::new(
        bands
            .iter()
            .map(|(min, max, rate)| VolumeTier {
                min: d(min),
                max: max.map(d),
                rate: d(rate),
            })
            .collect(),
    )
    .expect("valid tier table")
}

pub(super) fn percentage_rule(id: &str, priority: i32, rate: &str) -> RoyaltyRule {
    let mut percentage = rule(id, RuleType::Percentage, priority);
    percentage.base_rate = Some(d(rate));
    percentage
}

pub(super) fn rated_rule(id: &str, rule_type: RuleType, priority: i32, rate: &str) -> RoyaltyRule {
    let mut rated = rule(id, rule_type, priority);
    rated.base_rate = Some(d(rate));
    rated
}

pub(super) fn flat_rule(id: &str, rule_type: RuleType, amount: &str) -> RoyaltyRule {
    let mut flat = rule(id, rule_type, 50);
    flat.amount = Some(d(amount));
    flat
}

pub(super) fn scoped(mut scoped: RoyaltyRule, dimension: Dimension, values: &[&str]) -> RoyaltyRule {
    scoped.criteria.push(Criterion::new(
        dimension,
        MatchCriteria::one_of(values.iter().copied()),
    ));
    scoped
}

/// Quarterly purchase rebate charged on the whole cumulative amount.
pub(super) fn rebate_rule() -> RoyaltyRule {
    let mut rebate = rule("rebate", RuleType::Tiered, 1);
    rebate.tier_basis = TierBasis::Amount;
    rebate.tier_method = TierMethod::Total;
    rebate.tier_grouping = TierGrouping::Contract;
    rebate.volume_tiers = Some(tiers(&[
        ("0", Some("999999"), "0"),
        ("1000000", Some("2499999"), "0.02"),
        ("2500000", None, "0.04"),
    ]));
    rebate
}

pub(super) fn marginal_unit_rule() -> RoyaltyRule {
    let mut marginal = rule("units", RuleType::Tiered, 1);
    marginal.tier_basis = TierBasis::Quantity;
    marginal.tier_method = TierMethod::Marginal;
    marginal.volume_tiers = Some(tiers(&[
        ("0", Some("4999"), "1.25"),
        ("5000", Some("14999"), "1.10"),
        ("15000", None, "0.95"),
    ]));
    marginal
}

pub(super) fn container_rule() -> RoyaltyRule {
    let mut container = rule("containers", RuleType::ContainerSizeTiered, 1);
    container.container_size_rates = vec![ContainerSizeRate {
        container_size: "1-gallon".to_string(),
        base_rate: d("1.25"),
        volume_threshold: d("5000"),
        discounted_rate: d("1.10"),
    }];
    container
}

pub(super) fn minimum_rule(schedule: MinimumGuarantee) -> RoyaltyRule {
    let mut minimum = rule("minimum", RuleType::MinimumGuarantee, 90);
    minimum.minimum_guarantee = Some(schedule);
    minimum
}

pub(super) fn mapping(source: &str, target: &str, status: MappingStatus) -> FieldMapping {
    FieldMapping {
        source_field: source.to_string(),
        target_field: target.to_string(),
        confidence: 0.9,
        status,
    }
}

pub(super) fn snapshot(rules: Vec<RoyaltyRule>) -> ContractSnapshot {
    ContractSnapshot {
        contract_id: ContractId(CONTRACT.to_string()),
        vendor: Some("Green Acres Nursery".to_string()),
        rules,
        erp_rule_sets: Vec::new(),
        field_mappings: Vec::new(),
        lookup_tables: BTreeMap::new(),
        blueprints: Vec::new(),
    }
}

/// Q1 sales priced at 10% of gross: 1,000 + 2,500 = 350.00 in fees.
pub(super) fn seeded_source() -> MemorySource {
    let source = MemorySource::default();
    source.load(
        snapshot(vec![percentage_rule("royalty", 1, "0.10")]),
        vec![
            sale("t-1", date(2025, 1, 15), "10", "1000"),
            sale("t-2", date(2025, 2, 20), "25", "2500"),
        ],
    );
    source
}

pub(super) fn build_service() -> (
    CalculationService<MemorySource, MemoryRuns>,
    Arc<MemorySource>,
    Arc<MemoryRuns>,
) {
    let source = Arc::new(seeded_source());
    let runs = Arc::new(MemoryRuns::default());
    let service =
        CalculationService::new(source.clone(), runs.clone(), CalculationConfig::default());
    (service, source, runs)
}

#[derive(Default, Clone)]
pub(super) struct MemorySource {
    snapshots: Arc<Mutex<HashMap<ContractId, ContractSnapshot>>>,
    transactions: Arc<Mutex<HashMap<ContractId, Vec<SalesTransaction>>>>,
}

impl MemorySource {
    pub(super) fn load(&self, snapshot: ContractSnapshot, transactions: Vec<SalesTransaction>) {
        let id = snapshot.contract_id.clone();
        self.snapshots
            .lock()
            .expect("source mutex poisoned")
            .insert(id.clone(), snapshot);
        self.transactions
            .lock()
            .expect("source mutex poisoned")
            .insert(id, transactions);
    }
}

impl ContractSource for MemorySource {
    fn snapshot(&self, contract_id: &ContractId) -> Result<Option<ContractSnapshot>, RepositoryError> {
        let guard = self.snapshots.lock().expect("source mutex poisoned");
        Ok(guard.get(contract_id).cloned())
    }

    fn transactions(
        &self,
        contract_id: &ContractId,
        period: &CalculationPeriod,
    ) -> Result<Vec<SalesTransaction>, RepositoryError> {
        let guard = self.transactions.lock().expect("source mutex poisoned");
        Ok(guard
            .get(contract_id)
            .map(|transactions| {
                transactions
                    .iter()
                    .filter(|transaction| period.contains(transaction.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryRuns {
    pub(super) records: Arc<Mutex<HashMap<RunId, RunRecord>>>,
}

impl RunRepository for MemoryRuns {
    fn insert(&self, record: RunRecord) -> Result<RunRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.run.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.run.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &RunId) -> Result<Option<RunRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn transition(
        &self,
        id: &RunId,
        expected: RunStatus,
        run: CalculationRun,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        let record = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if record.run.status != expected {
            return Err(RepositoryError::StaleStatus {
                expected,
                actual: record.run.status,
            });
        }
        record.run = run;
        Ok(())
    }

    fn list(&self, contract_id: &ContractId) -> Result<Vec<CalculationRun>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut runs: Vec<CalculationRun> = guard
            .values()
            .filter(|record| &record.run.contract_id == contract_id)
            .map(|record| record.run.clone())
            .collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(runs)
    }
}

pub(super) struct UnavailableRuns;

impl RunRepository for UnavailableRuns {
    fn insert(&self, _record: RunRecord) -> Result<RunRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &RunId) -> Result<Option<RunRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn transition(
        &self,
        _id: &RunId,
        _expected: RunStatus,
        _run: CalculationRun,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _contract_id: &ContractId) -> Result<Vec<CalculationRun>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
