use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use royalty_engine::calculation::{
    CalculationPeriod, CalculationRun, ContractId, ContractSnapshot, ContractSource,
    RepositoryError, RunId, RunRecord, RunRepository, RunStatus, SalesTransaction,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Clone)]
struct ContractData {
    snapshot: ContractSnapshot,
    transactions: Vec<SalesTransaction>,
}

/// Contract snapshots and sales loaded through the API or the CLI.
#[derive(Default, Clone)]
pub(crate) struct InMemoryContractSource {
    contracts: Arc<Mutex<HashMap<ContractId, ContractData>>>,
}

impl InMemoryContractSource {
    /// Replace the contract's snapshot and sales data.
    pub(crate) fn load(&self, snapshot: ContractSnapshot, transactions: Vec<SalesTransaction>) {
        let mut guard = self.contracts.lock().expect("contract mutex poisoned");
        guard.insert(
            snapshot.contract_id.clone(),
            ContractData {
                snapshot,
                transactions,
            },
        );
    }
}

impl ContractSource for InMemoryContractSource {
    fn snapshot(&self, contract_id: &ContractId) -> Result<Option<ContractSnapshot>, RepositoryError> {
        let guard = self.contracts.lock().expect("contract mutex poisoned");
        Ok(guard.get(contract_id).map(|data| data.snapshot.clone()))
    }

    fn transactions(
        &self,
        contract_id: &ContractId,
        period: &CalculationPeriod,
    ) -> Result<Vec<SalesTransaction>, RepositoryError> {
        let guard = self.contracts.lock().expect("contract mutex poisoned");
        Ok(guard
            .get(contract_id)
            .map(|data| {
                data.transactions
                    .iter()
                    .filter(|transaction| period.contains(transaction.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryRunRepository {
    records: Arc<Mutex<HashMap<RunId, RunRecord>>>,
}

impl RunRepository for InMemoryRunRepository {
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
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
