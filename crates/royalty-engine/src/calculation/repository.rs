use serde::{Deserialize, Serialize};

use super::domain::{CalculationPeriod, ContractId, RunId, SalesTransaction};
use super::engine::{CalculationOutcome, ContractSnapshot};
use super::erp::ExecutionLog;
use super::line_item::CalculationLineItem;
use super::run::{CalculationRun, RunStatus};

/// A run with its line items and ERP execution logs, stored as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: CalculationRun,
    pub line_items: Vec<CalculationLineItem>,
    pub execution_logs: Vec<ExecutionLog>,
}

impl RunRecord {
    pub fn failed(run: CalculationRun) -> Self {
        Self {
            run,
            line_items: Vec::new(),
            execution_logs: Vec::new(),
        }
    }
}

impl From<CalculationOutcome> for RunRecord {
    fn from(outcome: CalculationOutcome) -> Self {
        Self {
            run: outcome.run,
            line_items: outcome.line_items,
            execution_logs: outcome.execution_logs,
        }
    }
}

/// Source of contract snapshots and sales data, owned by the surrounding system.
pub trait ContractSource: Send + Sync {
    fn snapshot(&self, contract_id: &ContractId) -> Result<Option<ContractSnapshot>, RepositoryError>;
    fn transactions(
        &self,
        contract_id: &ContractId,
        period: &CalculationPeriod,
    ) -> Result<Vec<SalesTransaction>, RepositoryError>;
}

/// Storage abstraction for calculation runs.
pub trait RunRepository: Send + Sync {
    /// Store a run with all of its line items and logs, or nothing.
    fn insert(&self, record: RunRecord) -> Result<RunRecord, RepositoryError>;
    fn fetch(&self, id: &RunId) -> Result<Option<RunRecord>, RepositoryError>;
    /// Replace the stored run only if its status is still `expected`.
    fn transition(
        &self,
        id: &RunId,
        expected: RunStatus,
        run: CalculationRun,
    ) -> Result<(), RepositoryError>;
    fn list(&self, contract_id: &ContractId) -> Result<Vec<CalculationRun>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("run status changed concurrently (expected {expected}, found {actual})")]
    StaleStatus {
        expected: RunStatus,
        actual: RunStatus,
    },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
