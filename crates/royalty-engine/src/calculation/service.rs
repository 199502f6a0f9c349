use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::aggregation::{AggregationDimension, AggregationReport, AggregationReporter};
use super::domain::{CalculationPeriod, ContractId, RunId, SalesTransaction};
use super::engine::{CalculationEngine, CalculationOutcome, RunError, RunRequest};
use super::erp::ExecutionLog;
use super::line_item::CalculationLineItem;
use super::minimum::SettledHistory;
use super::repository::{ContractSource, RepositoryError, RunRecord, RunRepository};
use super::run::{CalculationRun, RunStatus, TransitionError};
use crate::config::CalculationConfig;

/// Service composing the contract source, run storage, and calculation engine.
pub struct CalculationService<S, R> {
    source: Arc<S>,
    runs: Arc<R>,
    engine: Arc<CalculationEngine>,
}

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_run_id() -> RunId {
    let id = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RunId(format!("calc-{id:06}"))
}

impl<S, R> CalculationService<S, R>
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    pub fn new(source: Arc<S>, runs: Arc<R>, config: CalculationConfig) -> Self {
        Self {
            source,
            runs,
            engine: Arc::new(CalculationEngine::new(config)),
        }
    }

    pub fn config(&self) -> &CalculationConfig {
        self.engine.config()
    }

    /// Calculate and persist a run for the period.
    ///
    /// A run-level failure for a known contract is persisted as a `failed`
    /// run before the error is returned.
    pub fn run_calculation(
        &self,
        contract_id: &ContractId,
        period: CalculationPeriod,
    ) -> Result<RunRecord, CalculationServiceError> {
        let request = RunRequest {
            run_id: next_run_id(),
            period,
            requested_at: Utc::now(),
            settled: SettledHistory::default(),
        };

        match self.calculate(contract_id, None, &request) {
            Ok(outcome) => {
                let stored = self.runs.insert(RunRecord::from(outcome))?;
                info!(
                    run = %stored.run.id,
                    contract = %contract_id,
                    total_fee = %stored.run.total_fee,
                    line_items = stored.line_items.len(),
                    "calculation run stored"
                );
                Ok(stored)
            }
            Err(CalculationServiceError::Run(RunError::ContractNotFound(id))) => {
                Err(RunError::ContractNotFound(id).into())
            }
            Err(CalculationServiceError::Run(error)) => {
                warn!(run = %request.run_id, contract = %contract_id, %error, "calculation run failed");
                let failed = CalculationRun::failed(
                    request.run_id.clone(),
                    contract_id.clone(),
                    period,
                    self.config().approach,
                    error.to_string(),
                    request.requested_at,
                );
                self.runs.insert(RunRecord::failed(failed))?;
                Err(CalculationServiceError::RunFailed {
                    run: request.run_id,
                    source: error,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Dry run; nothing is persisted. Supplied transactions replace the contract's own.
    pub fn preview(
        &self,
        contract_id: &ContractId,
        period: CalculationPeriod,
        transactions: Option<Vec<SalesTransaction>>,
    ) -> Result<CalculationOutcome, CalculationServiceError> {
        let request = RunRequest {
            run_id: RunId("preview".to_string()),
            period,
            requested_at: Utc::now(),
            settled: SettledHistory::default(),
        };
        self.calculate(contract_id, transactions, &request)
    }

    fn calculate(
        &self,
        contract_id: &ContractId,
        transactions: Option<Vec<SalesTransaction>>,
        request: &RunRequest,
    ) -> Result<CalculationOutcome, CalculationServiceError> {
        let snapshot = self
            .source
            .snapshot(contract_id)?
            .ok_or_else(|| RunError::ContractNotFound(contract_id.clone()))?;
        let transactions = match transactions {
            Some(transactions) => transactions,
            None => self.source.transactions(contract_id, &request.period)?,
        };
        let request = RunRequest {
            settled: self.settled_history(contract_id, &request.period)?,
            ..request.clone()
        };
        let outcome = self.engine.run(&snapshot, &transactions, &request)?;
        Ok(outcome)
    }

    /// Approved and paid runs that do not overlap `period`.
    fn settled_history(
        &self,
        contract_id: &ContractId,
        period: &CalculationPeriod,
    ) -> Result<SettledHistory, CalculationServiceError> {
        let mut settled = SettledHistory::default();
        for run in self.runs.list(contract_id)? {
            if !matches!(run.status, RunStatus::Approved | RunStatus::Paid)
                || run.period.overlaps(period)
            {
                continue;
            }
            settled
                .record(run.period, &run.quarter_fees)
                .map_err(|_| RunError::Overflow("settled fees"))?;
        }
        Ok(settled)
    }

    pub fn get_run(&self, run_id: &RunId) -> Result<CalculationRun, CalculationServiceError> {
        Ok(self.record(run_id)?.run)
    }

    pub fn get_line_items(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<CalculationLineItem>, CalculationServiceError> {
        Ok(self.record(run_id)?.line_items)
    }

    pub fn get_execution_logs(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<ExecutionLog>, CalculationServiceError> {
        Ok(self.record(run_id)?.execution_logs)
    }

    pub fn list_runs(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<CalculationRun>, CalculationServiceError> {
        Ok(self.runs.list(contract_id)?)
    }

    pub fn get_aggregate(
        &self,
        run_id: &RunId,
        dimension: &str,
    ) -> Result<AggregationReport, CalculationServiceError> {
        let dimension = AggregationDimension::parse(dimension)
            .ok_or_else(|| CalculationServiceError::UnknownDimension(dimension.to_string()))?;
        let record = self.record(run_id)?;
        Ok(AggregationReporter::aggregate(&record.line_items, &dimension))
    }

    pub fn approve(
        &self,
        run_id: &RunId,
        approver_id: &str,
    ) -> Result<CalculationRun, CalculationServiceError> {
        self.transition(run_id, RunStatus::Approved, approver_id, None)
    }

    pub fn reject(
        &self,
        run_id: &RunId,
        approver_id: &str,
        reason: &str,
    ) -> Result<CalculationRun, CalculationServiceError> {
        self.transition(
            run_id,
            RunStatus::Rejected,
            approver_id,
            Some(reason.to_string()),
        )
    }

    pub fn mark_paid(
        &self,
        run_id: &RunId,
        actor_id: &str,
    ) -> Result<CalculationRun, CalculationServiceError> {
        self.transition(run_id, RunStatus::Paid, actor_id, None)
    }

    fn transition(
        &self,
        run_id: &RunId,
        next: RunStatus,
        actor: &str,
        reason: Option<String>,
    ) -> Result<CalculationRun, CalculationServiceError> {
        let mut run = self.record(run_id)?.run;
        let expected = run.status;
        run.transition(next, actor, reason, Utc::now())?;
        self.runs.transition(run_id, expected, run.clone())?;
        info!(run = %run_id, from = %expected, to = %next, actor, "run status changed");
        Ok(run)
    }

    fn record(&self, run_id: &RunId) -> Result<RunRecord, CalculationServiceError> {
        let record = self.runs.fetch(run_id)?.ok_or(RepositoryError::NotFound)?;
        Ok(record)
    }
}

/// Error raised by the calculation service.
#[derive(Debug, thiserror::Error)]
pub enum CalculationServiceError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("run {run} failed: {source}")]
    RunFailed {
        run: RunId,
        #[source]
        source: RunError,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("unknown aggregation dimension '{0}'")]
    UnknownDimension(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
