use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::blueprint::CalculationBlueprint;
use super::domain::{CalculationPeriod, ContractId, RuleId, RunId};
use super::line_item::CalculationPath;
use super::minimum::{MinimumGuaranteeOutcome, QuarterFee};
use super::rules::RuleType;
use crate::config::CalculationApproach;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    PendingApproval,
    Approved,
    Rejected,
    Paid,
    Failed,
}

impl RunStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RunStatus::PendingApproval => "pending_approval",
            RunStatus::Approved => "approved",
            RunStatus::Rejected => "rejected",
            RunStatus::Paid => "paid",
            RunStatus::Failed => "failed",
        }
    }

    /// Transitions only move forward; `Rejected`, `Paid` and `Failed` are final.
    pub const fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::PendingApproval, RunStatus::Approved)
                | (RunStatus::PendingApproval, RunStatus::Rejected)
                | (RunStatus::Approved, RunStatus::Paid)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub matched: u64,
    pub unmatched: u64,
    pub failed: u64,
}

/// Fees attributed to one rule across the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBreakdown {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub rule_type: RuleType,
    pub path: Option<CalculationPath>,
    pub line_items: u64,
    pub total_fee: Decimal,
}

/// Who moved a run to a status, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub status: RunStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRun {
    pub id: RunId,
    pub contract_id: ContractId,
    pub period: CalculationPeriod,
    pub approach: CalculationApproach,
    pub total_sales_amount: Decimal,
    /// Sum of transaction fees before period adjustments.
    pub calculated_fee: Decimal,
    pub total_fee: Decimal,
    pub sales_count: u64,
    pub counts: RunCounts,
    pub breakdown: Vec<RuleBreakdown>,
    pub minimum_guarantees: Vec<MinimumGuaranteeOutcome>,
    /// Fees per calendar quarter, adjustments included.
    #[serde(default)]
    pub quarter_fees: Vec<QuarterFee>,
    pub blueprints: Vec<CalculationBlueprint>,
    pub warnings: Vec<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub approvals: Vec<ApprovalRecord>,
    pub created_at: DateTime<Utc>,
}

impl CalculationRun {
    /// Record of a run that aborted before producing line items.
    pub fn failed(
        id: RunId,
        contract_id: ContractId,
        period: CalculationPeriod,
        approach: CalculationApproach,
        message: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            contract_id,
            period,
            approach,
            total_sales_amount: Decimal::ZERO,
            calculated_fee: Decimal::ZERO,
            total_fee: Decimal::ZERO,
            sales_count: 0,
            counts: RunCounts::default(),
            breakdown: Vec::new(),
            minimum_guarantees: Vec::new(),
            quarter_fees: Vec::new(),
            blueprints: Vec::new(),
            warnings: Vec::new(),
            status: RunStatus::Failed,
            error_message: Some(message),
            approvals: Vec::new(),
            created_at,
        }
    }

    pub fn transition(
        &mut self,
        next: RunStatus,
        actor: &str,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                run: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.approvals.push(ApprovalRecord {
            status: next,
            actor: actor.to_string(),
            at,
            reason,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("run {run} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub run: RunId,
    pub from: RunStatus,
    pub to: RunStatus,
}
