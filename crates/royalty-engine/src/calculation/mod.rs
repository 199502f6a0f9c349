//! Royalty and license-fee calculation.
//!
//! Rules come from a read-only [`ContractSnapshot`]; the [`CalculationEngine`]
//! prices a batch of sales transactions against them, either through the
//! manually defined rules or through ERP mapping rule sets, and the
//! [`CalculationService`] persists the resulting runs and drives their
//! approval lifecycle.

pub mod aggregation;
pub mod blueprint;
pub mod domain;
pub mod engine;
pub mod erp;
pub mod formula;
pub mod import;
pub mod line_item;
pub mod minimum;
pub mod repository;
pub mod router;
pub mod rules;
pub mod run;
pub(crate) mod selector;
pub mod service;
pub mod tiers;

#[cfg(test)]
mod tests;

pub use aggregation::{AggregationDimension, AggregationReport, AggregationReporter, AggregationRow};
pub use blueprint::{BlueprintMaterializer, CalculationBlueprint, FieldMapping, MappingStatus};
pub use domain::{
    CalculationPeriod, ContractId, Dimension, FieldValue, Quarter, RuleId, RunId,
    SalesTransaction, TransactionId,
};
pub use engine::{CalculationEngine, CalculationOutcome, ContractSnapshot, RunError, RunRequest};
pub use erp::{ErpMappingRule, ErpMappingRuleSet, ExecutionLog, ExecutionStatus, LookupTables};
pub use formula::Expr;
pub use import::{ImportError, TransactionImporter};
pub use line_item::{CalculationLineItem, CalculationPath, LineItemKind, LineItemStatus};
pub use minimum::{MinimumGuarantee, MinimumGuaranteeOutcome, QuarterFee, SettledHistory};
pub use repository::{ContractSource, RepositoryError, RunRecord, RunRepository};
pub use router::calculation_router;
pub use rules::{MatchCriteria, ReviewStatus, RoyaltyRule, RuleBook, RuleType, ValidationError};
pub use run::{CalculationRun, RunStatus, TransitionError};
pub use service::{CalculationService, CalculationServiceError};
pub use tiers::{RoundingMode, TierBasis, TierMethod, TierTable, VolumeTier};
