//! ERP-mapping rule path.
//!
//! A rule set turns ERP fields on a transaction into target fields through
//! conditional transformations, then charges fees from those fields through
//! its outputs. It is an alternative to pricing a transaction from the manual
//! rule definition and produces the same line item shape.

mod conditions;
mod executor;

pub use conditions::{evaluate_chain, ConditionOperator, ErpMappingCondition, LogicOperator};
pub use executor::{
    ErpExecution, ErpMappingRuleExecutor, ErpOutcome, ExecutionLog, ExecutionStatus, LookupTables,
    OutputCharge, RuleExecutionFailure,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{ContractId, RuleId};
use super::formula::Expr;
use super::tiers::{RoundingMode, TierMethod, TierTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpMappingRuleSet {
    pub id: String,
    pub contract_id: ContractId,
    /// Royalty rule whose fee this rule set computes.
    #[serde(default)]
    pub royalty_rule_id: Option<RuleId>,
    pub name: String,
    #[serde(default = "enabled")]
    pub is_active: bool,
    pub rules: Vec<ErpMappingRule>,
}

impl ErpMappingRuleSet {
    /// Active rules in ascending priority; equal priorities keep their listed order.
    pub fn ordered_rules(&self) -> Vec<&ErpMappingRule> {
        let mut rules: Vec<&ErpMappingRule> =
            self.rules.iter().filter(|rule| rule.is_active).collect();
        rules.sort_by_key(|rule| rule.priority);
        rules
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpMappingRule {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub source_field: String,
    pub target_field: String,
    #[serde(default)]
    pub transformation: Transformation,
    #[serde(default)]
    pub conditions: Vec<ErpMappingCondition>,
    #[serde(default)]
    pub outputs: Vec<ErpMappingOutput>,
    #[serde(default = "enabled")]
    pub is_active: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformation {
    #[default]
    Direct,
    Lookup {
        table: String,
    },
    Formula {
        expression: Expr,
    },
    Conditional {
        branches: Vec<ConditionalBranch>,
        #[serde(default)]
        otherwise: Option<Expr>,
    },
}

impl Transformation {
    pub fn label(&self) -> &'static str {
        match self {
            Transformation::Direct => "direct",
            Transformation::Lookup { .. } => "lookup",
            Transformation::Formula { .. } => "formula",
            Transformation::Conditional { .. } => "conditional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub conditions: Vec<ErpMappingCondition>,
    pub expression: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpMappingOutput {
    pub name: String,
    /// Field charged by this output; defaults to the owning rule's target field.
    #[serde(default)]
    pub source_field: Option<String>,
    pub calculation: OutputCalculation,
    #[serde(default)]
    pub rounding: RoundingMode,
    #[serde(default = "cents")]
    pub scale: u32,
}

fn cents() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputCalculation {
    Percentage {
        rate: Decimal,
    },
    Fixed {
        amount: Decimal,
    },
    Tiered {
        tiers: TierTable,
        #[serde(default)]
        method: TierMethod,
    },
    Formula {
        expression: Expr,
    },
}
