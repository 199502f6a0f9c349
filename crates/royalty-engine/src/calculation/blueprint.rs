//! Binding manual rules to confirmed ERP field mappings.

use serde::{Deserialize, Serialize};

use super::domain::{Dimension, RuleId, SalesTransaction};
use super::rules::{MatchCriteria, RoyaltyRule, RuleClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Suggested,
    Confirmed,
    Rejected,
}

/// Mapping proposed by the field-mapping subsystem: ERP `source_field` feeds contract term `target_field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    pub confidence: f32,
    pub status: MappingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    Match(Dimension),
    /// The quantity or amount a rule's rate is charged on.
    Basis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintDimension {
    pub dimension_type: DimensionType,
    pub contract_term: String,
    pub erp_field_name: Option<String>,
    pub match_value: String,
    pub criteria: MatchCriteria,
    pub is_mapped: bool,
    pub confidence: Option<f32>,
}

/// ERP-bound snapshot of a royalty rule. Derived; never edited directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationBlueprint {
    pub rule_id: RuleId,
    pub rule_version: u32,
    pub rule_name: String,
    pub dimensions: Vec<BlueprintDimension>,
    is_fully_mapped: bool,
    pub unmapped_fields: Vec<String>,
    pub version: u32,
    pub predecessor_version: Option<u32>,
}

impl CalculationBlueprint {
    pub fn is_fully_mapped(&self) -> bool {
        self.is_fully_mapped && self.dimensions.iter().all(|dimension| dimension.is_mapped)
    }

    /// ERP field carrying the rule's basis, when bound.
    pub fn basis_field(&self) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|dimension| dimension.dimension_type == DimensionType::Basis)
            .and_then(|dimension| dimension.erp_field_name.as_deref())
    }

    /// Match a transaction through its ERP fields. Never matches when the blueprint
    /// is not fully mapped.
    pub fn matches(&self, transaction: &SalesTransaction) -> bool {
        if !self.is_fully_mapped() {
            return false;
        }
        self.dimensions
            .iter()
            .filter(|dimension| matches!(dimension.dimension_type, DimensionType::Match(_)))
            .all(|dimension| {
                let value = dimension
                    .erp_field_name
                    .as_deref()
                    .map(|field| transaction.field(field))
                    .and_then(|value| value.as_text());
                dimension.criteria.matches(value.as_deref())
            })
    }

    fn same_bindings(&self, other: &CalculationBlueprint) -> bool {
        self.rule_id == other.rule_id
            && self.rule_version == other.rule_version
            && self.dimensions.len() == other.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(&other.dimensions)
                .all(|(left, right)| {
                    left.dimension_type == right.dimension_type
                        && left.erp_field_name == right.erp_field_name
                        && left.match_value == right.match_value
                })
    }
}

pub struct BlueprintMaterializer;

impl BlueprintMaterializer {
    /// Bind every constrained dimension (and the basis of fee-determining rules)
    /// to a confirmed mapping. When `previous` has identical bindings it is
    /// returned unchanged; otherwise a new version is cut.
    pub fn materialize(
        rule: &RoyaltyRule,
        mappings: &[FieldMapping],
        previous: Option<&CalculationBlueprint>,
    ) -> CalculationBlueprint {
        let mut dimensions = Vec::new();

        for criterion in rule.constrained_dimensions() {
            let term = criterion.dimension.contract_term();
            let mapping = confirmed_mapping(mappings, term);
            dimensions.push(BlueprintDimension {
                dimension_type: DimensionType::Match(criterion.dimension.clone()),
                contract_term: term.to_string(),
                erp_field_name: mapping.map(|mapping| mapping.source_field.clone()),
                match_value: criterion.criteria.describe(),
                criteria: criterion.criteria.clone(),
                is_mapped: mapping.is_some(),
                confidence: mapping.map(|mapping| mapping.confidence),
            });
        }

        if needs_basis(rule) {
            let term = rule.basis().field_name();
            let mapping = confirmed_mapping(mappings, term);
            dimensions.push(BlueprintDimension {
                dimension_type: DimensionType::Basis,
                contract_term: term.to_string(),
                erp_field_name: mapping.map(|mapping| mapping.source_field.clone()),
                match_value: "*".to_string(),
                criteria: MatchCriteria::Wildcard,
                is_mapped: mapping.is_some(),
                confidence: mapping.map(|mapping| mapping.confidence),
            });
        }

        let unmapped_fields: Vec<String> = dimensions
            .iter()
            .filter(|dimension| !dimension.is_mapped)
            .map(|dimension| dimension.contract_term.clone())
            .collect();
        let is_fully_mapped = dimensions.iter().all(|dimension| dimension.is_mapped);

        let mut blueprint = CalculationBlueprint {
            rule_id: rule.id.clone(),
            rule_version: rule.version,
            rule_name: rule.rule_name.clone(),
            dimensions,
            is_fully_mapped,
            unmapped_fields,
            version: 1,
            predecessor_version: None,
        };

        if let Some(previous) = previous.filter(|previous| previous.rule_id == rule.id) {
            if previous.same_bindings(&blueprint) {
                return previous.clone();
            }
            blueprint.version = previous.version + 1;
            blueprint.predecessor_version = Some(previous.version);
        }

        blueprint
    }
}

fn needs_basis(rule: &RoyaltyRule) -> bool {
    rule.class() == RuleClass::FeeDetermining && rule.formula_definition.is_none()
}

/// Highest-confidence confirmed mapping for a contract term; ties keep the first listed.
fn confirmed_mapping<'a>(mappings: &'a [FieldMapping], term: &str) -> Option<&'a FieldMapping> {
    mappings
        .iter()
        .filter(|mapping| {
            mapping.status == MappingStatus::Confirmed
                && mapping.target_field.trim().eq_ignore_ascii_case(term)
        })
        .fold(None, |best: Option<&FieldMapping>, candidate| match best {
            Some(current) if current.confidence >= candidate.confidence => Some(current),
            _ => Some(candidate),
        })
}
