use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{validate_rule, RoyaltyRule, ValidationError};
use crate::calculation::domain::RuleId;

/// Append-only history of a contract's rules.
///
/// Superseding publishes a new version that points at its predecessor and
/// deactivates the old one; published rule bodies are never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBook {
    versions: Vec<RoyaltyRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleBookError {
    #[error("rule id '{0}' already published")]
    DuplicateId(RuleId),
    #[error("rule '{0}' not found")]
    NotFound(RuleId),
    #[error("rule '{0}' is not the active version")]
    NotActive(RuleId),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<RoyaltyRule>) -> Result<Self, RuleBookError> {
        let mut book = Self::new();
        for rule in rules {
            book.publish(rule)?;
        }
        Ok(book)
    }

    pub fn publish(&mut self, rule: RoyaltyRule) -> Result<&RoyaltyRule, RuleBookError> {
        validate_rule(&rule)?;
        if self.find(&rule.id).is_some() {
            return Err(RuleBookError::DuplicateId(rule.id));
        }
        self.versions.push(rule);
        Ok(&self.versions[self.versions.len() - 1])
    }

    /// Replace an active rule with a new version. The replacement keeps the
    /// predecessor's contract and receives `version + 1`.
    pub fn supersede(
        &mut self,
        current: &RuleId,
        mut replacement: RoyaltyRule,
        at: DateTime<Utc>,
    ) -> Result<&RoyaltyRule, RuleBookError> {
        let index = self
            .versions
            .iter()
            .position(|rule| &rule.id == current)
            .ok_or_else(|| RuleBookError::NotFound(current.clone()))?;
        if !self.versions[index].is_active {
            return Err(RuleBookError::NotActive(current.clone()));
        }

        let previous = &self.versions[index];
        replacement.contract_id = previous.contract_id.clone();
        replacement.version = previous.version + 1;
        replacement.predecessor = Some(previous.id.clone());
        replacement.created_at = at;
        replacement.is_active = true;

        validate_rule(&replacement)?;
        if self.find(&replacement.id).is_some() {
            return Err(RuleBookError::DuplicateId(replacement.id));
        }

        self.versions[index].is_active = false;
        self.versions.push(replacement);
        Ok(&self.versions[self.versions.len() - 1])
    }

    pub fn find(&self, id: &RuleId) -> Option<&RoyaltyRule> {
        self.versions.iter().find(|rule| &rule.id == id)
    }

    /// Active rules ordered by precedence.
    pub fn active(&self) -> Vec<&RoyaltyRule> {
        let mut rules: Vec<&RoyaltyRule> =
            self.versions.iter().filter(|rule| rule.is_active).collect();
        rules.sort_by(|a, b| a.precedence_key().cmp(&b.precedence_key()));
        rules
    }

    /// Every version of a rule lineage, oldest first.
    pub fn lineage(&self, id: &RuleId) -> Vec<&RoyaltyRule> {
        let mut chain = Vec::new();
        let mut cursor = self.find(id);
        while let Some(rule) = cursor {
            chain.push(rule);
            cursor = rule.predecessor.as_ref().and_then(|prev| self.find(prev));
        }
        chain.reverse();
        chain
    }

    pub fn versions(&self) -> &[RoyaltyRule] {
        &self.versions
    }
}
