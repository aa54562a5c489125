// ============================================================================
// Validation
// ============================================================================

use crate::core::Value;
use crate::entity::{Dto, Operation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Named set of rules run together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleGroup {
    Default,
    Add,
    Update,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenRule {
    pub rule: String,
    pub property: Option<String>,
    pub message: String,
}

impl BrokenRule {
    pub fn new(rule: impl Into<String>, property: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            property: property.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for BrokenRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "{} [{}]: {}", self.rule, property, self.message),
            None => write!(f, "{}: {}", self.rule, self.message),
        }
    }
}

/// Structural constraint checks. An empty result means the entity is valid.
pub trait Validator: Send + Sync {
    fn validate(&self, dto: &Dto, operation: Operation, groups: &[RuleGroup]) -> Vec<BrokenRule>;
}

pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _dto: &Dto, _operation: Operation, _groups: &[RuleGroup]) -> Vec<BrokenRule> {
        Vec::new()
    }
}

pub type RuleFn = Arc<dyn Fn(&Dto) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub enum Rule {
    Required(String),
    MaxLength(String, usize),
    Range { field: String, min: f64, max: f64 },
    Custom { name: String, check: RuleFn },
}

impl Rule {
    pub fn required(field: impl Into<String>) -> Self {
        Rule::Required(field.into())
    }

    pub fn max_length(field: impl Into<String>, max: usize) -> Self {
        Rule::MaxLength(field.into(), max)
    }

    pub fn range(field: impl Into<String>, min: f64, max: f64) -> Self {
        Rule::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn custom<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Dto) -> Option<String> + Send + Sync + 'static,
    {
        Rule::Custom {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    fn check(&self, dto: &Dto) -> Option<BrokenRule> {
        match self {
            Rule::Required(field) => match dto.get(field) {
                None | Some(Value::Null) => Some(BrokenRule::new(
                    "required",
                    Some(field),
                    format!("{field} is required"),
                )),
                Some(Value::Text(text)) if text.trim().is_empty() => Some(BrokenRule::new(
                    "required",
                    Some(field),
                    format!("{field} is required"),
                )),
                _ => None,
            },
            Rule::MaxLength(field, max) => match dto.get(field) {
                Some(Value::Text(text)) if text.chars().count() > *max => Some(BrokenRule::new(
                    "max_length",
                    Some(field),
                    format!("{field} exceeds {max} characters"),
                )),
                _ => None,
            },
            Rule::Range { field, min, max } => {
                let value = dto.get(field).and_then(Value::as_f64)?;
                if value < *min || value > *max {
                    Some(BrokenRule::new(
                        "range",
                        Some(field),
                        format!("{field} must be within [{min}, {max}]"),
                    ))
                } else {
                    None
                }
            }
            Rule::Custom { name, check } => {
                check(dto).map(|message| BrokenRule::new(name.clone(), None, message))
            }
        }
    }
}

/// Rules registered per entity type and rule group.
#[derive(Default)]
pub struct RuleSetValidator {
    rules: RwLock<HashMap<String, Vec<(RuleGroup, Rule)>>>,
}

impl RuleSetValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(self, type_name: &str, group: RuleGroup, rule: Rule) -> Self {
        self.add_rule(type_name, group, rule);
        self
    }

    pub fn add_rule(&self, type_name: &str, group: RuleGroup, rule: Rule) {
        // A poisoned lock only means a panicking writer; the map is still usable.
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        rules
            .entry(type_name.to_string())
            .or_default()
            .push((group, rule));
    }
}

impl Validator for RuleSetValidator {
    fn validate(&self, dto: &Dto, _operation: Operation, groups: &[RuleGroup]) -> Vec<BrokenRule> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        let Some(registered) = rules.get(dto.type_name()) else {
            return Vec::new();
        };
        registered
            .iter()
            .filter(|(group, _)| groups.contains(group))
            .filter_map(|(_, rule)| rule.check(dto))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> RuleSetValidator {
        RuleSetValidator::new()
            .rule("Customer", RuleGroup::Default, Rule::required("name"))
            .rule("Customer", RuleGroup::Add, Rule::max_length("code", 3))
            .rule("Customer", RuleGroup::Update, Rule::range("credit", 0.0, 100.0))
    }

    #[test]
    fn test_groups_select_rules() {
        let dto = Dto::new("Customer").with("code", "ABCD").with("credit", 500);
        let add = validator().validate(&dto, Operation::Add, &[RuleGroup::Default, RuleGroup::Add]);
        let rules: Vec<&str> = add.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(rules, vec!["required", "max_length"]);

        let update = validator().validate(&dto, Operation::Update, &[RuleGroup::Update]);
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].property.as_deref(), Some("credit"));
    }

    #[test]
    fn test_custom_rule_and_unknown_type() {
        let validator = RuleSetValidator::new().rule(
            "Order",
            RuleGroup::Default,
            Rule::custom("positive_total", |dto| match dto.get("total").and_then(Value::as_i64) {
                Some(total) if total > 0 => None,
                _ => Some("total must be positive".to_string()),
            }),
        );
        let broken = validator.validate(&Dto::new("Order"), Operation::Add, &[RuleGroup::Default]);
        assert_eq!(broken[0].rule, "positive_total");
        assert!(validator.validate(&Dto::new("Other"), Operation::Add, &[RuleGroup::Default]).is_empty());
    }
}
