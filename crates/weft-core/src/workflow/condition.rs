//! Structured condition evaluation for task gates and `condition` tasks.
//!
//! A `TaskCondition` is a small boolean tree: comparisons read one runtime
//! variable, and `and`/`or`/`not` combine nested conditions. Evaluation never
//! fails; anything that cannot be compared is simply false.

use std::cmp::Ordering;

use serde_json::Value;
use weft_types::workflow::{ConditionOperator, TaskCondition};

use super::context::VariableSnapshot;

/// Stateless evaluator for `TaskCondition` trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition against a variable snapshot.
    ///
    /// - `exists` checks presence only.
    /// - Other comparisons are false when the variable is absent.
    /// - `and` of nothing is true, `or` of nothing is false.
    /// - `not` negates its first nested condition, and is false without one.
    pub fn evaluate(&self, condition: &TaskCondition, vars: &VariableSnapshot) -> bool {
        match condition.operator {
            ConditionOperator::And => condition.conditions.iter().all(|c| self.evaluate(c, vars)),
            ConditionOperator::Or => condition.conditions.iter().any(|c| self.evaluate(c, vars)),
            ConditionOperator::Not => condition
                .conditions
                .first()
                .is_some_and(|c| !self.evaluate(c, vars)),
            ConditionOperator::Exists => condition
                .variable
                .as_deref()
                .is_some_and(|name| vars.contains(name)),
            op => {
                let Some(actual) = condition.variable.as_deref().and_then(|name| vars.lookup(name))
                else {
                    return false;
                };
                let expected = condition.value.as_ref().unwrap_or(&Value::Null);
                compare(op, actual, expected)
            }
        }
    }
}

fn compare(op: ConditionOperator, actual: &Value, expected: &Value) -> bool {
    match op {
        ConditionOperator::Equals => loose_eq(actual, expected),
        ConditionOperator::NotEquals => !loose_eq(actual, expected),
        ConditionOperator::GreaterThan => order(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::LessThan => order(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::Exists
        | ConditionOperator::And
        | ConditionOperator::Or
        | ConditionOperator::Not => false,
    }
}

/// Equality where `1` and `1.0` are the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Numbers order numerically, strings lexicographically, anything else is unordered.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Substring for strings, membership for arrays, key presence for objects.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn vars() -> VariableSnapshot {
        let map: HashMap<String, Value> = serde_json::from_value(json!({
            "flag": true,
            "score": 0.75,
            "count": 1,
            "name": "weft engine",
            "tags": ["fast", "async"],
            "meta": {"owner": "ops"},
            "nothing": null
        }))
        .unwrap();
        VariableSnapshot::new(map)
    }

    fn eval(condition: &TaskCondition) -> bool {
        ConditionEvaluator::new().evaluate(condition, &vars())
    }

    fn cmp(var: &str, op: ConditionOperator, value: Value) -> TaskCondition {
        TaskCondition::compare(var, op, value)
    }

    #[test]
    fn test_equals_and_not_equals() {
        assert!(eval(&TaskCondition::equals("flag", json!(true))));
        assert!(!eval(&TaskCondition::equals("flag", json!(false))));
        assert!(eval(&cmp("flag", ConditionOperator::NotEquals, json!(false))));
        assert!(eval(&TaskCondition::equals("count", json!(1.0))));
    }

    #[test]
    fn test_absent_variable_is_false_except_exists() {
        for op in [
            ConditionOperator::Equals,
            ConditionOperator::NotEquals,
            ConditionOperator::GreaterThan,
            ConditionOperator::LessThan,
            ConditionOperator::Contains,
        ] {
            assert!(!eval(&cmp("ghost", op, json!(1))), "{op:?} on absent variable");
        }
        assert!(!eval(&TaskCondition::exists("ghost")));
    }

    #[test]
    fn test_exists_checks_presence_only() {
        assert!(eval(&TaskCondition::exists("nothing")));
        assert!(eval(&TaskCondition::exists("meta.owner")));
    }

    #[test]
    fn test_ordering() {
        assert!(eval(&cmp("score", ConditionOperator::GreaterThan, json!(0.5))));
        assert!(!eval(&cmp("score", ConditionOperator::LessThan, json!(0.5))));
        assert!(eval(&cmp("name", ConditionOperator::LessThan, json!("zeta"))));
        assert!(!eval(&cmp("name", ConditionOperator::GreaterThan, json!(3))));
    }

    #[test]
    fn test_contains() {
        assert!(eval(&cmp("name", ConditionOperator::Contains, json!("engine"))));
        assert!(eval(&cmp("tags", ConditionOperator::Contains, json!("async"))));
        assert!(!eval(&cmp("tags", ConditionOperator::Contains, json!("slow"))));
        assert!(eval(&cmp("meta", ConditionOperator::Contains, json!("owner"))));
        assert!(!eval(&cmp("count", ConditionOperator::Contains, json!(1))));
    }

    #[test]
    fn test_logical_operators() {
        let yes = TaskCondition::equals("flag", json!(true));
        let no = TaskCondition::equals("flag", json!(false));

        assert!(eval(&TaskCondition::logical(
            ConditionOperator::And,
            vec![yes.clone(), yes.clone()]
        )));
        assert!(!eval(&TaskCondition::logical(
            ConditionOperator::And,
            vec![yes.clone(), no.clone()]
        )));
        assert!(eval(&TaskCondition::logical(
            ConditionOperator::Or,
            vec![no.clone(), yes.clone()]
        )));
        assert!(eval(&TaskCondition::logical(ConditionOperator::Not, vec![no])));
        assert!(!eval(&TaskCondition::logical(ConditionOperator::Not, vec![yes])));
    }

    #[test]
    fn test_empty_logical_lists() {
        assert!(eval(&TaskCondition::logical(ConditionOperator::And, vec![])));
        assert!(!eval(&TaskCondition::logical(ConditionOperator::Or, vec![])));
        assert!(!eval(&TaskCondition::logical(ConditionOperator::Not, vec![])));
    }

    #[test]
    fn test_dotted_path_comparison() {
        assert!(eval(&TaskCondition::equals("meta.owner", json!("ops"))));
    }
}
