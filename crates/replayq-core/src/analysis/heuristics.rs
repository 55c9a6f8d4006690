//! Boolean signals derived from parsed telemetry.
//!
//! Telemetry shape consumed here: `{"events": [{"type": "damage" | "kill" | "heal" | ..., ...}]}`.
//! Rules never fail; a missing or malformed `events` array reads as "no events".

use serde_json::{Map, Value};

/// A pluggable rule: one named flag per replay.
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, telemetry: &Value) -> bool;
}

fn event_types(telemetry: &Value) -> impl Iterator<Item = &str> {
    telemetry
        .get("events")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|event| event.get("type").and_then(Value::as_str))
}

/// Any damage or kill event.
#[derive(Debug, Clone, Copy, Default)]
pub struct FightDetected;

impl Heuristic for FightDetected {
    fn name(&self) -> &'static str {
        "fight_detected"
    }

    fn evaluate(&self, telemetry: &Value) -> bool {
        event_types(telemetry).any(|t| matches!(t, "damage" | "kill"))
    }
}

/// No heal event at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHealDetected;

impl Heuristic for NoHealDetected {
    fn name(&self) -> &'static str {
        "no_heal_detected"
    }

    fn evaluate(&self, telemetry: &Value) -> bool {
        !event_types(telemetry).any(|t| t == "heal")
    }
}

/// Ordered set of rules evaluated together.
pub struct HeuristicSet {
    rules: Vec<Box<dyn Heuristic>>,
}

impl HeuristicSet {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// `fight_detected` and `no_heal_detected`.
    pub fn builtin() -> Self {
        Self::empty().with(FightDetected).with(NoHealDetected)
    }

    /// Add a rule. A later rule with the same name overwrites the earlier flag.
    pub fn with(mut self, rule: impl Heuristic + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `{ name: bool }` for every rule.
    pub fn evaluate(&self, telemetry: &Value) -> Value {
        let flags: Map<String, Value> = self
            .rules
            .iter()
            .map(|rule| (rule.name().to_string(), Value::Bool(rule.evaluate(telemetry))))
            .collect();
        Value::Object(flags)
    }
}

impl Default for HeuristicSet {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::damage(json!({"events": [{"type": "damage", "amount": 30}]}), true)]
    #[case::kill(json!({"events": [{"type": "spawn"}, {"type": "kill"}]}), true)]
    #[case::only_heals(json!({"events": [{"type": "heal"}]}), false)]
    #[case::no_events(json!({}), false)]
    #[case::events_not_array(json!({"events": "damage"}), false)]
    fn fight_detected(#[case] telemetry: Value, #[case] expected: bool) {
        assert_eq!(FightDetected.evaluate(&telemetry), expected);
    }

    #[rstest]
    #[case::heal_present(json!({"events": [{"type": "damage"}, {"type": "heal"}]}), false)]
    #[case::no_heal(json!({"events": [{"type": "damage"}]}), true)]
    #[case::no_events(json!({"events": []}), true)]
    #[case::untyped_events(json!({"events": [{"amount": 5}]}), true)]
    fn no_heal_detected(#[case] telemetry: Value, #[case] expected: bool) {
        assert_eq!(NoHealDetected.evaluate(&telemetry), expected);
    }

    struct AlwaysTrue;

    impl Heuristic for AlwaysTrue {
        fn name(&self) -> &'static str {
            "always"
        }

        fn evaluate(&self, _telemetry: &Value) -> bool {
            true
        }
    }

    #[test]
    fn set_evaluates_every_rule_by_name() {
        let set = HeuristicSet::builtin().with(AlwaysTrue);
        let flags = set.evaluate(&json!({"events": [{"type": "kill"}]}));

        assert_eq!(
            flags,
            json!({"fight_detected": true, "no_heal_detected": true, "always": true})
        );
        assert_eq!(set.len(), 3);
    }
}
