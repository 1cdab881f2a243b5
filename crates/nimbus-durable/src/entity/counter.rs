use serde::{Deserialize, Serialize};

use super::{Effect, Entity};

/// Integer counter entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
}

/// Operations accepted by [`Counter`]. Each yields the value afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOperation {
    Add(i64),
    Reset,
    Get,
    Delete,
}

impl Entity for Counter {
    const NAME: &'static str = "counter";
    type Operation = CounterOperation;
    type Output = i64;

    fn apply(&mut self, operation: CounterOperation) -> Effect<i64> {
        match operation {
            CounterOperation::Add(amount) => {
                self.value = self.value.saturating_add(amount);
                Effect::updated(self.value)
            }
            CounterOperation::Reset => {
                self.value = 0;
                Effect::updated(0)
            }
            CounterOperation::Get => Effect::read(self.value),
            CounterOperation::Delete => Effect::deleted(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StateChange;

    #[test]
    fn add_then_reset() {
        let mut counter = Counter::default();
        assert_eq!(counter.apply(CounterOperation::Add(5)).output, 5);
        assert_eq!(counter.apply(CounterOperation::Add(-2)).output, 3);
        assert_eq!(counter.apply(CounterOperation::Get), Effect::read(3));
        assert_eq!(counter.apply(CounterOperation::Reset).output, 0);
        assert_eq!(counter.value, 0);
    }

    #[test]
    fn delete_is_a_state_removal() {
        let mut counter = Counter { value: 9 };
        let effect = counter.apply(CounterOperation::Delete);
        assert_eq!(effect.change, StateChange::Deleted);
        assert_eq!(effect.output, 0);
    }

    #[test]
    fn persisted_shape() {
        let json = serde_json::to_value(Counter { value: 4 }).ok();
        assert_eq!(json, Some(serde_json::json!({"value": 4})));
    }
}
