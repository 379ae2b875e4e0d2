use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Element, Value};
use crate::trigger::Trigger;

/// Latest decoded value of one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElementState {
    pub value: Option<Value>,
    pub valid: Option<bool>,
    pub time: Option<DateTime<Utc>>,
    pub trigger: Option<Trigger>,
    /// The value before the most recent change, and when it was recorded.
    pub previous_value: Option<Value>,
    pub previous_time: Option<DateTime<Utc>>,
    pub update_count: u64,
}

impl ElementState {
    /// Record a newly decoded value.
    ///
    /// The previous value only moves when the value changes, so repeated identical values
    /// leave it pointing at the last distinct value.
    pub fn update(
        &mut self,
        time: DateTime<Utc>,
        trigger: Trigger,
        value: Value,
        valid: Option<bool>,
    ) {
        if self.value.is_some() && self.value != Some(value) {
            self.previous_value = self.value;
            self.previous_time = self.time;
        }
        self.value = Some(value);
        self.valid = valid;
        self.time = Some(time);
        self.trigger = Some(trigger);
        self.update_count += 1;
    }

    /// Snapshot for delivery to consumers, or `None` if nothing has been decoded yet.
    #[must_use]
    pub fn snapshot(&self, element: &Element) -> Option<ElementUpdate> {
        let value = self.value?;
        Some(ElementUpdate {
            id: element.id.clone(),
            value,
            formatted: element.formatter.format(&value),
            valid: self.valid,
            unit: element.unit.clone(),
            time: self.time,
            trigger: self.trigger.clone(),
            previous_value: self.previous_value,
            previous_formatted: self.previous_value.map(|v| element.formatter.format(&v)),
            previous_time: self.previous_time,
            update_count: self.update_count,
        })
    }
}

/// Element state as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementUpdate {
    pub id: String,
    pub value: Value,
    pub formatted: String,
    pub valid: Option<bool>,
    pub unit: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub trigger: Option<Trigger>,
    pub previous_value: Option<Value>,
    pub previous_formatted: Option<String>,
    pub previous_time: Option<DateTime<Utc>>,
    pub update_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn previous_moves_only_on_change() {
        let mut state = ElementState::default();
        let trigger = Trigger::every_minor_frame(60);

        state.update(at(1), trigger.clone(), Value::Int(5), None);
        assert_eq!(state.previous_value, None);

        state.update(at(2), trigger.clone(), Value::Int(5), None);
        assert_eq!(state.previous_value, None, "same value is not a change");

        state.update(at(3), trigger.clone(), Value::Int(6), Some(true));
        assert_eq!(state.previous_value, Some(Value::Int(5)));
        assert_eq!(state.previous_time, Some(at(2)));

        state.update(at(4), trigger, Value::Int(6), Some(false));
        assert_eq!(state.previous_value, Some(Value::Int(5)));
        assert_eq!(state.value, Some(Value::Int(6)));
        assert_eq!(state.valid, Some(false));
        assert_eq!(state.update_count, 4);
    }

    #[test]
    fn snapshot_formats_both_values() {
        let element = Element::builder()
            .id("mode")
            .positions(
                crate::position::OffsetSpec::bytes(&[3.into()])
                    .unwrap()
                    .into(),
            )
            .formatter(Box::new(crate::element::OptionFormatter::new(&["a", "b"])))
            .build();
        let mut state = ElementState::default();
        assert!(state.snapshot(&element).is_none());

        state.update(at(1), Trigger::minor_frame(0, 3), Value::Int(0), None);
        state.update(at(2), Trigger::minor_frame(1, 3), Value::Int(1), None);

        let update = state.snapshot(&element).unwrap();
        assert_eq!(update.id, "mode");
        assert_eq!(update.formatted, "b");
        assert_eq!(update.previous_formatted.as_deref(), Some("a"));
        assert_eq!(update.trigger, Some(Trigger::minor_frame(1, 3)));
    }
}
