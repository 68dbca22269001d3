//! Call summary aggregation.
//!
//! A finished call's summary is built from its children: their summaries
//! are merged leaf by leaf, numbers summed. A call without children whose
//! output looks like an LLM response (`usage` and `model` present) gets a
//! per-model usage summary instead.
//!
//! Leaf rules when two summaries meet:
//!
//! | left      | right     | result                                  |
//! |-----------|-----------|-----------------------------------------|
//! | integer   | integer   | integer sum (float sum on overflow)     |
//! | number    | number    | float sum                               |
//! | object    | object    | merged recursively                      |
//! | missing   | anything  | copied                                  |
//! | otherwise |           | right side wins                         |

use serde_json::{Map, Number, Value as JsonValue};
use weave_serialize::plain_json;
use weave_types::Value;

pub type Summary = Map<String, JsonValue>;

fn add_numbers(a: &Number, b: &Number) -> JsonValue {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return JsonValue::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map_or(JsonValue::Null, JsonValue::Number)
}

fn merge_value(into: &mut JsonValue, other: &JsonValue) {
    match (&mut *into, other) {
        (JsonValue::Number(a), JsonValue::Number(b)) => {
            *into = add_numbers(a, b);
        }
        (JsonValue::Object(a), JsonValue::Object(b)) => merge_into(a, b),
        (_, b) => *into = b.clone(),
    }
}

/// Merge `other` into `into` leaf by leaf.
pub fn merge_into(into: &mut Summary, other: &Summary) {
    for (key, value) in other {
        match into.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                into.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge summaries in order.
pub fn sum_summaries<'a>(summaries: impl IntoIterator<Item = &'a Summary>) -> Summary {
    let mut out = Summary::new();
    for summary in summaries {
        merge_into(&mut out, summary);
    }
    out
}

/// Plain JSON for usage data, with record metadata dropped.
fn usage_json(value: &Value) -> Option<Summary> {
    match value {
        Value::Dict(map) => Some(map.iter().map(|(k, v)| (k.clone(), plain_json(v))).collect()),
        Value::Object(rec) => Some(
            rec.fields()
                .iter()
                .map(|(k, v)| (k.clone(), plain_json(v)))
                .collect(),
        ),
        _ => None,
    }
}

/// `{"usage": {<model>: {"requests": 1, ...usage}}}` for an LLM-style
/// output, either a dict or a record with `usage` and `model` fields.
pub fn llm_usage_summary(output: &Value) -> Option<Summary> {
    let (usage, model) = match output {
        Value::Dict(map) => (map.get("usage")?, map.get("model")?),
        Value::Object(rec) => (rec.get("usage")?, rec.get("model")?),
        _ => return None,
    };
    let model = model.as_str()?;
    let mut per_model = Summary::new();
    per_model.insert("requests".into(), JsonValue::from(1));
    for (k, v) in usage_json(usage)? {
        per_model.insert(k, v);
    }
    let mut by_model = Summary::new();
    by_model.insert(model.to_string(), JsonValue::Object(per_model));
    let mut summary = Summary::new();
    summary.insert("usage".into(), JsonValue::Object(by_model));
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_types::ObjectRecord;

    fn map(v: JsonValue) -> Summary {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn numeric_leaves_are_summed() {
        let a = map(json!({"tokens": 5, "usage": {"gpt": {"requests": 1, "cost": 0.5}}}));
        let b = map(json!({"tokens": 2, "usage": {"gpt": {"requests": 2, "cost": 1}}}));
        let sum = sum_summaries([&a, &b]);
        assert_eq!(
            JsonValue::Object(sum),
            json!({"tokens": 7, "usage": {"gpt": {"requests": 3, "cost": 1.5}}})
        );
    }

    #[test]
    fn integers_stay_integers() {
        let sum = sum_summaries([&map(json!({"n": 1})), &map(json!({"n": 2}))]);
        assert!(sum["n"].is_i64());
        let overflow = sum_summaries([&map(json!({"n": i64::MAX})), &map(json!({"n": 1}))]);
        assert!(overflow["n"].is_f64());
    }

    #[test]
    fn one_sided_keys_are_copied_and_conflicts_take_the_later_value() {
        let a = map(json!({"only_a": 1, "status": "running", "mixed": 3}));
        let b = map(json!({"only_b": {"x": 1}, "status": "done", "mixed": {"y": 1}}));
        let sum = sum_summaries([&a, &b]);
        assert_eq!(
            JsonValue::Object(sum),
            json!({"only_a": 1, "only_b": {"x": 1}, "status": "done", "mixed": {"y": 1}})
        );
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(sum_summaries(std::iter::empty()).is_empty());
    }

    #[test]
    fn dict_llm_output() {
        let output = Value::dict([
            ("model", Value::from("gpt-4o")),
            (
                "usage",
                Value::dict([("prompt_tokens", Value::Int(3)), ("completion_tokens", Value::Int(4))]),
            ),
        ]);
        let summary = llm_usage_summary(&output).unwrap();
        assert_eq!(
            JsonValue::Object(summary),
            json!({"usage": {"gpt-4o": {"requests": 1, "prompt_tokens": 3, "completion_tokens": 4}}})
        );
    }

    #[test]
    fn record_llm_output_adapts_usage() {
        let usage = ObjectRecord::new("Usage").with_field("total_tokens", 9);
        let output = ObjectRecord::new("ChatCompletion")
            .with_field("model", "claude")
            .with_field("usage", usage);
        let summary = llm_usage_summary(&output.into()).unwrap();
        assert_eq!(
            JsonValue::Object(summary),
            json!({"usage": {"claude": {"requests": 1, "total_tokens": 9}}})
        );
    }

    #[test]
    fn other_outputs_have_no_usage() {
        assert!(llm_usage_summary(&Value::Int(1)).is_none());
        assert!(llm_usage_summary(&Value::dict([("model", Value::from("m"))])).is_none());
    }
}
