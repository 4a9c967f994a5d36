//! Reassembly of streamed tool-call deltas into complete calls.

use std::collections::BTreeMap;

use serde_json::Value;

use sc_domain::stream::ToolCallDelta;
use sc_domain::tool::ToolCall;

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Collects [`ToolCallDelta`]s keyed by index. Id and name are taken from
/// the first delta that carries them; argument text is concatenated.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAssembler {
    pub fn push(&mut self, delta: ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();
        if entry.id.is_none() {
            entry.id = delta.id.filter(|s| !s.is_empty());
        }
        if entry.name.is_none() {
            entry.name = delta.name.filter(|s| !s.is_empty());
        }
        entry.args.push_str(&delta.args_delta);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order. Calls that never received a name
    /// are dropped; arguments that are empty or not valid JSON become `{}`.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter_map(|(index, partial)| {
                let Some(tool_name) = partial.name else {
                    tracing::warn!(index, "dropping tool call without a name");
                    return None;
                };
                let call_id = partial
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().as_simple()));
                let arguments = parse_arguments(&call_id, &tool_name, &partial.args);
                Some(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

fn parse_arguments(call_id: &str, tool_name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        Ok(other) => {
            tracing::warn!(
                call_id = %call_id,
                tool = %tool_name,
                kind = %json_kind(&other),
                "tool call arguments are not an object; defaulting to empty object"
            );
            Value::Object(Default::default())
        }
        Err(e) => {
            tracing::warn!(
                call_id = %call_id,
                tool = %tool_name,
                error = %e,
                "tool call arguments are not valid JSON; defaulting to empty object"
            );
            Value::Object(Default::default())
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
