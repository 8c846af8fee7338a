use serde_yaml::Value;
use std::collections::HashMap;

/// Appends every string scalar in `value` accepted by `is_directive`, in
/// document order, skipping ones already in `out`
pub fn collect_directives<F>(value: &Value, is_directive: &F, out: &mut Vec<String>)
where
    F: Fn(&str) -> bool,
{
    match value {
        Value::String(s) => {
            if is_directive(s) && !out.iter().any(|seen| seen == s) {
                out.push(s.clone());
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect_directives(item, is_directive, out);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map {
                collect_directives(item, is_directive, out);
            }
        }
        Value::Tagged(tagged) => collect_directives(&tagged.value, is_directive, out),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Replaces string scalars found in `replacements`
pub fn substitute(value: &mut Value, replacements: &HashMap<String, String>) {
    match value {
        Value::String(s) => {
            if let Some(replacement) = replacements.get(s.as_str()) {
                *s = replacement.clone();
            }
        }
        Value::Sequence(items) => {
            for item in items {
                substitute(item, replacements);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute(item, replacements);
            }
        }
        Value::Tagged(tagged) => substitute(&mut tagged.value, replacements),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
