//! `{{ path }}` template resolution against a block's merged input.
//!
//! Paths are dotted lookups into the merged input object, e.g.
//! `{{ input.topic }}` or `{{ inputs.summarize }}`. Unknown references are
//! left as-is (not an error).

use serde_json::Value;

/// Look up a dotted path (`a.b.0.c`) in a JSON value. Numeric segments
/// index into arrays.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Render a JSON value for interpolation: strings verbatim, everything else
/// as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace every resolvable `{{ path }}` marker in `template`.
pub fn render(template: &str, scope: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            // Unterminated marker: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let expr = after_open[..end].trim();
        match lookup_path(scope, expr) {
            Some(value) if !expr.is_empty() => out.push_str(&value_to_string(value)),
            _ => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}
