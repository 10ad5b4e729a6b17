use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Characters permitted inside a `${...}` reference. Kept deliberately wide
/// so that future query forms fail to *resolve* rather than fail to *parse*.
const TOKEN_PATTERN: &str = r"\$\{([A-Za-z0-9._\[\]*@?><=!]+)\}";

static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();
static EXACT_REGEX: OnceLock<Regex> = OnceLock::new();

fn token_regex() -> &'static Regex {
    TOKEN_REGEX.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("invalid token pattern"))
}

fn exact_regex() -> &'static Regex {
    EXACT_REGEX
        .get_or_init(|| Regex::new(&format!("^{TOKEN_PATTERN}$")).expect("invalid token pattern"))
}

/// Expands `${path}` references in `value` against `data`.
///
/// A string that consists of exactly one token returns the referenced value
/// with its original type; strings with embedded tokens substitute each
/// token's string coercion. Sequences and mappings resolve element-wise and
/// value-wise. Unresolved paths degrade to `Null` (exact token) or the empty
/// string (embedded token); resolution itself never fails.
pub fn resolve(data: &Value, value: &Value) -> Value {
    match value {
        Value::String(text) => resolve_string(data, text),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve(data, item)).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), resolve(data, item)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Convenience form for mapping-shaped inputs (task args, expect, set).
pub fn resolve_map(data: &Value, entries: &Map<String, Value>) -> Value {
    resolve(data, &Value::Object(entries.clone()))
}

fn resolve_string(data: &Value, text: &str) -> Value {
    if let Some(captures) = exact_regex().captures(text) {
        let path = &captures[1];
        return query(data, path).into_iter().next().unwrap_or(Value::Null);
    }

    if !text.contains("${") {
        return Value::String(text.to_owned());
    }

    let replaced = token_regex().replace_all(text, |captures: &regex::Captures<'_>| {
        let resolved = query(data, &captures[1]).into_iter().next();
        coerce(resolved.as_ref())
    });
    Value::String(replaced.into_owned())
}

fn coerce(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Number(number)) => number.to_string(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    Member(String),
    Index(usize),
    Wildcard,
}

/// Evaluates the supported JSONPath subset (`a.b`, `a[0]`, `a[*]`, `a.*`)
/// against `data`. Returns every match in document order; queries using
/// unsupported syntax return no matches.
pub fn query(data: &Value, path: &str) -> Vec<Value> {
    let Some(steps) = parse_path(path) else {
        return Vec::new();
    };

    let mut current = vec![data];
    for step in &steps {
        let mut next = Vec::new();
        for value in current {
            match step {
                PathStep::Member(name) => {
                    if let Value::Object(entries) = value {
                        if let Some(found) = entries.get(name) {
                            next.push(found);
                        }
                    }
                }
                PathStep::Index(index) => {
                    if let Value::Array(items) = value {
                        if let Some(found) = items.get(*index) {
                            next.push(found);
                        }
                    }
                }
                PathStep::Wildcard => match value {
                    Value::Object(entries) => next.extend(entries.values()),
                    Value::Array(items) => next.extend(items.iter()),
                    _ => {}
                },
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }

    current.into_iter().cloned().collect()
}

fn parse_path(path: &str) -> Option<Vec<PathStep>> {
    let mut steps = Vec::new();
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        let (name, brackets) = match segment.find('[') {
            Some(at) => (&segment[..at], &segment[at..]),
            None => (segment, ""),
        };
        match name {
            "" => {
                if brackets.is_empty() {
                    return None;
                }
            }
            "*" => steps.push(PathStep::Wildcard),
            _ => {
                if !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return None;
                }
                steps.push(PathStep::Member(name.to_owned()));
            }
        }
        let mut rest = brackets;
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let inner = &rest[1..close];
            if inner == "*" {
                steps.push(PathStep::Wildcard);
            } else {
                steps.push(PathStep::Index(inner.parse().ok()?));
            }
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    if steps.is_empty() {
        return None;
    }
    Some(steps)
}

#[cfg(test)]
#[path = "tests/interpolate_tests.rs"]
mod tests;
