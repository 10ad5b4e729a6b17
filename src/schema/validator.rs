use std::fmt;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// One grammar violation, addressed by a JSON path into the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: if path.is_empty() {
                "$".to_owned()
            } else {
                format!("${path}")
            },
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug)]
pub enum SchemaCompileError {
    NotAnObject { found: String },
    UnknownType { name: String },
    InvalidPattern { pattern: String, detail: String },
    InvalidKeyword { keyword: String, detail: String },
}

impl fmt::Display for SchemaCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaCompileError::NotAnObject { found } => {
                write!(f, "schema must be an object or boolean, found {found}")
            }
            SchemaCompileError::UnknownType { name } => {
                write!(f, "unknown schema type `{name}`")
            }
            SchemaCompileError::InvalidPattern { pattern, detail } => {
                write!(f, "invalid schema pattern `{pattern}`: {detail}")
            }
            SchemaCompileError::InvalidKeyword { keyword, detail } => {
                write!(f, "invalid `{keyword}` keyword: {detail}")
            }
        }
    }
}

impl std::error::Error for SchemaCompileError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    fn parse(name: &str) -> Result<Self, SchemaCompileError> {
        match name {
            "null" => Ok(JsonType::Null),
            "boolean" => Ok(JsonType::Boolean),
            "integer" => Ok(JsonType::Integer),
            "number" => Ok(JsonType::Number),
            "string" => Ok(JsonType::String),
            "array" => Ok(JsonType::Array),
            "object" => Ok(JsonType::Object),
            other => Err(SchemaCompileError::UnknownType {
                name: other.to_owned(),
            }),
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            JsonType::Null => value.is_null(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Integer => value.is_i64() || value.is_u64(),
            JsonType::Number => value.is_number(),
            JsonType::String => value.is_string(),
            JsonType::Array => value.is_array(),
            JsonType::Object => value.is_object(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }
}

#[derive(Debug)]
enum Additional {
    Allow,
    Deny,
    Schema(Box<Node>),
}

/// A schema keyword set compiled for repeated validation. Covers the draft-07
/// subset the engine's grammar and module schemas actually use.
#[derive(Debug)]
struct Node {
    types: Option<Vec<JsonType>>,
    enum_values: Option<Vec<Value>>,
    const_value: Option<Value>,
    properties: Vec<(String, Node)>,
    pattern_properties: Vec<(Regex, Node)>,
    required: Vec<String>,
    additional: Additional,
    items: Option<Box<Node>>,
    pattern: Option<Regex>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min_items: Option<usize>,
    max_items: Option<usize>,
    any_of: Vec<Node>,
    all_of: Vec<Node>,
    one_of: Vec<Node>,
}

#[derive(Debug)]
pub struct CompiledSchema {
    root: Node,
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self, SchemaCompileError> {
        Ok(Self {
            root: compile_node(schema)?,
        })
    }

    pub fn validate(&self, value: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        validate_node(&self.root, value, "", &mut violations);
        violations
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_empty()
    }
}

fn compile_node(schema: &Value) -> Result<Node, SchemaCompileError> {
    let empty = serde_json::Map::new();
    let entries = match schema {
        Value::Object(entries) => entries,
        // `true` accepts anything, `false` rejects everything.
        Value::Bool(true) => &empty,
        Value::Bool(false) => {
            let mut node = empty_node();
            node.enum_values = Some(Vec::new());
            return Ok(node);
        }
        other => {
            return Err(SchemaCompileError::NotAnObject {
                found: type_name(other).to_owned(),
            })
        }
    };

    let mut node = empty_node();

    if let Some(types) = entries.get("type") {
        let names: Vec<&str> = match types {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
            other => {
                return Err(SchemaCompileError::InvalidKeyword {
                    keyword: "type".to_owned(),
                    detail: format!("expected string or array, found {}", type_name(other)),
                })
            }
        };
        node.types = Some(
            names
                .into_iter()
                .map(JsonType::parse)
                .collect::<Result<Vec<_>, _>>()?,
        );
    }

    if let Some(Value::Array(values)) = entries.get("enum") {
        node.enum_values = Some(values.clone());
    }
    if let Some(value) = entries.get("const") {
        node.const_value = Some(value.clone());
    }

    if let Some(Value::Object(properties)) = entries.get("properties") {
        for (name, sub) in properties {
            node.properties.push((name.clone(), compile_node(sub)?));
        }
    }
    if let Some(Value::Object(patterns)) = entries.get("patternProperties") {
        for (pattern, sub) in patterns {
            let regex = Regex::new(pattern).map_err(|err| SchemaCompileError::InvalidPattern {
                pattern: pattern.clone(),
                detail: err.to_string(),
            })?;
            node.pattern_properties.push((regex, compile_node(sub)?));
        }
    }
    if let Some(Value::Array(required)) = entries.get("required") {
        node.required = required
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
    }
    match entries.get("additionalProperties") {
        None | Some(Value::Bool(true)) => {}
        Some(Value::Bool(false)) => node.additional = Additional::Deny,
        Some(sub) => node.additional = Additional::Schema(Box::new(compile_node(sub)?)),
    }
    if let Some(items) = entries.get("items") {
        node.items = Some(Box::new(compile_node(items)?));
    }

    if let Some(pattern) = entries.get("pattern").and_then(Value::as_str) {
        node.pattern = Some(Regex::new(pattern).map_err(|err| {
            SchemaCompileError::InvalidPattern {
                pattern: pattern.to_owned(),
                detail: err.to_string(),
            }
        })?);
    }
    node.minimum = entries.get("minimum").and_then(Value::as_f64);
    node.maximum = entries.get("maximum").and_then(Value::as_f64);
    node.min_length = entries.get("minLength").and_then(as_usize);
    node.max_length = entries.get("maxLength").and_then(as_usize);
    node.min_items = entries.get("minItems").and_then(as_usize);
    node.max_items = entries.get("maxItems").and_then(as_usize);

    if let Some(Value::Array(subs)) = entries.get("anyOf") {
        node.any_of = compile_nodes(subs)?;
    }
    if let Some(Value::Array(subs)) = entries.get("allOf") {
        node.all_of = compile_nodes(subs)?;
    }
    if let Some(Value::Array(subs)) = entries.get("oneOf") {
        node.one_of = compile_nodes(subs)?;
    }

    Ok(node)
}

fn compile_nodes(subs: &[Value]) -> Result<Vec<Node>, SchemaCompileError> {
    subs.iter().map(compile_node).collect()
}

fn empty_node() -> Node {
    Node {
        types: None,
        enum_values: None,
        const_value: None,
        properties: Vec::new(),
        pattern_properties: Vec::new(),
        required: Vec::new(),
        additional: Additional::Allow,
        items: None,
        pattern: None,
        minimum: None,
        maximum: None,
        min_length: None,
        max_length: None,
        min_items: None,
        max_items: None,
        any_of: Vec::new(),
        all_of: Vec::new(),
        one_of: Vec::new(),
    }
}

fn validate_node(node: &Node, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
    if let Some(types) = &node.types {
        if !types.iter().any(|t| t.matches(value)) {
            let expected = types
                .iter()
                .map(|t| t.label())
                .collect::<Vec<_>>()
                .join(" or ");
            out.push(SchemaViolation::new(
                path,
                format!("expected {expected}, found {}", type_name(value)),
            ));
            return;
        }
    }

    if let Some(allowed) = &node.enum_values {
        if !allowed.contains(value) {
            let rendered = allowed
                .iter()
                .map(render_compact)
                .collect::<Vec<_>>()
                .join(", ");
            out.push(SchemaViolation::new(
                path,
                format!("value must be one of: {rendered}"),
            ));
        }
    }
    if let Some(expected) = &node.const_value {
        if expected != value {
            out.push(SchemaViolation::new(
                path,
                format!("value must equal {}", render_compact(expected)),
            ));
        }
    }

    if let Value::Object(entries) = value {
        for name in &node.required {
            if !entries.contains_key(name) {
                out.push(SchemaViolation::new(
                    path,
                    format!("missing required property `{name}`"),
                ));
            }
        }
        for (key, entry) in entries {
            let entry_path = format!("{path}.{key}");
            let mut matched = false;
            if let Some((_, sub)) = node.properties.iter().find(|(name, _)| name == key) {
                matched = true;
                validate_node(sub, entry, &entry_path, out);
            }
            for (regex, sub) in &node.pattern_properties {
                if regex.is_match(key) {
                    matched = true;
                    validate_node(sub, entry, &entry_path, out);
                }
            }
            if !matched {
                match &node.additional {
                    Additional::Allow => {}
                    Additional::Deny => out.push(SchemaViolation::new(
                        path,
                        format!("unknown property `{key}`"),
                    )),
                    Additional::Schema(sub) => validate_node(sub, entry, &entry_path, out),
                }
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(min) = node.min_items {
            if items.len() < min {
                out.push(SchemaViolation::new(
                    path,
                    format!("expected at least {min} items, found {}", items.len()),
                ));
            }
        }
        if let Some(max) = node.max_items {
            if items.len() > max {
                out.push(SchemaViolation::new(
                    path,
                    format!("expected at most {max} items, found {}", items.len()),
                ));
            }
        }
        if let Some(sub) = &node.items {
            for (index, item) in items.iter().enumerate() {
                validate_node(sub, item, &format!("{path}[{index}]"), out);
            }
        }
    }

    if let Value::String(text) = value {
        if let Some(regex) = &node.pattern {
            if !regex.is_match(text) {
                out.push(SchemaViolation::new(
                    path,
                    format!("string does not match pattern `{}`", regex.as_str()),
                ));
            }
        }
        let chars = text.chars().count();
        if let Some(min) = node.min_length {
            if chars < min {
                out.push(SchemaViolation::new(
                    path,
                    format!("string shorter than {min} characters"),
                ));
            }
        }
        if let Some(max) = node.max_length {
            if chars > max {
                out.push(SchemaViolation::new(
                    path,
                    format!("string longer than {max} characters"),
                ));
            }
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = node.minimum {
            if number < min {
                out.push(SchemaViolation::new(path, format!("value below minimum {min}")));
            }
        }
        if let Some(max) = node.maximum {
            if number > max {
                out.push(SchemaViolation::new(path, format!("value above maximum {max}")));
            }
        }
    }

    for sub in &node.all_of {
        validate_node(sub, value, path, out);
    }
    if !node.any_of.is_empty() {
        let matched = node.any_of.iter().any(|sub| {
            let mut scratch = Vec::new();
            validate_node(sub, value, path, &mut scratch);
            scratch.is_empty()
        });
        if !matched {
            out.push(SchemaViolation::new(
                path,
                "value does not match any allowed variant",
            ));
        }
    }
    if !node.one_of.is_empty() {
        let matches = node
            .one_of
            .iter()
            .filter(|sub| {
                let mut scratch = Vec::new();
                validate_node(sub, value, path, &mut scratch);
                scratch.is_empty()
            })
            .count();
        if matches != 1 {
            out.push(SchemaViolation::new(
                path,
                format!("value must match exactly one variant, matched {matches}"),
            ));
        }
    }
}

fn as_usize(value: &Value) -> Option<usize> {
    value.as_u64().map(|v| v as usize)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn render_compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
