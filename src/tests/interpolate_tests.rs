use super::{query, resolve};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[test]
fn exact_token_preserves_value_type() {
    let data = json!({ "x": 42 });
    assert_eq!(resolve(&data, &json!("${x}")), json!(42));

    let data = json!({ "flag": true });
    assert_eq!(resolve(&data, &json!("${flag}")), json!(true));

    let data = json!({ "body": { "token": "xyz" } });
    assert_eq!(resolve(&data, &json!("${body.token}")), json!("xyz"));
}

#[test]
fn exact_token_returns_structures_uncoerced() {
    let data = json!({ "user": { "name": "ada", "roles": ["admin"] } });
    assert_eq!(
        resolve(&data, &json!("${user}")),
        json!({ "name": "ada", "roles": ["admin"] })
    );
}

#[test]
fn embedded_tokens_coerce_to_strings() {
    let data = json!({ "host": "localhost", "port": 8080 });
    assert_eq!(
        resolve(&data, &json!("http://${host}:${port}/status")),
        json!("http://localhost:8080/status")
    );
}

#[test]
fn unresolved_exact_token_is_null() {
    let data = json!({});
    assert_eq!(resolve(&data, &json!("${missing}")), Value::Null);
}

#[test]
fn unresolved_embedded_token_is_empty_string() {
    let data = json!({});
    assert_eq!(resolve(&data, &json!("x=${missing}!")), json!("x=!"));
}

#[test]
fn sequences_and_mappings_resolve_recursively() {
    let data = json!({ "a": 1, "b": "two" });
    let value = json!({
        "list": ["${a}", "${b}", "plain"],
        "nested": { "inner": "${a}" },
        "number": 7,
    });
    assert_eq!(
        resolve(&data, &value),
        json!({
            "list": [1, "two", "plain"],
            "nested": { "inner": 1 },
            "number": 7,
        })
    );
}

#[test]
fn untokened_values_pass_through_structurally_equal() {
    let data = json!({ "a": 1 });
    let value = json!({ "x": [1, 2, { "y": "text" }], "z": null });
    assert_eq!(resolve(&data, &value), value);
}

#[test]
fn indexed_and_wildcard_paths() {
    let data = json!({ "items": [{ "id": 1 }, { "id": 2 }] });
    assert_eq!(resolve(&data, &json!("${items[1].id}")), json!(2));
    assert_eq!(query(&data, "items[*].id"), vec![json!(1), json!(2)]);
}

#[test]
fn unsupported_filter_syntax_resolves_to_nothing() {
    let data = json!({ "items": [1, 2, 3] });
    assert_eq!(query(&data, "items[?@>1]"), Vec::<Value>::new());
    assert_eq!(resolve(&data, &json!("${items[?@>1]}")), Value::Null);
}

#[test]
fn embedded_structure_coerces_to_compact_json() {
    let data = json!({ "obj": { "k": 1 } });
    assert_eq!(
        resolve(&data, &json!("got ${obj}")),
        json!(r#"got {"k":1}"#)
    );
}
