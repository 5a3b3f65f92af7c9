use serde_json::{Map, Value, json};

use crate::structure::{
    KIND_CLASS, KIND_FUNCTION, KIND_IF_STATEMENT, KIND_METHOD, KIND_SOURCE_FILE, render,
};
use crate::syntax::SyntaxTree;

/// Recursively lift opaque statement strings into extended structures. A
/// string whose first meaningful statement is an if-statement with a braced
/// body becomes `{kind: "IfStatement", expression, thenStatement,
/// elseStatement}`; the then-branch is expanded recursively, the else-branch
/// is kept as raw text (known asymmetry, preserved on purpose). Everything
/// else passes through unchanged.
pub fn expand(value: Value) -> Value {
    match value {
        Value::String(text) => expand_fragment(text),
        Value::Object(map) => Value::Object(expand_map(map)),
        other => other,
    }
}

/// Inverse of `expand`: renders extended if-statements back to text inside
/// statement lists so only model-native shapes remain. `collapse(expand(s))`
/// reproduces `s` up to whitespace.
pub fn collapse(value: Value) -> Value {
    match value {
        Value::Object(map) => collapse_map(map),
        other => other,
    }
}

fn expand_fragment(text: String) -> Value {
    let Ok(tree) = SyntaxTree::parse(&text) else {
        return Value::String(text);
    };
    let Some(&first) = tree
        .children(tree.root())
        .iter()
        .find(|&&child| tree.kind(child) != "comment")
    else {
        return Value::String(text);
    };
    if tree.kind(first) != "if_statement" {
        return Value::String(text);
    }

    let Some(condition) = tree.child_by_field(first, "condition") else {
        return Value::String(text);
    };
    let expression = tree
        .children(condition)
        .first()
        .map(|&inner| tree.node_full_text(inner).to_string())
        .unwrap_or_else(|| tree.node_text(condition).to_string());

    // Only braced then-branches decompose; a bare `if (x) stmt;` stays text.
    let Some(consequence) = tree.child_by_field(first, "consequence") else {
        return Value::String(text);
    };
    if tree.kind(consequence) != "statement_block" {
        return Value::String(text);
    }
    let then_statements: Vec<Value> = tree
        .children(consequence)
        .iter()
        .filter(|&&child| tree.kind(child) != "comment")
        .map(|&child| expand_fragment(tree.node_full_text(child).to_string()))
        .collect();

    let else_statement = tree
        .child_by_field(first, "alternative")
        .and_then(|alternative| tree.children(alternative).first().copied())
        .map(|body| Value::String(tree.node_full_text(body).to_string()))
        .unwrap_or(Value::Null);

    json!({
        "kind": KIND_IF_STATEMENT,
        "expression": expression,
        "thenStatement": then_statements,
        "elseStatement": else_statement,
    })
}

fn expand_map(mut map: Map<String, Value>) -> Map<String, Value> {
    match map.get("kind").and_then(Value::as_str) {
        Some(KIND_SOURCE_FILE) | Some(KIND_FUNCTION) | Some(KIND_METHOD) => {
            expand_statement_array(&mut map, "statements");
        }
        Some(KIND_CLASS) => {
            if let Some(Value::Array(methods)) = map.remove("methods") {
                let expanded = methods
                    .into_iter()
                    .map(|method| match method {
                        Value::Object(method) => Value::Object(expand_map(method)),
                        other => other,
                    })
                    .collect();
                map.insert("methods".to_string(), Value::Array(expanded));
            }
        }
        _ => {}
    }
    map
}

fn expand_statement_array(map: &mut Map<String, Value>, key: &str) {
    if let Some(Value::Array(statements)) = map.remove(key) {
        let expanded = statements.into_iter().map(expand).collect();
        map.insert(key.to_string(), Value::Array(expanded));
    }
}

fn collapse_map(mut map: Map<String, Value>) -> Value {
    if map.get("kind").and_then(Value::as_str) == Some(KIND_IF_STATEMENT) {
        if let Some(Value::Array(statements)) = map.remove("thenStatement") {
            let collapsed = statements
                .into_iter()
                .map(|statement| Value::String(render(&collapse(statement))))
                .collect();
            map.insert("thenStatement".to_string(), Value::Array(collapsed));
        }
        return Value::String(render(&Value::Object(map)));
    }

    match map.get("kind").and_then(Value::as_str) {
        Some(KIND_SOURCE_FILE) | Some(KIND_FUNCTION) | Some(KIND_METHOD) => {
            if let Some(Value::Array(statements)) = map.remove("statements") {
                let collapsed = statements.into_iter().map(collapse).collect();
                map.insert("statements".to_string(), Value::Array(collapsed));
            }
        }
        Some(KIND_CLASS) => {
            if let Some(Value::Array(methods)) = map.remove("methods") {
                let collapsed = methods.into_iter().map(collapse).collect();
                map.insert("methods".to_string(), Value::Array(collapsed));
            }
        }
        _ => {}
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::project;

    #[test]
    fn expands_if_statement_fragment() {
        let value = expand(Value::String("if (x) { a(); b(); }".to_string()));
        assert_eq!(value["kind"], KIND_IF_STATEMENT);
        assert_eq!(value["expression"], "x");
        let then_branch = value["thenStatement"].as_array().expect("then branch");
        assert_eq!(then_branch.len(), 2);
        assert!(then_branch[0].as_str().expect("statement text").contains("a();"));
        assert!(value["elseStatement"].is_null());
    }

    #[test]
    fn keeps_else_branch_as_raw_text() {
        let value = expand(Value::String("if (x) { a(); } else { c(); }".to_string()));
        let else_branch = value["elseStatement"].as_str().expect("else text");
        assert!(else_branch.contains("c();"));
    }

    #[test]
    fn non_conditional_fragment_passes_through() {
        let value = expand(Value::String("const a = 1;".to_string()));
        assert_eq!(value, Value::String("const a = 1;".to_string()));
    }

    #[test]
    fn collapse_reverses_expansion() {
        let original = "if (x) { a(); b(); }";
        let expanded = expand(Value::String(original.to_string()));
        let collapsed = collapse(expanded);
        let text = collapsed.as_str().expect("collapsed text");

        let reparsed = SyntaxTree::parse(text).expect("reparse");
        let statement = reparsed.children(reparsed.root())[0];
        assert_eq!(reparsed.kind(statement), "if_statement");
        let position_a = text.find("a();").expect("first statement kept");
        let position_b = text.find("b();").expect("second statement kept");
        assert!(position_a < position_b);
    }

    #[test]
    fn expands_statement_lists_inside_projections() {
        let source = "function run() {\n    if (ready) { start(); }\n}\n";
        let tree = SyntaxTree::parse(source).expect("parse");
        let expanded = expand(project(&tree, tree.root()));

        let statements = expanded["statements"].as_array().expect("statements");
        assert_eq!(statements.len(), 1);
        // The function itself is an opaque string at file level; nested
        // expansion happens when the function node is projected directly.
        let function = tree
            .children(tree.root())
            .iter()
            .copied()
            .find(|&id| tree.kind(id) == "function_declaration")
            .expect("function");
        let expanded_function = expand(project(&tree, function));
        let body = expanded_function["statements"]
            .as_array()
            .expect("function body");
        assert_eq!(body[0]["kind"], KIND_IF_STATEMENT);
    }
}
