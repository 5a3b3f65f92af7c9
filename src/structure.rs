use serde_json::{Map, Value, json};

use crate::syntax::{NodeId, SyntaxTree};

pub const KIND_SOURCE_FILE: &str = "SourceFile";
pub const KIND_FUNCTION: &str = "FunctionDeclaration";
pub const KIND_CLASS: &str = "ClassDeclaration";
pub const KIND_METHOD: &str = "MethodDeclaration";
pub const KIND_IF_STATEMENT: &str = "IfStatement";

/// Whether a node kind has a structural codec (read and write). Nodes without
/// one project to the `{kindName, fullText, text}` fallback and can only be
/// reconciled textually.
pub fn supports_structural_write(kind: &str) -> bool {
    matches!(kind, "program" | "function_declaration" | "class_declaration")
}

/// Project a node into its serializable structure. Structural kinds carry a
/// `kind` tag in addition to `kindName`; everything else degrades to the
/// textual fallback. Pure with respect to the tree.
pub fn project(tree: &SyntaxTree, id: NodeId) -> Value {
    match tree.kind(id) {
        "program" => json!({
            "kind": KIND_SOURCE_FILE,
            "kindName": tree.kind_name(id),
            "statements": statement_list(tree, id),
        }),
        "function_declaration" => project_function(tree, id),
        "class_declaration" => project_class(tree, id).unwrap_or_else(|| fallback(tree, id)),
        _ => fallback(tree, id),
    }
}

fn fallback(tree: &SyntaxTree, id: NodeId) -> Value {
    json!({
        "kindName": tree.kind_name(id),
        "fullText": tree.node_full_text(id),
        "text": tree.node_text(id),
    })
}

/// Full-text strings for the statement-like children of a node. Comment
/// nodes are skipped because their text already rides along as leading
/// trivia of the statement after them; trailing comments with no following
/// statement are kept so they survive a structural rewrite.
fn statement_list(tree: &SyntaxTree, id: NodeId) -> Vec<Value> {
    let children = tree.children(id);
    let last_statement = children
        .iter()
        .rposition(|&child| tree.kind(child) != "comment");
    children
        .iter()
        .enumerate()
        .filter(|&(index, &child)| {
            tree.kind(child) != "comment" || last_statement.map_or(true, |last| index > last)
        })
        .map(|(_, &child)| Value::String(tree.node_full_text(child).to_string()))
        .collect()
}

fn project_function(tree: &SyntaxTree, id: NodeId) -> Value {
    let name = tree
        .child_by_field(id, "name")
        .map(|child| tree.node_text(child).to_string())
        .unwrap_or_default();
    let statements = tree
        .child_by_field(id, "body")
        .map(|body| statement_list(tree, body))
        .unwrap_or_default();
    json!({
        "kind": KIND_FUNCTION,
        "kindName": tree.kind_name(id),
        "name": name,
        "isAsync": tree.node_text(id).starts_with("async"),
        "parameters": parameter_list(tree, id),
        "returnType": annotation_text(tree, id, "return_type"),
        "statements": statements,
    })
}

/// Classes project structurally only when every member is a method (or a
/// comment); mixed member lists fall back to text so member order is never
/// scrambled by a rewrite.
fn project_class(tree: &SyntaxTree, id: NodeId) -> Option<Value> {
    let body = tree.child_by_field(id, "body")?;
    let mut methods = Vec::new();
    for &member in tree.children(body) {
        match tree.kind(member) {
            "method_definition" => methods.push(project_method(tree, member)),
            "comment" => {}
            _ => return None,
        }
    }
    let name = tree
        .child_by_field(id, "name")
        .map(|child| tree.node_text(child).to_string())
        .unwrap_or_default();
    Some(json!({
        "kind": KIND_CLASS,
        "kindName": tree.kind_name(id),
        "name": name,
        "methods": methods,
    }))
}

fn project_method(tree: &SyntaxTree, id: NodeId) -> Value {
    let name = tree
        .child_by_field(id, "name")
        .map(|child| tree.node_text(child).to_string())
        .unwrap_or_default();
    let statements = tree
        .child_by_field(id, "body")
        .map(|body| statement_list(tree, body))
        .unwrap_or_default();
    let text = tree.node_text(id);
    json!({
        "kind": KIND_METHOD,
        "kindName": tree.kind_name(id),
        "name": name,
        "isAsync": text.starts_with("async ") || text.starts_with("static async "),
        "isStatic": text.starts_with("static "),
        "parameters": parameter_list(tree, id),
        "returnType": annotation_text(tree, id, "return_type"),
        "statements": statements,
    })
}

fn parameter_list(tree: &SyntaxTree, id: NodeId) -> Vec<Value> {
    let Some(parameters) = tree.child_by_field(id, "parameters") else {
        return Vec::new();
    };
    tree.children(parameters)
        .iter()
        .filter(|&&param| tree.kind(param) != "comment")
        .map(|&param| {
            let name = tree
                .child_by_field(param, "pattern")
                .map(|child| tree.node_text(child).to_string())
                .unwrap_or_else(|| tree.node_text(param).to_string());
            json!({
                "name": name,
                "type": annotation_value(tree, param),
                "hasQuestionToken": tree.kind(param) == "optional_parameter",
            })
        })
        .collect()
}

fn annotation_value(tree: &SyntaxTree, id: NodeId) -> Value {
    match annotation_text(tree, id, "type") {
        Some(text) => Value::String(text),
        None => Value::Null,
    }
}

fn annotation_text(tree: &SyntaxTree, id: NodeId, field: &str) -> Option<String> {
    let annotation = tree.child_by_field(id, field)?;
    Some(
        tree.node_text(annotation)
            .trim_start_matches(':')
            .trim()
            .to_string(),
    )
}

/// Render a structure back to source text. Inverse of `project` up to
/// whitespace; extended if-statement structures are rendered too so a
/// collapsed tree and a raw script result both go through one door.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => render_map(map),
        other => other.to_string(),
    }
}

fn render_map(map: &Map<String, Value>) -> String {
    match map.get("kind").and_then(Value::as_str) {
        Some(KIND_SOURCE_FILE) => join_statements(map.get("statements")),
        Some(KIND_FUNCTION) => render_function(map),
        Some(KIND_CLASS) => render_class(map),
        Some(KIND_METHOD) => render_method(map),
        Some(KIND_IF_STATEMENT) => render_if(map),
        _ => map
            .get("fullText")
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn render_function(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    if bool_field(map, "isAsync") {
        out.push_str("async ");
    }
    out.push_str("function ");
    out.push_str(str_field(map, "name"));
    render_signature(map, &mut out);
    out.push_str(" {\n");
    out.push_str(&join_statements(map.get("statements")));
    out.push_str("\n}");
    out
}

fn render_class(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    out.push_str("class ");
    out.push_str(str_field(map, "name"));
    out.push_str(" {\n");
    if let Some(Value::Array(methods)) = map.get("methods") {
        for method in methods {
            out.push_str(&render(method));
            out.push('\n');
        }
    }
    out.push('}');
    out
}

fn render_method(map: &Map<String, Value>) -> String {
    let mut out = String::new();
    if bool_field(map, "isStatic") {
        out.push_str("static ");
    }
    if bool_field(map, "isAsync") {
        out.push_str("async ");
    }
    out.push_str(str_field(map, "name"));
    render_signature(map, &mut out);
    out.push_str(" {\n");
    out.push_str(&join_statements(map.get("statements")));
    out.push_str("\n}");
    out
}

fn render_if(map: &Map<String, Value>) -> String {
    let expression = str_field(map, "expression");
    let then_text = join_statements(map.get("thenStatement"));
    match map.get("elseStatement").and_then(Value::as_str) {
        Some(alternative) => {
            format!("if ({expression}) {{\n{then_text}\n}} else {alternative}")
        }
        None => format!("if ({expression}) {{\n{then_text}\n}}"),
    }
}

fn render_signature(map: &Map<String, Value>, out: &mut String) {
    out.push('(');
    if let Some(Value::Array(parameters)) = map.get("parameters") {
        for (index, parameter) in parameters.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            match parameter {
                Value::Object(param) => {
                    out.push_str(str_field(param, "name"));
                    if bool_field(param, "hasQuestionToken") {
                        out.push('?');
                    }
                    if let Some(annotation) = param.get("type").and_then(Value::as_str) {
                        out.push_str(": ");
                        out.push_str(annotation);
                    }
                }
                other => out.push_str(&render(other)),
            }
        }
    }
    out.push(')');
    if let Some(annotation) = map.get("returnType").and_then(Value::as_str) {
        out.push_str(": ");
        out.push_str(annotation);
    }
}

fn join_statements(statements: Option<&Value>) -> String {
    let Some(Value::Array(statements)) = statements else {
        return String::new();
    };
    let mut out = String::new();
    for (index, statement) in statements.iter().enumerate() {
        let text = render(statement);
        if index > 0 && !text.starts_with('\n') && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&text);
    }
    out
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a str {
    map.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn bool_field(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}
