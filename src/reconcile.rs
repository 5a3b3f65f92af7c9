use std::path::Path;

use anyhow::Result;
use serde_json::Value;

use crate::extend;
use crate::files::path_to_package_root;
use crate::script::ScriptHost;
use crate::structure::{self, supports_structural_write};
use crate::syntax::{NodeId, SyntaxTree};

/// Run the user script against one node and apply the result with the
/// smallest possible edit: nothing when the result is absent or deeply equal
/// to the input projection, a structural assignment when the result carries a
/// `kind` tag, otherwise a full-text or significant-text replacement.
pub fn reconcile_node(
    tree: &mut SyntaxTree,
    id: NodeId,
    host: &ScriptHost,
    script: &str,
    path: &Path,
) -> Result<()> {
    let projection = structure::project(tree, id);
    let result = host.evaluate(
        script,
        &[
            ("node", projection.clone()),
            ("path", Value::String(path.display().to_string())),
            (
                "pathToPackageRoot",
                Value::String(path_to_package_root(path)),
            ),
        ],
    )?;

    if result.is_null() || deep_equal(&result, &projection) {
        return Ok(());
    }

    if result.get("kind").is_some() {
        if supports_structural_write(tree.kind(id)) {
            let rendered = structure::render(&extend::collapse(result));
            tree.replace_text(id, &rendered);
        }
        return Ok(());
    }

    let old_full_text = tree.node_full_text(id).to_string();
    if let Some(full_text) = result.get("fullText").and_then(Value::as_str) {
        if full_text != old_full_text {
            tree.replace_full_text(id, full_text);
            return Ok(());
        }
    }

    let old_text = tree.node_text(id).to_string();
    if let Some(text) = result.get("text").and_then(Value::as_str) {
        if text != old_text {
            let new_full_text = old_full_text.replacen(&old_text, text, 1);
            tree.replace_full_text(id, &new_full_text);
        }
    }

    Ok(())
}

/// Structural equality by key set and recursive value equality; numbers
/// compare by numeric value because the script runtime round-trips JSON
/// numbers through its own integer and float types.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| deep_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| deep_equal(value, other)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reconcile_source(source: &str, script: &str) -> String {
        let mut tree = SyntaxTree::parse(source).expect("parse");
        let host = ScriptHost::new();
        let ids = tree.node_ids();
        for id in ids {
            if !tree.is_attached(id) {
                continue;
            }
            reconcile_node(&mut tree, id, &host, script, Path::new("src/a.ts"))
                .expect("reconcile");
        }
        tree.text().to_string()
    }

    #[test]
    fn identity_script_leaves_text_unchanged() {
        let source = "const a = 1;\nconst b = 2;\n";
        let result = reconcile_source(source, "return node;");
        assert_eq!(result, source);
    }

    #[test]
    fn unit_result_is_a_noop() {
        let source = "const a = 1;\n";
        let result = reconcile_source(source, "return;");
        assert_eq!(result, source);
    }

    #[test]
    fn text_replacement_preserves_trivia() {
        let source = "// keep me\nconst a = 1;\n";
        let script = r#"
if node.kindName == "LexicalDeclaration" {
    node.text = "const a = 2;";
    node.fullText = ();
    return node;
}
return node;
"#;
        let mut tree = SyntaxTree::parse(source).expect("parse");
        let host = ScriptHost::new();
        let statement = tree.children(tree.root())[0];
        reconcile_node(&mut tree, statement, &host, script, Path::new("a.ts")).expect("reconcile");
        assert_eq!(tree.text(), "// keep me\nconst a = 2;\n");
    }

    #[test]
    fn full_text_replacement_is_verbatim() {
        let source = "const a = 1;";
        let script = r#"
if node.kindName == "LexicalDeclaration" {
    return #{ fullText: "let a = 1;" };
}
"#;
        let mut tree = SyntaxTree::parse(source).expect("parse");
        let host = ScriptHost::new();
        let statement = tree.children(tree.root())[0];
        reconcile_node(&mut tree, statement, &host, script, Path::new("a.ts")).expect("reconcile");
        assert_eq!(tree.text(), "let a = 1;");
        assert!(!tree.is_attached(statement));
    }

    #[test]
    fn structural_result_rewrites_supported_node() {
        let source = "function add(a: number, b: number): number {\n    return a + b;\n}";
        let script = r#"
if node.kind == "FunctionDeclaration" {
    node.name = "sum";
    return node;
}
return node;
"#;
        let mut tree = SyntaxTree::parse(source).expect("parse");
        let host = ScriptHost::new();
        let function = tree
            .children(tree.root())
            .iter()
            .copied()
            .find(|&id| tree.kind(id) == "function_declaration")
            .expect("function");
        reconcile_node(&mut tree, function, &host, script, Path::new("a.ts")).expect("reconcile");
        assert!(tree.text().contains("function sum(a: number, b: number)"));
        assert!(tree.text().contains("return a + b;"));
    }

    #[test]
    fn deep_equal_compares_numbers_by_value() {
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(deep_equal(
            &json!({"a": [1, "x"], "b": {"c": true}}),
            &json!({"b": {"c": true}, "a": [1.0, "x"]})
        ));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 2})));
    }

    #[test]
    fn script_errors_propagate_from_reconcile() {
        let mut tree = SyntaxTree::parse("const a = 1;").expect("parse");
        let host = ScriptHost::new();
        let root = tree.root();
        let err = reconcile_node(
            &mut tree,
            root,
            &host,
            "throw \"refused\";",
            Path::new("a.ts"),
        )
        .expect_err("script throws");
        assert!(err.to_string().contains("refused"));
    }
}
