use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extend;
use crate::files::path_to_package_root;
use crate::postprocess;
use crate::reconcile::reconcile_node;
use crate::script::ScriptHost;
use crate::selection::{Selection, resolve};
use crate::structure;
use crate::syntax::SyntaxTree;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransformMode {
    /// Evaluate the script once against the whole file text.
    #[default]
    TransformCode,
    /// Project every node and reconcile the script result per node.
    TransformAst,
}

impl TransformMode {
    pub fn label(self) -> &'static str {
        match self {
            TransformMode::TransformCode => "transform-code",
            TransformMode::TransformAst => "transform-ast",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PostProcessing {
    pub fix_missing_imports: bool,
    pub fix_unused_identifiers: bool,
    pub organize_imports: bool,
    pub format_code: bool,
}

impl PostProcessing {
    pub fn any_enabled(&self) -> bool {
        self.fix_missing_imports
            || self.fix_unused_identifiers
            || self.organize_imports
            || self.format_code
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub mode: TransformMode,
    pub post_processing: PostProcessing,
}

/// Text plus structural view of one file, as handed to the host layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContents {
    pub code: String,
    pub ast: String,
}

/// Input and output projections of a single reconciled node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedNode {
    pub input_node_json: String,
    pub output_node_json: String,
}

/// Expanded structural view of a file, serialized for display. Parse or
/// projection failures degrade to their message instead of propagating.
pub fn structural_view(contents: &str) -> String {
    match SyntaxTree::parse(contents) {
        Ok(tree) => {
            let expanded = extend::expand(structure::project(&tree, tree.root()));
            serde_json::to_string_pretty(&expanded)
                .unwrap_or_else(|err| format!("serialization error: {err}"))
        }
        Err(err) => format!("{err}"),
    }
}

/// Transform one file and also refresh its structural view for preview.
/// Never fails: any error becomes the payload of both fields.
pub fn transform_file_for_preview(
    path: &Path,
    contents: &str,
    script: &str,
    settings: &Settings,
    host: &ScriptHost,
) -> FileContents {
    match transform_file(path, contents, script, settings, host) {
        Ok(code) => {
            let ast = structural_view(&code);
            FileContents { code, ast }
        }
        Err(err) => FileContents {
            code: format!("{err:#}"),
            ast: format!("{err:#}"),
        },
    }
}

/// Apply the script to one file and return the resulting text.
pub fn transform_file(
    path: &Path,
    contents: &str,
    script: &str,
    settings: &Settings,
    host: &ScriptHost,
) -> Result<String> {
    if settings.mode == TransformMode::TransformCode {
        let result = host.evaluate(
            script,
            &[
                ("text", Value::String(contents.to_string())),
                ("path", Value::String(path.display().to_string())),
                (
                    "pathToPackageRoot",
                    Value::String(path_to_package_root(path)),
                ),
            ],
        )?;
        let Some(new_text) = result.as_str() else {
            return Ok(contents.to_string());
        };
        if new_text == contents || !settings.post_processing.any_enabled() {
            return Ok(new_text.to_string());
        }
        return postprocess::apply(path, new_text, &settings.post_processing);
    }

    let mut tree = SyntaxTree::parse(contents)?;
    // Materialize the node list up front; replacements must not perturb the
    // traversal order, and forgotten nodes are skipped as they appear.
    let ids = tree.node_ids();
    for id in ids {
        if !tree.is_attached(id) {
            continue;
        }
        reconcile_node(&mut tree, id, host, script, path)?;
    }

    if tree.text() == contents {
        return Ok(contents.to_string());
    }
    if !settings.post_processing.any_enabled() {
        return Ok(tree.text().to_string());
    }
    postprocess::apply(path, tree.text(), &settings.post_processing)
}

/// Resolve the selected node, reconcile it once, and report both the input
/// and output projections. Selection errors poison both payloads; script
/// errors leave the input projection intact.
pub fn transform_selected_node(
    path: &Path,
    contents: &str,
    script: &str,
    selection: Selection,
    host: &ScriptHost,
) -> SelectedNode {
    let resolved = SyntaxTree::parse(contents)
        .and_then(|tree| resolve(&tree, selection).map(|node| (tree, node)));
    let (mut tree, node) = match resolved {
        Ok(resolved) => resolved,
        Err(err) => {
            return SelectedNode {
                input_node_json: format!("{err:#}"),
                output_node_json: format!("{err:#}"),
            };
        }
    };

    let input_node_json = serialize_projection(&tree, node);
    match reconcile_node(&mut tree, node, host, script, path) {
        Ok(()) => {
            let output_node_json = if tree.is_attached(node) {
                serialize_projection(&tree, node)
            } else {
                // The node was replaced outright; re-resolve at the same
                // offset to show what now occupies the selection.
                match resolve(&tree, selection) {
                    Ok(current) => serialize_projection(&tree, current),
                    Err(err) => format!("{err:#}"),
                }
            };
            SelectedNode {
                input_node_json,
                output_node_json,
            }
        }
        Err(err) => SelectedNode {
            input_node_json,
            output_node_json: format!("{err:#}"),
        },
    }
}

fn serialize_projection(tree: &SyntaxTree, node: crate::syntax::NodeId) -> String {
    serde_json::to_string_pretty(&structure::project(tree, node))
        .unwrap_or_else(|err| format!("serialization error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: TransformMode) -> Settings {
        Settings {
            mode,
            post_processing: PostProcessing::default(),
        }
    }

    #[test]
    fn whole_text_identity_returns_input() {
        let host = ScriptHost::new();
        let contents = "const a = 1;\n";
        let result = transform_file(
            Path::new("a.ts"),
            contents,
            "return text;",
            &settings(TransformMode::TransformCode),
            &host,
        )
        .expect("transform");
        assert_eq!(result, contents);
    }

    #[test]
    fn whole_text_non_string_result_is_noop() {
        let host = ScriptHost::new();
        let contents = "const a = 1;\n";
        let result = transform_file(
            Path::new("a.ts"),
            contents,
            "return 42;",
            &settings(TransformMode::TransformCode),
            &host,
        )
        .expect("transform");
        assert_eq!(result, contents);
    }

    #[test]
    fn whole_text_mode_rewrites_text() {
        let host = ScriptHost::new();
        let result = transform_file(
            Path::new("a.ts"),
            "const a = 1;\n",
            "text.replace(\"a\", \"b\");\nreturn text;",
            &settings(TransformMode::TransformCode),
            &host,
        )
        .expect("transform");
        assert_eq!(result, "const b = 1;\n");
    }

    #[test]
    fn per_node_identity_returns_input_byte_for_byte() {
        let host = ScriptHost::new();
        let contents = "// header\nconst a = 1;\n\nfunction f(x: number) {\n    return x;\n}\n";
        let result = transform_file(
            Path::new("a.ts"),
            contents,
            "return node;",
            &settings(TransformMode::TransformAst),
            &host,
        )
        .expect("transform");
        assert_eq!(result, contents);
    }

    #[test]
    fn per_node_mode_applies_scripted_edit() {
        let host = ScriptHost::new();
        let script = r#"
if node.kindName == "Identifier" && node.text == "oldName" {
    node.text = "newName";
    return node;
}
return node;
"#;
        let result = transform_file(
            Path::new("a.ts"),
            "const oldName = 1; use(oldName);\n",
            script,
            &settings(TransformMode::TransformAst),
            &host,
        )
        .expect("transform");
        assert_eq!(result, "const newName = 1; use(newName);\n");
    }

    #[test]
    fn preview_surfaces_script_errors_as_payload() {
        let host = ScriptHost::new();
        let preview = transform_file_for_preview(
            Path::new("a.ts"),
            "const a = 1;",
            "throw \"boom\";",
            &settings(TransformMode::TransformCode),
            &host,
        );
        assert!(preview.code.contains("boom"));
        assert!(preview.ast.contains("boom"));
    }

    #[test]
    fn selected_node_preview_reports_projections() {
        let host = ScriptHost::new();
        let result = transform_selected_node(
            Path::new("a.ts"),
            "const a = 1; const b = 2;",
            "return node;",
            Selection {
                start: 6,
                end: Some(6),
            },
            &host,
        );
        assert!(result.input_node_json.contains("Identifier"));
        assert_eq!(result.input_node_json, result.output_node_json);
    }

    #[test]
    fn selected_node_preview_degrades_on_bad_position() {
        let host = ScriptHost::new();
        let result = transform_selected_node(
            Path::new("a.ts"),
            "const a = 1;",
            "return node;",
            Selection {
                start: 5000,
                end: None,
            },
            &host,
        );
        assert!(result.input_node_json.contains("position 5000"));
    }
}
