use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use walkdir::WalkDir;

use crate::syntax::SyntaxTree;
use crate::transform::PostProcessing;

/// Run the enabled post-processing passes over the transformed text, in the
/// fixed order: missing-import fix, unused-identifier fix, import ordering,
/// formatting.
pub fn apply(path: &Path, text: &str, settings: &PostProcessing) -> Result<String> {
    let mut current = text.to_string();
    if settings.fix_missing_imports {
        current = fix_missing_imports(path, &current)?;
    }
    if settings.fix_unused_identifiers {
        current = fix_unused_identifiers(&current)?;
    }
    if settings.organize_imports {
        current = organize_imports(&current);
    }
    if settings.format_code {
        current = format_code(&current);
    }
    Ok(current)
}

fn import_line_regex() -> Regex {
    Regex::new(r#"(?m)^import\s+[^;\n]+\s+from\s+['"][^'"]+['"];?\s*$"#).expect("static pattern")
}

fn named_import_regex() -> Regex {
    Regex::new(r#"^import\s+(?:(\w+)\s*,\s*)?\{([^}]*)\}\s+from\s+['"]([^'"]+)['"];?\s*$"#)
        .expect("static pattern")
}

/// Insert imports for identifiers that are referenced but neither declared in
/// the file nor already imported, resolved against the exports of the owning
/// package's `src` tree. Unresolvable identifiers are left alone.
pub fn fix_missing_imports(path: &Path, text: &str) -> Result<String> {
    let tree = SyntaxTree::parse(text)?;
    let mut referenced = BTreeSet::new();
    let mut declared = BTreeSet::new();
    for id in tree.node_ids() {
        match tree.kind(id) {
            "identifier" | "type_identifier" => {
                let name = tree.node_text(id).to_string();
                let is_declaration = tree
                    .parent(id)
                    .is_some_and(|parent| declares_name(tree.kind(parent)));
                if is_declaration || imported_via(&tree, id) {
                    declared.insert(name);
                } else {
                    referenced.insert(name);
                }
            }
            _ => {}
        }
    }

    let exports = package_exports(path)?;
    let mut additions = Vec::new();
    for name in referenced.difference(&declared) {
        if is_ambient_global(name) {
            continue;
        }
        if let Some(module) = exports.get(name.as_str()) {
            let specifier = module_specifier(path, module);
            additions.push(format!("import {{ {name} }} from '{specifier}';"));
        }
    }

    if additions.is_empty() {
        return Ok(text.to_string());
    }
    additions.sort();
    let mut out = additions.join("\n");
    out.push('\n');
    out.push_str(text);
    Ok(out)
}

fn declares_name(parent_kind: &str) -> bool {
    matches!(
        parent_kind,
        "variable_declarator"
            | "function_declaration"
            | "class_declaration"
            | "required_parameter"
            | "optional_parameter"
            | "import_specifier"
            | "namespace_import"
            | "interface_declaration"
            | "type_alias_declaration"
            | "enum_declaration"
    )
}

fn imported_via(tree: &SyntaxTree, id: usize) -> bool {
    let mut current = Some(id);
    while let Some(node) = current {
        if tree.kind(node) == "import_statement" {
            return true;
        }
        current = tree.parent(node);
    }
    false
}

fn is_ambient_global(name: &str) -> bool {
    matches!(
        name,
        "console"
            | "window"
            | "document"
            | "undefined"
            | "Promise"
            | "JSON"
            | "Math"
            | "Object"
            | "Array"
            | "String"
            | "Number"
            | "Boolean"
            | "Error"
            | "Map"
            | "Set"
            | "Date"
            | "RegExp"
    )
}

/// Map of exported symbol name to the file that exports it, across the
/// owning package's `src` directory.
fn package_exports(path: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut exports = BTreeMap::new();
    let Some(src_dir) = find_src_dir(path) else {
        return Ok(exports);
    };
    let export_pattern = Regex::new(
        r"(?m)^export\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|let|var|interface|type|enum)\s+(\w+)",
    )
    .expect("static pattern");

    for entry in WalkDir::new(&src_dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let module = entry.path();
        if module == path {
            continue;
        }
        let is_source = module
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("ts") || ext.eq_ignore_ascii_case("tsx"))
            .unwrap_or(false);
        if !is_source {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(module) else {
            continue;
        };
        for capture in export_pattern.captures_iter(&contents) {
            exports
                .entry(capture[1].to_string())
                .or_insert_with(|| module.to_path_buf());
        }
    }
    Ok(exports)
}

fn find_src_dir(path: &Path) -> Option<PathBuf> {
    let mut directory = path.parent()?.to_path_buf();
    loop {
        if directory.join("package.json").exists() {
            let src = directory.join("src");
            return src.is_dir().then_some(src);
        }
        if !directory.pop() {
            return None;
        }
    }
}

fn module_specifier(from: &Path, module: &Path) -> String {
    let from_dir = from.parent().unwrap_or_else(|| Path::new(""));
    let stripped = module.with_extension("");
    match stripped.strip_prefix(from_dir) {
        Ok(relative) => format!("./{}", relative.to_string_lossy().replace('\\', "/")),
        Err(_) => {
            let mut ups = 0;
            let mut base = from_dir.to_path_buf();
            loop {
                if let Ok(relative) = stripped.strip_prefix(&base) {
                    let prefix = "../".repeat(ups);
                    return format!(
                        "{prefix}{}",
                        relative.to_string_lossy().replace('\\', "/")
                    );
                }
                if !base.pop() {
                    return stripped.to_string_lossy().replace('\\', "/");
                }
                ups += 1;
            }
        }
    }
}

/// Drop named-import bindings that are never referenced outside their own
/// import statement; an import whose bindings are all unused is removed
/// entirely.
pub fn fix_unused_identifiers(text: &str) -> Result<String> {
    let named = named_import_regex();
    // A mention inside another import statement is not a use, so the
    // reference check runs against the text with every import removed.
    let body = import_line_regex().replace_all(text, "").into_owned();
    let mut out_lines = Vec::new();
    for line in text.lines() {
        let Some(captures) = named.captures(line) else {
            out_lines.push(line.to_string());
            continue;
        };

        let default_binding = captures.get(1).map(|m| m.as_str().to_string());
        let default_used = default_binding
            .as_deref()
            .map(|name| is_referenced(&body, name))
            .unwrap_or(false);
        let kept: Vec<String> = captures[2]
            .split(',')
            .map(str::trim)
            .filter(|binding| !binding.is_empty())
            .filter(|binding| {
                let local = binding.rsplit(" as ").next().unwrap_or(binding).trim();
                is_referenced(&body, local)
            })
            .map(str::to_string)
            .collect();

        let module = &captures[3];
        match (default_binding.filter(|_| default_used), kept.is_empty()) {
            (Some(default), true) => {
                out_lines.push(format!("import {default} from '{module}';"));
            }
            (Some(default), false) => {
                out_lines.push(format!(
                    "import {default}, {{ {} }} from '{module}';",
                    kept.join(", ")
                ));
            }
            (None, false) => {
                out_lines.push(format!("import {{ {} }} from '{module}';", kept.join(", ")));
            }
            (None, true) => {} // whole import gone
        }
    }

    let mut out = out_lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn is_referenced(body: &str, name: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(name));
    Regex::new(&pattern)
        .map(|re| re.is_match(body))
        .unwrap_or(true)
}

/// Hoist import statements to the top, dedupe exact duplicates, and sort by
/// module specifier with bare specifiers ahead of relative ones.
pub fn organize_imports(text: &str) -> String {
    let import_line = import_line_regex();
    let mut imports = Vec::new();
    let mut rest = Vec::new();
    for line in text.lines() {
        if import_line.is_match(line) {
            let trimmed = line.trim().to_string();
            if !imports.contains(&trimmed) {
                imports.push(trimmed);
            }
        } else {
            rest.push(line);
        }
    }
    if imports.is_empty() {
        return text.to_string();
    }

    imports.sort_by_key(|line| {
        let specifier = line
            .rsplit(['\'', '"'])
            .nth(1)
            .unwrap_or_default()
            .to_string();
        (specifier.starts_with('.'), specifier)
    });

    let mut body = rest.join("\n");
    while body.starts_with('\n') {
        body.remove(0);
    }
    let mut out = imports.join("\n");
    out.push_str("\n\n");
    out.push_str(&body);
    if text.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Whitespace normalization: brace-depth reindentation, trailing-whitespace
/// trim, blank-line collapse, and a final newline. Indentation is four
/// spaces, matching the structural renderer.
pub fn format_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth: usize = 0;
    let mut previous_blank = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !previous_blank && !out.is_empty() {
                out.push('\n');
            }
            previous_blank = true;
            continue;
        }
        previous_blank = false;

        let leading_closers = trimmed
            .chars()
            .take_while(|&ch| ch == '}' || ch == ')' || ch == ']')
            .count();
        let line_depth = depth.saturating_sub(leading_closers);
        for _ in 0..line_depth {
            out.push_str("    ");
        }
        out.push_str(trimmed);
        out.push('\n');

        for ch in trimmed.chars() {
            match ch {
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_named_import_is_removed() {
        let text = "import { used, unused } from './lib';\nused();\n";
        let result = fix_unused_identifiers(text).expect("fix");
        assert_eq!(result, "import { used } from './lib';\nused();\n");
    }

    #[test]
    fn fully_unused_import_disappears() {
        let text = "import { gone } from './lib';\nconst a = 1;\n";
        let result = fix_unused_identifiers(text).expect("fix");
        assert_eq!(result, "const a = 1;\n");
    }

    #[test]
    fn duplicate_unused_import_is_fully_removed() {
        let text =
            "import { helper } from './a';\nimport { helper } from './b';\nconst x = 1;\n";
        let result = fix_unused_identifiers(text).expect("fix");
        assert_eq!(result, "const x = 1;\n");
    }

    #[test]
    fn used_default_import_survives() {
        let text = "import React, { useState } from 'react';\nReact.render();\n";
        let result = fix_unused_identifiers(text).expect("fix");
        assert_eq!(result, "import React from 'react';\nReact.render();\n");
    }

    #[test]
    fn imports_are_sorted_and_deduped() {
        let text = "import { b } from './b';\nimport { a } from 'alpha';\nimport { b } from './b';\nconst x = 1;\n";
        let result = organize_imports(text);
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines[0], "import { a } from 'alpha';");
        assert_eq!(lines[1], "import { b } from './b';");
        assert_eq!(result.matches("from './b'").count(), 1);
    }

    #[test]
    fn format_reindents_by_brace_depth() {
        let text = "function f() {\nreturn 1;\n}\n";
        let result = format_code(text);
        assert_eq!(result, "function f() {\n    return 1;\n}\n");
    }

    #[test]
    fn format_collapses_blank_runs() {
        let text = "const a = 1;\n\n\n\nconst b = 2;\n";
        let result = format_code(text);
        assert_eq!(result, "const a = 1;\n\nconst b = 2;\n");
    }

    #[test]
    fn missing_import_is_added_from_package_exports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        std::fs::write(root.join("package.json"), "{}").expect("package.json");
        std::fs::create_dir_all(root.join("src")).expect("mkdir");
        std::fs::write(
            root.join("src/helpers.ts"),
            "export function helper() { return 1; }\n",
        )
        .expect("write helpers");
        let target = root.join("src/main.ts");
        std::fs::write(&target, "helper();\n").expect("write main");

        let result = fix_missing_imports(&target, "helper();\n").expect("fix");
        assert!(result.starts_with("import { helper } from './helpers';"));
        assert!(result.ends_with("helper();\n"));
    }
}
