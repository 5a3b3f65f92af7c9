use anyhow::{Result, anyhow};
use tree_sitter::{Node as TsNode, Parser};

pub type NodeId = usize;

/// One node of a parsed source file. Ranges are byte offsets into the tree's
/// text buffer. `full_start` includes the leading trivia (whitespace and
/// comments since the previous non-comment token); `start` is where the
/// significant text begins.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub kind: String,
    pub full_start: usize,
    pub start: usize,
    pub end: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub field: Option<String>,
    attached: bool,
}

/// Arena-backed parse tree of a single source file. Nodes are stored in
/// pre-order; the root is always node 0. The tree owns its text buffer and
/// supports in-place replacement of a node's text, which detaches the
/// replaced subtree and shifts the ranges of everything after it.
#[derive(Debug)]
pub struct SyntaxTree {
    text: String,
    nodes: Vec<NodeData>,
}

impl SyntaxTree {
    pub fn parse(contents: &str) -> Result<SyntaxTree> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::LANGUAGE_TSX.into())
            .map_err(|err| anyhow!("loading typescript grammar: {err}"))?;
        let tree = parser
            .parse(contents, None)
            .ok_or_else(|| anyhow!("parser produced no tree"))?;

        let mut token_ends = Vec::new();
        collect_token_ends(tree.root_node(), &mut token_ends);

        let mut nodes = Vec::new();
        build_arena(tree.root_node(), None, None, &token_ends, &mut nodes);
        if let Some(root) = nodes.first_mut() {
            root.full_start = 0;
        }

        Ok(SyntaxTree {
            text: contents.to_string(),
            nodes,
        })
    }

    pub fn root(&self) -> NodeId {
        0
    }

    /// All nodes in pre-order. Callers that mutate the tree while iterating
    /// must re-check `is_attached` per node.
    pub fn node_ids(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).collect()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self, id: NodeId) -> &str {
        &self.nodes[id].kind
    }

    /// Pascal-cased kind name in the style of the structural model
    /// ("program" becomes "SourceFile").
    pub fn kind_name(&self, id: NodeId) -> String {
        kind_display_name(&self.nodes[id].kind)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes[id].attached
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn child_by_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].field.as_deref() == Some(field))
    }

    pub fn node_text(&self, id: NodeId) -> &str {
        let node = &self.nodes[id];
        &self.text[node.start..node.end]
    }

    pub fn node_full_text(&self, id: NodeId) -> &str {
        let node = &self.nodes[id];
        &self.text[node.full_start..node.end]
    }

    /// Deepest node whose significant range contains `pos`.
    pub fn descendant_at(&self, pos: usize) -> Option<NodeId> {
        let root = &self.nodes[0];
        if pos < root.start || pos >= root.end {
            return None;
        }
        let mut current = 0;
        'descend: loop {
            for &child in &self.nodes[current].children {
                let node = &self.nodes[child];
                if node.attached && node.start <= pos && pos < node.end {
                    current = child;
                    continue 'descend;
                }
            }
            return Some(current);
        }
    }

    /// Replace the node's full text (leading trivia included). Detaches the
    /// node and its subtree; remaining nodes keep valid ranges.
    pub fn replace_full_text(&mut self, id: NodeId, new_text: &str) {
        let old_start = self.nodes[id].full_start;
        let old_end = self.nodes[id].end;
        self.splice(id, old_start, old_end, new_text);
    }

    /// Replace only the significant text, preserving leading trivia.
    pub fn replace_text(&mut self, id: NodeId, new_text: &str) {
        let old_start = self.nodes[id].start;
        let old_end = self.nodes[id].end;
        self.splice(id, old_start, old_end, new_text);
    }

    fn splice(&mut self, id: NodeId, old_start: usize, old_end: usize, new_text: &str) {
        let delta = new_text.len() as isize - (old_end - old_start) as isize;
        let new_end = (old_start as isize + new_text.len() as isize) as usize;
        self.text.replace_range(old_start..old_end, new_text);

        self.detach_subtree(id);

        let mut ancestors = Vec::new();
        let mut cursor = self.nodes[id].parent;
        while let Some(parent) = cursor {
            ancestors.push(parent);
            cursor = self.nodes[parent].parent;
        }
        for &ancestor in &ancestors {
            let node = &mut self.nodes[ancestor];
            node.end = shift(node.end, delta);
            if node.start > old_start {
                node.start = old_start;
            }
        }

        for idx in 0..self.nodes.len() {
            if !self.nodes[idx].attached || ancestors.contains(&idx) {
                continue;
            }
            let node = &mut self.nodes[idx];
            // Nodes wholly inside the replaced range are gone even when they
            // are not descendants of the replaced node (comments riding as
            // another statement's leading trivia).
            if node.start >= old_start && node.end <= old_end {
                node.attached = false;
                continue;
            }
            if node.start >= old_end {
                node.start = shift(node.start, delta);
                node.end = shift(node.end, delta);
                if node.full_start >= old_end {
                    node.full_start = shift(node.full_start, delta);
                } else {
                    node.full_start = new_end;
                }
            }
        }
    }

    fn detach_subtree(&mut self, id: NodeId) {
        self.nodes[id].attached = false;
        let children = self.nodes[id].children.clone();
        for child in children {
            self.detach_subtree(child);
        }
    }
}

fn shift(value: usize, delta: isize) -> usize {
    (value as isize + delta).max(0) as usize
}

fn collect_token_ends(node: TsNode<'_>, ends: &mut Vec<usize>) {
    if node.child_count() == 0 {
        // Comments stay out of the token stream so they count as leading
        // trivia of the node that follows them.
        if node.kind() != "comment" {
            ends.push(node.end_byte());
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_token_ends(child, ends);
    }
}

fn build_arena(
    node: TsNode<'_>,
    parent: Option<NodeId>,
    field: Option<&str>,
    token_ends: &[usize],
    nodes: &mut Vec<NodeData>,
) -> NodeId {
    let start = node.start_byte();
    let before = token_ends.partition_point(|&end| end <= start);
    let full_start = if before == 0 { 0 } else { token_ends[before - 1] };

    let id = nodes.len();
    nodes.push(NodeData {
        kind: node.kind().to_string(),
        full_start,
        start,
        end: node.end_byte(),
        parent,
        children: Vec::new(),
        field: field.map(str::to_string),
        attached: true,
    });

    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            let child_field = cursor.field_name().map(str::to_string);
            if child.is_named() {
                let child_id =
                    build_arena(child, Some(id), child_field.as_deref(), token_ends, nodes);
                nodes[id].children.push(child_id);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }

    id
}

fn kind_display_name(kind: &str) -> String {
    match kind {
        "program" => "SourceFile".to_string(),
        "statement_block" => "Block".to_string(),
        other => {
            let mut name = String::with_capacity(other.len());
            for part in other.split('_') {
                let mut chars = part.chars();
                if let Some(first) = chars.next() {
                    name.extend(first.to_uppercase());
                    name.push_str(chars.as_str());
                }
            }
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_names_the_root() {
        let tree = SyntaxTree::parse("const a = 1;\n").expect("parse");
        assert_eq!(tree.kind(tree.root()), "program");
        assert_eq!(tree.kind_name(tree.root()), "SourceFile");
    }

    #[test]
    fn full_text_includes_leading_comment() {
        let source = "// leading\nconst a = 1;\n";
        let tree = SyntaxTree::parse(source).expect("parse");
        let statement = tree
            .children(tree.root())
            .iter()
            .copied()
            .find(|&id| tree.kind(id) == "lexical_declaration")
            .expect("declaration");
        assert_eq!(tree.node_text(statement), "const a = 1;");
        assert_eq!(tree.node_full_text(statement), "// leading\nconst a = 1;");
    }

    #[test]
    fn descendant_at_finds_identifier() {
        let tree = SyntaxTree::parse("const a = 1; const b = 2;").expect("parse");
        let id = tree.descendant_at(6).expect("node at offset 6");
        assert_eq!(tree.kind(id), "identifier");
        assert_eq!(tree.node_text(id), "a");
    }

    #[test]
    fn replacing_text_detaches_subtree_and_shifts_later_nodes() {
        let tree_source = "const a = 1; const b = 2;";
        let mut tree = SyntaxTree::parse(tree_source).expect("parse");
        let first = tree.children(tree.root())[0];
        let second = tree.children(tree.root())[1];

        tree.replace_full_text(first, "let renamed = 10;");

        assert!(!tree.is_attached(first));
        assert!(tree.is_attached(second));
        assert_eq!(tree.node_text(second), "const b = 2;");
        assert_eq!(tree.text(), "let renamed = 10; const b = 2;");
    }

    #[test]
    fn full_text_replacement_detaches_swallowed_comment() {
        let source = "const a = 1;\n// note\nconst b = 2;\n";
        let mut tree = SyntaxTree::parse(source).expect("parse");
        let children = tree.children(tree.root()).to_vec();
        let comment = children
            .iter()
            .copied()
            .find(|&id| tree.kind(id) == "comment")
            .expect("comment node");
        let second = children
            .iter()
            .copied()
            .filter(|&id| tree.kind(id) == "lexical_declaration")
            .nth(1)
            .expect("second declaration");

        // The full range of the second declaration starts right after the
        // first one and swallows the comment between them.
        tree.replace_full_text(second, "\nlet bbb = 3;");

        assert!(!tree.is_attached(comment));
        assert_eq!(tree.text(), "const a = 1;\nlet bbb = 3;\n");
        // Resolving inside the new text must never land on a stale node.
        let resolved = tree.descendant_at(14).expect("node inside new text");
        assert!(tree.is_attached(resolved));
        assert_eq!(tree.kind(resolved), "program");
    }

    #[test]
    fn narrow_replacement_preserves_leading_trivia() {
        let source = "// note\nconst a = 1;\n";
        let mut tree = SyntaxTree::parse(source).expect("parse");
        let statement = tree
            .children(tree.root())
            .iter()
            .copied()
            .find(|&id| tree.kind(id) == "lexical_declaration")
            .expect("declaration");

        tree.replace_text(statement, "const a = 2;");
        assert_eq!(tree.text(), "// note\nconst a = 2;\n");
    }
}
