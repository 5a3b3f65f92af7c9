use std::collections::HashSet;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::syntax::{NodeId, SyntaxTree};

/// A caller-supplied character range over a file's text. `end` is optional;
/// a missing end makes the selection a single point.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Selection {
    pub start: usize,
    #[serde(default)]
    pub end: Option<usize>,
}

/// Resolve a selection to the lowest node that fully contains it: the node at
/// `start` when the selection is a point, otherwise the lowest common
/// ancestor of the nodes at `start` and `end`.
pub fn resolve(tree: &SyntaxTree, selection: Selection) -> Result<NodeId> {
    let Some(start_node) = tree.descendant_at(selection.start) else {
        bail!("could not find node at position {}", selection.start);
    };

    let Some(end_node) = selection.end.and_then(|end| tree.descendant_at(end)) else {
        return Ok(start_node);
    };

    let start_chain: HashSet<NodeId> = ancestor_chain(tree, start_node).into_iter().collect();
    let mut common = end_node;
    while tree.parent(common).is_some() && !start_chain.contains(&common) {
        common = tree.parent(common).expect("checked in loop condition");
    }
    Ok(common)
}

fn ancestor_chain(tree: &SyntaxTree, node: NodeId) -> Vec<NodeId> {
    let mut chain = vec![node];
    let mut current = node;
    while let Some(parent) = tree.parent(current) {
        chain.push(parent);
        current = parent;
    }
    chain
}
