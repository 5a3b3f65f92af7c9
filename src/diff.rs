use std::path::Path;

use anyhow::Result;
use similar::{ChangeTag, TextDiff};

/// Print a grouped line diff between the original and transformed text of
/// one file, preceded by a header naming the file.
pub fn print_file_diff(path: &Path, old: &str, new: &str, context: usize) -> Result<()> {
    println!("--- {}", path.display());
    println!("+++ {} (transformed)", path.display());
    print_diff(old, new, context)
}

pub fn print_diff(old: &str, new: &str, context: usize) -> Result<()> {
    let diff = TextDiff::configure()
        .algorithm(similar::Algorithm::Myers)
        .diff_lines(old, new);

    for (idx, group) in diff.grouped_ops(context).iter().enumerate() {
        if idx > 0 {
            println!("...");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                match change.tag() {
                    ChangeTag::Delete => print!("- "),
                    ChangeTag::Insert => print!("+ "),
                    ChangeTag::Equal => print!("  "),
                }
                print!("{change}");
            }
        }
    }

    Ok(())
}
