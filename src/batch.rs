use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::encoding::EncodingStrategy;
use crate::logging::record_change;
use crate::script::ScriptHost;
use crate::transform::{Settings, transform_file};

/// Owner side of a cancellation flag. Dropping the source does not cancel;
/// cancellation is always explicit.
#[derive(Debug, Default)]
pub struct CancellationSource {
    flag: Arc<AtomicBool>,
}

impl CancellationSource {
    pub fn new() -> CancellationSource {
        CancellationSource {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            flag: Arc::clone(&self.flag),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Transform produced different text; the file was (or would be) written.
    Written,
    Unchanged,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: FileOutcome,
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Apply the script to every file, strictly in order. The cancellation token
/// is checked before each file, never mid-file. A file's failure is reported
/// and the batch moves on; results are persisted only when the produced text
/// differs from the original, and only when `apply` is set.
pub fn run_batch(
    paths: &[PathBuf],
    script: &str,
    settings: &Settings,
    host: &ScriptHost,
    encoding: &EncodingStrategy,
    apply: bool,
    token: &CancellationToken,
    mut report: impl FnMut(&FileReport),
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let total = paths.len();

    for path in paths {
        if token.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let outcome = match process_file(path, script, settings, host, encoding, apply) {
            Ok(outcome) => outcome,
            Err(err) => FileOutcome::Failed(format!("{err:#}")),
        };

        summary.processed += 1;
        match &outcome {
            FileOutcome::Written => summary.written += 1,
            FileOutcome::Unchanged => summary.unchanged += 1,
            FileOutcome::Failed(_) => summary.failed += 1,
        }
        report(&FileReport {
            path: path.clone(),
            outcome,
            processed: summary.processed,
            total,
        });
    }

    summary
}

fn process_file(
    path: &Path,
    script: &str,
    settings: &Settings,
    host: &ScriptHost,
    encoding: &EncodingStrategy,
    apply: bool,
) -> Result<FileOutcome> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let decoded = encoding.decode(&bytes);

    let new_text = transform_file(path, &decoded.text, script, settings, host)?;
    if new_text == decoded.text {
        return Ok(FileOutcome::Unchanged);
    }

    if apply {
        let encoded = crate::encoding::encode(&new_text, &decoded.decision);
        fs::write(path, encoded).with_context(|| format!("failed to write {}", path.display()))?;
        record_change(
            "apply",
            path,
            "transformed",
            settings.mode.label(),
            &line_delta(&decoded.text, &new_text),
        )?;
    }
    Ok(FileOutcome::Written)
}

fn line_delta(old: &str, new: &str) -> String {
    format!("{} -> {} lines", old.lines().count(), new.lines().count())
}
