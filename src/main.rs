use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use is_terminal::IsTerminal;

mod batch;
mod diff;
mod encoding;
mod extend;
mod files;
mod host;
mod logging;
mod postprocess;
mod reconcile;
mod script;
mod selection;
mod structure;
mod syntax;
mod transform;

use batch::{CancellationSource, FileOutcome, run_batch};
use encoding::EncodingStrategy;
use files::{SearchSession, resolve_targets, search_files};
use script::ScriptHost;
use selection::Selection;
use transform::{
    Settings, TransformMode, structural_view, transform_file, transform_file_for_preview,
    transform_selected_node,
};

#[derive(Parser, Debug)]
#[command(
    name = "scriptmod",
    about = "Scripted codemods over TypeScript/TSX files",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a file's text and its structural view.
    Load(LoadCommand),
    /// Run a transform script against one file without writing anything.
    Preview(PreviewCommand),
    /// Resolve a selection and preview the script against that one node.
    Node(NodeCommand),
    /// Apply a transform script across many files.
    Apply(ApplyCommand),
    /// List candidate files, optionally filtered by content.
    Search(SearchCommand),
    /// Serve the JSON-lines message loop over stdin/stdout.
    Serve,
}

#[derive(Args, Debug)]
struct LoadCommand {
    /// File to load.
    path: PathBuf,
}

#[derive(Args, Debug)]
struct ScriptArgs {
    /// Transform script source, inline.
    #[arg(long, conflicts_with = "script_file")]
    script: Option<String>,

    /// Read the transform script from a file.
    #[arg(long)]
    script_file: Option<PathBuf>,
}

impl ScriptArgs {
    fn load(&self) -> Result<String> {
        if let Some(script) = &self.script {
            return Ok(script.clone());
        }
        if let Some(path) = &self.script_file {
            return fs::read_to_string(path)
                .with_context(|| format!("reading script file {}", path.display()));
        }
        bail!("provide --script or --script-file");
    }
}

#[derive(Args, Debug)]
struct SettingsArgs {
    /// Settings document (YAML or JSON) with mode and post-processing flags.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Transform mode; overrides the settings file.
    #[arg(long, value_enum)]
    mode: Option<TransformMode>,

    /// Add missing same-package imports after the transform.
    #[arg(long)]
    fix_missing_imports: bool,

    /// Drop unreferenced named imports after the transform.
    #[arg(long)]
    fix_unused_identifiers: bool,

    /// Hoist, dedupe, and sort import statements after the transform.
    #[arg(long)]
    organize_imports: bool,

    /// Reindent and tidy whitespace after the transform.
    #[arg(long)]
    format_code: bool,
}

impl SettingsArgs {
    fn resolve(&self) -> Result<Settings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings(path)?,
            None => Settings::default(),
        };
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        settings.post_processing.fix_missing_imports |= self.fix_missing_imports;
        settings.post_processing.fix_unused_identifiers |= self.fix_unused_identifiers;
        settings.post_processing.organize_imports |= self.organize_imports;
        settings.post_processing.format_code |= self.format_code;
        Ok(settings)
    }
}

#[derive(Args, Debug)]
struct PreviewCommand {
    #[command(flatten)]
    script: ScriptArgs,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Print a unified diff instead of the full transformed text.
    #[arg(long)]
    diff: bool,

    /// File to preview against.
    path: PathBuf,
}

#[derive(Args, Debug)]
struct NodeCommand {
    #[command(flatten)]
    script: ScriptArgs,

    /// Character offset where the selection starts.
    #[arg(long)]
    start: usize,

    /// Character offset where the selection ends.
    #[arg(long)]
    end: Option<usize>,

    /// File containing the selection.
    path: PathBuf,
}

#[derive(Args, Debug)]
struct ApplyCommand {
    #[command(flatten)]
    script: ScriptArgs,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Explicit file or directory targets.
    #[arg(long, value_name = "PATH")]
    target: Vec<PathBuf>,

    /// Glob patterns selecting targets.
    #[arg(long, value_name = "PATTERN")]
    glob: Vec<String>,

    /// Glob patterns excluding matched files.
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Include files and directories whose names start with a dot.
    #[arg(long)]
    include_hidden: bool,

    /// Decode and re-encode with this encoding instead of auto-detecting.
    #[arg(long, value_name = "LABEL")]
    encoding: Option<String>,

    /// Write changes to disk. Without this flag the run is a dry run.
    #[arg(long)]
    apply: bool,
}

#[derive(Args, Debug)]
struct SearchCommand {
    /// Glob patterns selecting candidate files.
    #[arg(long, value_name = "PATTERN", required = true)]
    glob: Vec<String>,

    /// Only report files containing this text.
    #[arg(long)]
    text: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Load(cmd) => handle_load(cmd),
        Command::Preview(cmd) => handle_preview(cmd),
        Command::Node(cmd) => handle_node(cmd),
        Command::Apply(cmd) => handle_apply(cmd),
        Command::Search(cmd) => handle_search(cmd),
        Command::Serve => host::serve(io::stdin().lock(), io::stdout().lock()),
    }
}

fn handle_load(cmd: LoadCommand) -> Result<()> {
    let text = fs::read_to_string(&cmd.path)
        .with_context(|| format!("reading {}", cmd.path.display()))?;
    println!("--- {} ---", cmd.path.display());
    println!("{text}");
    println!("--- structure ---");
    println!("{}", structural_view(&text));
    Ok(())
}

fn handle_preview(cmd: PreviewCommand) -> Result<()> {
    let script = cmd.script.load()?;
    let settings = cmd.settings.resolve()?;
    let contents = fs::read_to_string(&cmd.path)
        .with_context(|| format!("reading {}", cmd.path.display()))?;
    let host = ScriptHost::new();

    if cmd.diff {
        let new_text = transform_file(&cmd.path, &contents, &script, &settings, &host)?;
        if new_text == contents {
            println!("{}: no changes", cmd.path.display());
            return Ok(());
        }
        return diff::print_file_diff(&cmd.path, &contents, &new_text, 3);
    }

    let preview = transform_file_for_preview(&cmd.path, &contents, &script, &settings, &host);
    if io::stdout().is_terminal() {
        println!("--- {} (transformed) ---", cmd.path.display());
        println!("{}", preview.code);
        println!("--- structure ---");
        println!("{}", preview.ast);
    } else {
        // Piped output carries only the transformed text.
        print!("{}", preview.code);
    }
    Ok(())
}

fn handle_node(cmd: NodeCommand) -> Result<()> {
    let script = cmd.script.load()?;
    let contents = fs::read_to_string(&cmd.path)
        .with_context(|| format!("reading {}", cmd.path.display()))?;
    let host = ScriptHost::new();
    let selection = Selection {
        start: cmd.start,
        end: cmd.end,
    };

    let result = transform_selected_node(&cmd.path, &contents, &script, selection, &host);
    println!("--- input node ---");
    println!("{}", result.input_node_json);
    println!("--- output node ---");
    println!("{}", result.output_node_json);
    Ok(())
}

fn handle_apply(cmd: ApplyCommand) -> Result<()> {
    let script = cmd.script.load()?;
    let settings = cmd.settings.resolve()?;
    let encoding = EncodingStrategy::new(cmd.encoding.as_deref())?;
    let entries = resolve_targets(&cmd.target, &cmd.glob, cmd.include_hidden, &cmd.exclude)?;
    let paths: Vec<PathBuf> = entries
        .iter()
        .filter(|entry| !entry.is_probably_binary)
        .map(|entry| entry.path.clone())
        .collect();
    let skipped_binary = entries.len() - paths.len();

    println!("scriptmod apply");
    println!("  files: {} ({skipped_binary} binary skipped)", paths.len());
    println!("  mode: {}", settings.mode.label());
    println!("  encoding: {}", encoding.describe());
    if !cmd.apply {
        println!("  dry run: rerun with --apply to write changes.");
    }

    let host = ScriptHost::new();
    let cancellation = CancellationSource::new();
    let interrupt = cancellation.token();
    ctrlc::set_handler(move || cancellation.cancel())
        .context("installing interrupt handler")?;

    let summary = run_batch(
        &paths,
        &script,
        &settings,
        &host,
        &encoding,
        cmd.apply,
        &interrupt,
        |report| {
            let status = match &report.outcome {
                FileOutcome::Written if cmd.apply => "written",
                FileOutcome::Written => "would write",
                FileOutcome::Unchanged => "unchanged",
                FileOutcome::Failed(message) => {
                    eprintln!(
                        "[{}/{}] {}: error: {message}",
                        report.processed,
                        report.total,
                        report.path.display()
                    );
                    return;
                }
            };
            println!(
                "[{}/{}] {}: {status}",
                report.processed,
                report.total,
                report.path.display()
            );
        },
    );

    println!(
        "done: {} processed, {} changed, {} unchanged, {} failed{}",
        summary.processed,
        summary.written,
        summary.unchanged,
        summary.failed,
        if summary.cancelled {
            " (cancelled)"
        } else {
            ""
        }
    );
    if summary.failed > 0 {
        bail!("{} file(s) failed to transform", summary.failed);
    }
    Ok(())
}

fn handle_search(cmd: SearchCommand) -> Result<()> {
    let entries = resolve_targets(&[], &cmd.glob, false, &[])?;
    let mut session = SearchSession::new();
    let token = session.begin();
    let Some(matched) = search_files(&entries, cmd.text.as_deref(), &token)? else {
        return Ok(());
    };
    for path in &matched {
        println!("{}", path.display());
    }
    println!("{} file(s)", matched.len());
    Ok(())
}

fn load_settings(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);
    if is_yaml {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing YAML settings {}", path.display()))
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing JSON settings {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_file_round_trips_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.yaml");
        fs::write(
            &path,
            "mode: transform-ast\npostProcessing:\n  formatCode: true\n",
        )
        .expect("write settings");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.mode, TransformMode::TransformAst);
        assert!(settings.post_processing.format_code);
        assert!(!settings.post_processing.organize_imports);
    }

    #[test]
    fn settings_file_round_trips_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"mode": "transform-code", "postProcessing": {"organizeImports": true}}"#,
        )
        .expect("write settings");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.mode, TransformMode::TransformCode);
        assert!(settings.post_processing.organize_imports);
    }

    #[test]
    fn cli_flags_override_the_settings_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"mode": "transform-code"}"#).expect("write settings");

        let args = SettingsArgs {
            settings: Some(path),
            mode: Some(TransformMode::TransformAst),
            fix_missing_imports: false,
            fix_unused_identifiers: true,
            organize_imports: false,
            format_code: false,
        };
        let settings = args.resolve().expect("resolve");
        assert_eq!(settings.mode, TransformMode::TransformAst);
        assert!(settings.post_processing.fix_unused_identifiers);
    }

    #[test]
    fn missing_script_source_is_an_error() {
        let args = ScriptArgs {
            script: None,
            script_file: None,
        };
        let err = args.load().expect_err("no script source");
        assert!(err.to_string().contains("--script"));
    }
}
