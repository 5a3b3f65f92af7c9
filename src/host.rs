use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::batch::{CancellationSource, FileOutcome, run_batch};
use crate::encoding::EncodingStrategy;
use crate::files::{SearchSession, resolve_targets, search_files};
use crate::script::ScriptHost;
use crate::selection::Selection;
use crate::transform::{
    Settings, structural_view, transform_file_for_preview, transform_selected_node,
};

/// One request from the host editor/UI layer, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    LoadFile {
        path: PathBuf,
    },
    PreviewTransform {
        path: PathBuf,
        #[serde(default)]
        text: Option<String>,
        script: String,
        #[serde(default)]
        settings: Settings,
    },
    PreviewNodeTransform {
        path: PathBuf,
        #[serde(default)]
        text: Option<String>,
        script: String,
        selection: Selection,
    },
    ApplyToFiles {
        paths: Vec<PathBuf>,
        script: String,
        #[serde(default)]
        settings: Settings,
    },
    SearchFiles {
        glob: String,
        #[serde(default)]
        text: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Response {
    FileLoaded {
        path: PathBuf,
        text: String,
        structural_view: String,
    },
    TransformPreview {
        path: PathBuf,
        text: String,
        structural_view: String,
    },
    NodePreview {
        path: PathBuf,
        input_node_json: String,
        output_node_json: String,
    },
    Progress {
        path: PathBuf,
        processed: usize,
        total: usize,
        changed: bool,
    },
    FileError {
        path: PathBuf,
        message: String,
    },
    ApplyComplete {
        processed: usize,
        written: usize,
        failed: usize,
        cancelled: bool,
    },
    SearchResults {
        paths: Vec<PathBuf>,
    },
    Error {
        message: String,
    },
}

/// Serve the message contract over stdio: one JSON request per input line,
/// one or more JSON responses per request. A malformed request produces an
/// error response, never a crash or an exit.
pub fn serve(input: impl BufRead, mut output: impl Write) -> Result<()> {
    let script_host = ScriptHost::new();
    let mut searches = SearchSession::new();

    for line in input.lines() {
        let line = line.context("reading request")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(request, &script_host, &mut searches, &mut output)?,
            Err(err) => emit(
                &mut output,
                &Response::Error {
                    message: format!("malformed request: {err}"),
                },
            )?,
        }
    }
    Ok(())
}

/// Write one response line and flush immediately, so the host sees events
/// as they happen rather than when the request finishes.
fn emit(output: &mut impl Write, response: &Response) -> Result<()> {
    let json = serde_json::to_string(response).context("encoding response")?;
    writeln!(output, "{json}").context("writing response")?;
    output.flush().context("flushing response")
}

fn handle(
    request: Request,
    host: &ScriptHost,
    searches: &mut SearchSession,
    output: &mut impl Write,
) -> Result<()> {
    match request {
        Request::LoadFile { path } => match fs::read_to_string(&path) {
            Ok(text) => {
                let view = structural_view(&text);
                emit(
                    output,
                    &Response::FileLoaded {
                        path,
                        text,
                        structural_view: view,
                    },
                )
            }
            Err(err) => emit(
                output,
                &Response::Error {
                    message: format!("reading {}: {err}", path.display()),
                },
            ),
        },
        Request::PreviewTransform {
            path,
            text,
            script,
            settings,
        } => {
            let contents = match resolve_text(&path, text) {
                Ok(contents) => contents,
                Err(err) => return emit(output, &error_response(err)),
            };
            let preview = transform_file_for_preview(&path, &contents, &script, &settings, host);
            emit(
                output,
                &Response::TransformPreview {
                    path,
                    text: preview.code,
                    structural_view: preview.ast,
                },
            )
        }
        Request::PreviewNodeTransform {
            path,
            text,
            script,
            selection,
        } => {
            let contents = match resolve_text(&path, text) {
                Ok(contents) => contents,
                Err(err) => return emit(output, &error_response(err)),
            };
            let selected = transform_selected_node(&path, &contents, &script, selection, host);
            emit(
                output,
                &Response::NodePreview {
                    path,
                    input_node_json: selected.input_node_json,
                    output_node_json: selected.output_node_json,
                },
            )
        }
        Request::ApplyToFiles {
            paths,
            script,
            settings,
        } => {
            let encoding = match EncodingStrategy::new(None) {
                Ok(encoding) => encoding,
                Err(err) => return emit(output, &error_response(err)),
            };
            let cancellation = CancellationSource::new();
            let mut emit_failure = None;
            let summary = run_batch(
                &paths,
                &script,
                &settings,
                host,
                &encoding,
                true,
                &cancellation.token(),
                |report| {
                    if emit_failure.is_some() {
                        return;
                    }
                    if let FileOutcome::Failed(message) = &report.outcome {
                        let error = Response::FileError {
                            path: report.path.clone(),
                            message: message.clone(),
                        };
                        if let Err(err) = emit(output, &error) {
                            emit_failure = Some(err);
                            return;
                        }
                    }
                    let progress = Response::Progress {
                        path: report.path.clone(),
                        processed: report.processed,
                        total: report.total,
                        changed: report.outcome == FileOutcome::Written,
                    };
                    if let Err(err) = emit(output, &progress) {
                        emit_failure = Some(err);
                    }
                },
            );
            if let Some(err) = emit_failure {
                return Err(err);
            }
            emit(
                output,
                &Response::ApplyComplete {
                    processed: summary.processed,
                    written: summary.written,
                    failed: summary.failed,
                    cancelled: summary.cancelled,
                },
            )
        }
        Request::SearchFiles { glob, text } => {
            let token = searches.begin();
            let entries = match resolve_targets(&[], std::slice::from_ref(&glob), false, &[]) {
                Ok(entries) => entries,
                Err(err) => return emit(output, &error_response(err)),
            };
            match search_files(&entries, text.as_deref(), &token) {
                // A superseded search stays silent; only the latest search
                // reports results.
                Ok(None) => Ok(()),
                Ok(Some(paths)) => emit(output, &Response::SearchResults { paths }),
                Err(err) => emit(output, &error_response(err)),
            }
        }
    }
}

fn resolve_text(path: &PathBuf, text: Option<String>) -> Result<String> {
    match text {
        Some(text) => Ok(text),
        None => fs::read_to_string(path).with_context(|| format!("reading {}", path.display())),
    }
}

fn error_response(err: anyhow::Error) -> Response {
    Response::Error {
        message: format!("{err:#}"),
    }
}
