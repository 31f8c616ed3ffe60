#![forbid(unsafe_code)]

//! FrankenCanvas CLI - stream, legalize, and repair diagram documents.
//!
//! # Commands
//!
//! - `legalize`: Truncate a markup fragment to its largest well-formed prefix
//! - `repair`: Apply the semantic repair rules to a markup document
//! - `merge`: Merge generated content into a base document
//! - `validate`: Check content against a diagram engine
//! - `parse`: Split a model response buffer into plan and code
//! - `synthesize`: Replay a captured model transcript through the pipeline

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use fc_core::Document;
use fc_document::{merge, repair_with_budget, summarize_change};
use fc_engine::{EngineProfile, engine_for};
use fc_orchestrator::{
    MemoryStore, Orchestrator, OrchestratorConfig, RecordingSink, ScriptedTransport,
};
use fc_parser::{legalize, parse_markup, parse_response, write_markup};
use serde::Serialize;
use tracing::{debug, info};

/// FrankenCanvas CLI - stream, legalize, and repair diagram documents.
#[derive(Debug, Parser)]
#[command(
    name = "fc-cli",
    version,
    about = "FrankenCanvas CLI - stream, legalize, and repair diagram documents",
    long_about = "Drives the streaming diagram synthesis pipeline from the \
        command line.\n\nFragments may end mid-tag at any point; every stage \
        produces a best-effort, always-valid document."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging (can be repeated for more detail: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Truncate a markup fragment to its largest well-formed prefix.
    Legalize {
        /// Input file path or "-" for stdin. If omitted, reads from stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Output file path. If omitted, writes to stdout.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Apply the semantic repair rules to a markup document.
    Repair {
        /// Input file path or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Rule pass budget before giving up on convergence.
        #[arg(long)]
        passes: Option<usize>,

        /// Output file path. If omitted, writes to stdout.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Merge generated content into a base document, preserving its canvas.
    Merge {
        /// Base document file (the authoritative state).
        base: String,

        /// Incoming content file (legalized before merging).
        incoming: String,

        /// Output file path. If omitted, writes to stdout.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Validate content against a diagram engine.
    Validate {
        /// Input file path or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Engine name (markup, flowscript, sketch)
        #[arg(short, long, default_value = "markup")]
        engine: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Split a model response buffer into plan and code.
    Parse {
        /// Input file path or "-" for stdin.
        #[arg(default_value = "-")]
        input: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Replay a captured model transcript through the full pipeline.
    Synthesize {
        /// Transcript file: model responses separated by `---` lines, in the
        /// order the orchestrator consumes them (phase streams, then fixes).
        #[arg(short, long)]
        transcript: String,

        /// Base document file. Defaults to the empty scaffold.
        #[arg(short, long)]
        base: Option<String>,

        /// Engine name (markup, flowscript, sketch)
        #[arg(short, long, default_value = "markup")]
        engine: String,

        /// User prompt recorded in the request.
        #[arg(long, default_value = "draw the requested diagram")]
        prompt: String,

        /// Characters per simulated stream chunk.
        #[arg(long, default_value_t = 24)]
        chunk_size: usize,

        /// Render throttle interval in milliseconds.
        #[arg(long, default_value_t = 150)]
        interval_ms: u64,

        /// Output the run report as JSON to stderr.
        #[arg(long)]
        json: bool,

        /// Output file path for the committed content. If omitted, stdout.
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Report of a synthesize run.
#[derive(Debug, Serialize)]
struct SynthesizeResult {
    engine: String,
    status: String,
    plan: Option<String>,
    summary: String,
    repair_attempts: usize,
    render_updates: usize,
    element_count: usize,
    content_bytes: usize,
}

/// Report of a validate run.
#[derive(Debug, Serialize)]
struct ValidateResult {
    engine: String,
    valid: bool,
    error: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Legalize { input, output } => cmd_legalize(&input, output.as_deref()),
        Command::Repair {
            input,
            passes,
            output,
        } => cmd_repair(&input, passes, output.as_deref()),
        Command::Merge {
            base,
            incoming,
            output,
        } => cmd_merge(&base, &incoming, output.as_deref()),
        Command::Validate {
            input,
            engine,
            json,
        } => cmd_validate(&input, &engine, json),
        Command::Parse { input, pretty } => cmd_parse(&input, pretty),
        Command::Synthesize {
            transcript,
            base,
            engine,
            prompt,
            chunk_size,
            interval_ms,
            json,
            output,
        } => cmd_synthesize(
            &transcript,
            base.as_deref(),
            &engine,
            &prompt,
            chunk_size,
            interval_ms,
            json,
            output.as_deref(),
        ),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .try_init();
}

fn load_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Ok(buffer)
    } else if Path::new(input).exists() {
        std::fs::read_to_string(input).context(format!("Failed to read file: {input}"))
    } else {
        // Treat as inline content
        Ok(input.to_string())
    }
}

fn write_output(output: Option<&str>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).context(format!("Failed to write to: {path}"))?;
            info!("Wrote output to: {path}");
        }
        None => {
            io::stdout()
                .write_all(content.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

fn load_document(path: &str) -> Result<Document> {
    let text = load_input(path)?;
    parse_markup(&text).context(format!("Failed to parse document: {path}"))
}

// =============================================================================
// Command: legalize
// =============================================================================

fn cmd_legalize(input: &str, output: Option<&str>) -> Result<()> {
    let fragment = load_input(input)?;
    let legal = legalize(&fragment);
    debug!(
        "Legalized {} bytes of fragment into {} bytes",
        fragment.len(),
        legal.len()
    );
    write_output(output, &legal)
}

// =============================================================================
// Command: repair
// =============================================================================

fn cmd_repair(input: &str, passes: Option<usize>, output: Option<&str>) -> Result<()> {
    let source = load_input(input)?;
    let budget = passes.unwrap_or(fc_document::DEFAULT_REPAIR_PASSES);
    let repaired = repair_with_budget(&source, budget);
    write_output(output, &repaired)
}

// =============================================================================
// Command: merge
// =============================================================================

fn cmd_merge(base: &str, incoming: &str, output: Option<&str>) -> Result<()> {
    let base_doc = load_document(base)?;
    let incoming_text = load_input(incoming)?;
    let incoming_doc = parse_markup(&legalize(&incoming_text))
        .context(format!("Failed to parse incoming content: {incoming}"))?;

    let merged = merge(&base_doc, &incoming_doc);
    info!("{}", summarize_change(&base_doc, &merged));
    write_output(output, &write_markup(&merged))
}

// =============================================================================
// Command: validate
// =============================================================================

fn cmd_validate(input: &str, engine_name: &str, json: bool) -> Result<()> {
    let engine =
        engine_for(engine_name).ok_or_else(|| anyhow!("Unknown engine '{engine_name}'"))?;
    let content = load_input(input)?;
    let verdict = engine.validate(&content);

    if json {
        let result = ValidateResult {
            engine: engine.name().to_string(),
            valid: verdict.valid,
            error: verdict.error.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    if verdict.valid {
        info!("{} content is valid", engine.name());
        Ok(())
    } else {
        let error = verdict.error.unwrap_or_else(|| "invalid content".to_string());
        bail!("{} validation failed: {error}", engine.name());
    }
}

// =============================================================================
// Command: parse
// =============================================================================

fn cmd_parse(input: &str, pretty: bool) -> Result<()> {
    let buffer = load_input(input)?;
    let parsed = parse_response(&buffer);
    let json = if pretty {
        serde_json::to_string_pretty(&parsed)?
    } else {
        serde_json::to_string(&parsed)?
    };
    println!("{json}");
    Ok(())
}

// =============================================================================
// Command: synthesize
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_synthesize(
    transcript: &str,
    base: Option<&str>,
    engine_name: &str,
    prompt: &str,
    chunk_size: usize,
    interval_ms: u64,
    json: bool,
    output: Option<&str>,
) -> Result<()> {
    let engine =
        engine_for(engine_name).ok_or_else(|| anyhow!("Unknown engine '{engine_name}'"))?;
    let responses = split_transcript(&load_input(transcript)?);
    if responses.is_empty() {
        bail!("Transcript '{transcript}' contains no responses");
    }
    let base_doc = match base {
        Some(path) => load_document(path)?,
        None => Document::scaffold(),
    };

    let transport = Arc::new(
        ScriptedTransport::new(responses)
            .with_chunk_size(chunk_size)
            .with_chunk_delay(Duration::from_millis(2)),
    );
    let sink = Arc::new(RecordingSink::new());
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator = Orchestrator::new(transport, Arc::clone(&engine))
        .with_sink(Arc::clone(&sink) as Arc<dyn fc_orchestrator::RenderSink>)
        .with_store(Arc::clone(&store) as Arc<dyn fc_orchestrator::DocumentStore>)
        .with_config(OrchestratorConfig {
            render_interval: Duration::from_millis(interval_ms.max(1)),
            ..OrchestratorConfig::default()
        });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start async runtime")?;
    let outcome = runtime
        .block_on(orchestrator.generate(&base_doc, prompt))
        .map_err(|error| anyhow!("Synthesis failed: {error}"))?;

    let render_updates = sink.documents().len() + sink.codes().len();
    info!(
        "Session complete: {} after {} render update(s), {} repair attempt(s)",
        outcome.summary,
        render_updates,
        outcome.repair_attempts.len()
    );

    if json {
        let result = SynthesizeResult {
            engine: engine.name().to_string(),
            status: outcome.status.as_str().to_string(),
            plan: outcome.plan.clone(),
            summary: outcome.summary.clone(),
            repair_attempts: outcome.repair_attempts.len(),
            render_updates,
            element_count: outcome.document.elements.len(),
            content_bytes: outcome.content.len(),
        };
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }

    write_output(output, &outcome.content)
}

/// Split a transcript file into responses on `---` separator lines.
fn split_transcript(text: &str) -> Vec<String> {
    let mut responses = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim() == "---" {
            responses.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    responses.push(current);
    responses.retain(|response| !response.trim().is_empty());
    responses
}

#[cfg(test)]
mod tests {
    use super::split_transcript;

    #[test]
    fn splits_on_separator_lines() {
        let transcript = "first response\nline two\n---\nsecond response\n";
        let responses = split_transcript(transcript);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], "first response\nline two\n");
        assert_eq!(responses[1], "second response\n");
    }

    #[test]
    fn single_block_without_separator() {
        let responses = split_transcript("only one\n");
        assert_eq!(responses.len(), 1);
    }

    #[test]
    fn blank_blocks_are_dropped() {
        let responses = split_transcript("a\n---\n\n---\nb\n");
        assert_eq!(responses.len(), 2);
    }
}
