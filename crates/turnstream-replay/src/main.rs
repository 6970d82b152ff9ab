//! Replays a JSONL capture of raw agent events through the projection core
//! and prints the assembled turn record.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::io::AsyncBufReadExt as _;
use turnstream_core::observability::init_observability;
use turnstream_core::prelude::*;
use turnstream_core::{RenderError, TurnFailure};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSONL file with one raw event per line
    events: PathBuf,

    /// Marker opening a reasoning span
    #[arg(long)]
    open_marker: Option<String>,

    /// Marker closing a reasoning span
    #[arg(long)]
    close_marker: Option<String>,

    /// Minimum spacing between streaming response renders (0 renders every delta)
    #[arg(long)]
    render_interval_ms: Option<u64>,

    /// Cancel the turn after this many events were sent
    #[arg(long)]
    cancel_after: Option<usize>,

    /// Do not print slot updates to stderr
    #[arg(long)]
    quiet: bool,
}

impl Args {
    fn turn_config(&self) -> anyhow::Result<TurnConfig> {
        let mut config = TurnConfig::from_env().context("reading TURNSTREAM_* environment")?;
        if let Some(open) = &self.open_marker {
            config = config.open_marker(open.clone());
        }
        if let Some(close) = &self.close_marker {
            config = config.close_marker(close.clone());
        }
        if let Some(millis) = self.render_interval_ms {
            config = config.render_interval(Duration::from_millis(millis));
        }
        config.validate()?;
        Ok(config)
    }
}

/// Prints every slot update to stderr.
struct ConsoleSurface;

struct ConsoleTarget {
    slot: Slot,
}

impl RenderTarget for ConsoleTarget {
    fn update(&self, content: &RenderContent) -> Result<(), RenderError> {
        eprintln!("[{}] {}", self.slot, content);
        Ok(())
    }
}

impl RenderSurface for ConsoleSurface {
    fn create(&mut self, slot: &Slot) -> Result<Rc<dyn RenderTarget>, RenderError> {
        Ok(Rc::new(ConsoleTarget { slot: slot.clone() }))
    }
}

async fn replay(args: &Args) -> anyhow::Result<TurnRecord> {
    let config = args.turn_config()?;
    let surface: Box<dyn RenderSurface> = if args.quiet {
        Box::new(NullSurface)
    } else {
        Box::new(ConsoleSurface)
    };
    let mut coordinator = Coordinator::new(&config, surface)?;

    let file = tokio::fs::File::open(&args.events)
        .await
        .with_context(|| format!("opening {}", args.events.display()))?;
    let (sender, stream) = turn_stream();
    let cancel = stream.cancel_handle();
    let cancel_after = args.cancel_after;

    let producer = spawn_producer(sender, move |tx| async move {
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut sent = 0_usize;
        while let Some(line) = lines.next_line().await? {
            if cancel_after.is_some_and(|limit| sent >= limit) {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            if !tx.send(RawEvent::parse(&line)?) {
                tracing::debug!("consumer went away; stopping replay");
                return Ok(());
            }
            sent += 1;
            // Let the consumer apply the event before the next one is read.
            tokio::task::yield_now().await;
        }
        if cancel_after.is_some_and(|limit| sent >= limit) {
            tracing::info!(sent, "cancelling replay");
            cancel.cancel();
        }
        Ok(())
    });

    let record = stream.drive(&mut coordinator).await?;
    producer.await.context("producer task panicked")?;
    Ok(record)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    init_observability();

    let args = Args::parse();
    let record = replay(&args).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    if record.complete {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(failure) = &record.failure {
            tracing::warn!(failure = %failure, "turn incomplete");
        }
        if matches!(record.failure, Some(TurnFailure::Cancelled)) {
            eprintln!("turn cancelled after {} events", args.cancel_after.unwrap_or_default());
        }
        Ok(ExitCode::from(2))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use turnstream_core::ToolStatus;

    use super::*;

    const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/calculator_turn.jsonl");

    fn args(events: PathBuf) -> Args {
        Args {
            events,
            open_marker: None,
            close_marker: None,
            render_interval_ms: Some(0),
            cancel_after: None,
            quiet: true,
        }
    }

    fn capture(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for line in lines {
            writeln!(file, "{line}").expect("write line");
        }
        file
    }

    #[test]
    fn parses_flags() {
        let args = Args::parse_from([
            "turnstream-replay",
            "events.jsonl",
            "--open-marker",
            "<think>",
            "--close-marker",
            "</think>",
            "--render-interval-ms",
            "0",
            "--cancel-after",
            "3",
            "--quiet",
        ]);
        let config = args.turn_config().expect("config");
        assert_eq!(config.open_marker, "<think>");
        assert_eq!(config.close_marker, "</think>");
        assert_eq!(config.render_interval, Duration::ZERO);
        assert_eq!(args.cancel_after, Some(3));
        assert!(args.quiet);
    }

    #[test]
    fn identical_markers_are_rejected() {
        let mut args = args(PathBuf::from("unused"));
        args.open_marker = Some("|".into());
        args.close_marker = Some("|".into());
        assert!(args.turn_config().is_err());
    }

    #[tokio::test]
    async fn replays_fixture_to_complete_record() {
        let record = replay(&args(PathBuf::from(FIXTURE))).await.expect("replay");
        assert!(record.complete);
        assert_eq!(record.visible_text, "Let me compute that. 2 + 2 = **4**.");
        assert_eq!(record.reasoning_text, "The user wants arithmetic; use the calculator.");
        assert_eq!(record.tool_summaries.len(), 1);
        assert_eq!(record.tool_summaries[0].status, ToolStatus::Complete);
        assert_eq!(record.tool_summaries[0].result, Some(serde_json::json!("4")));
    }

    #[tokio::test]
    async fn cancel_after_keeps_partial_text() {
        let file = capture(&[
            r#"{"data": "Partial "}"#,
            r#"{"data": "answer"}"#,
            r#"{"data": " never shown"}"#,
            r#"{"result": {"stop_reason": "end_turn"}}"#,
        ]);
        let mut args = args(file.path().to_path_buf());
        args.cancel_after = Some(2);
        let record = replay(&args).await.expect("replay");
        assert!(!record.complete);
        assert_eq!(record.visible_text, "Partial answer");
        assert_eq!(record.failure, Some(TurnFailure::Cancelled));
    }

    #[tokio::test]
    async fn bad_json_line_force_stops_the_turn() {
        let file = capture(&[r#"{"data": "ok"}"#, "", "{not json", r#"{"data": "unreached"}"#]);
        let record = replay(&args(file.path().to_path_buf())).await.expect("replay");
        assert_eq!(record.visible_text, "ok");
        assert!(matches!(record.failure, Some(TurnFailure::Producer { .. })));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = replay(&args(PathBuf::from("/definitely/not/here.jsonl")))
            .await
            .expect_err("missing file");
        assert!(err.to_string().contains("opening"));
    }
}
