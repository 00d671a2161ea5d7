//! Feeds JSON-lines events into an engine and writes one snapshot per event.

use serde_json::{json, Value};
use statechart_core::{CoreError, Event, StateMachineEngine};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Output options for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pretty: bool,
    /// Quiet period that ends the run after input is exhausted.
    pub settle: Duration,
}

/// Counts of what happened during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub rejected: usize,
}

/// Sends every event line to the engine, then waits for the machine to go
/// quiet and writes the final snapshot.
///
/// Malformed lines and rejected events are reported in the output and do
/// not stop the run.
pub async fn run_events<R, W>(
    engine: &StateMachineEngine,
    input: R,
    out: &mut W,
    options: &RunOptions,
) -> Result<RunSummary, Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut summary = RunSummary::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<Event>(line) {
            Ok(event) => {
                let event_type = event.event_type.clone();
                match engine.send(event).await {
                    Ok(output) => {
                        summary.processed += 1;
                        serde_json::to_value(&output)?
                    }
                    Err(CoreError::EngineStopped) => return Err(CoreError::EngineStopped.into()),
                    Err(e) => {
                        summary.rejected += 1;
                        json!({ "event": event_type, "code": e.error_code(), "error": e.to_string() })
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event line");
                summary.rejected += 1;
                json!({ "code": "INVALID_EVENT", "error": e.to_string() })
            }
        };
        write_record(out, &record, options.pretty)?;
    }

    settle(engine, options.settle).await;
    write_record(out, &serde_json::to_value(engine.snapshot())?, options.pretty)?;

    tracing::info!(
        processed = summary.processed,
        rejected = summary.rejected,
        "input exhausted"
    );
    Ok(summary)
}

/// Returns once no snapshot has been published for `quiet`.
pub async fn settle(engine: &StateMachineEngine, quiet: Duration) {
    let mut rx = engine.subscribe();
    while let Ok(Ok(())) = tokio::time::timeout(quiet, rx.changed()).await {}
}

fn write_record<W: Write>(out: &mut W, record: &Value, pretty: bool) -> std::io::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, record)?;
    } else {
        serde_json::to_writer(&mut *out, record)?;
    }
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use statechart_loader::Loader;
    use std::sync::Arc;

    const MACHINE: &str = r#"{
        "initial": "Idle",
        "states": {
            "Idle": {
                "on": {
                    "SUBMIT": {
                        "target": "Loading",
                        "guard": "({event.user} != \"\")",
                        "actions": [{ "type": "assign", "key": "user", "value": "{event.user}" }]
                    },
                    "CHECK": { "target": "Idle", "guard": "({event.n} > true)" }
                }
            },
            "Loading": {
                "invoke": { "id": "login", "src": "echo", "input": { "user": "{context.user}" } },
                "on": { "done.invoke.login": "Success" }
            },
            "Success": {}
        }
    }"#;

    fn engine_from_file() -> StateMachineEngine {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(MACHINE.as_bytes()).unwrap();

        let loader = builtins::register(Loader::new());
        let definition = loader.from_path(file.path()).unwrap();
        StateMachineEngine::new(Arc::new(definition)).unwrap()
    }

    fn options() -> RunOptions {
        RunOptions {
            pretty: false,
            settle: Duration::from_millis(100),
        }
    }

    fn records(out: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_run_reaches_final_state() {
        let engine = engine_from_file();
        let input = b"{\"type\": \"SUBMIT\", \"data\": {\"user\": \"ada\"}}\n\n";
        let mut out = Vec::new();

        let summary = run_events(&engine, &input[..], &mut out, &options())
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { processed: 1, rejected: 0 });
        let records = records(&out);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["state"], "Loading");
        assert_eq!(records[1]["state"], "Success");
        assert_eq!(records[1]["context"]["user"], "ada");
    }

    #[tokio::test]
    async fn test_bad_lines_are_reported_and_skipped() {
        let engine = engine_from_file();
        let input = b"not json\n{\"type\": \"CHECK\", \"data\": {\"n\": 1}}\n{\"type\": \"NOPE\"}\n";
        let mut out = Vec::new();

        let summary = run_events(&engine, &input[..], &mut out, &options())
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { processed: 1, rejected: 2 });
        let records = records(&out);
        assert_eq!(records[0]["code"], "INVALID_EVENT");
        assert_eq!(records[1]["code"], "GUARD_EVALUATION");
        assert_eq!(records[1]["event"], "CHECK");
        assert_eq!(records[2]["state"], "Idle");
        assert_eq!(records[3]["state"], "Idle");
    }

    #[tokio::test]
    async fn test_pretty_output() {
        let engine = engine_from_file();
        let mut out = Vec::new();
        let options = RunOptions {
            pretty: true,
            ..options()
        };

        run_events(&engine, &b""[..], &mut out, &options).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("\n  \"state\": \"Idle\""));
    }
}
