use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "turnstream.logs.jsonl";
const DEFAULT_DIRECTIVE: &str = "info";

/// Where log records go, resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LogOutput {
    Off,
    /// Compact lines on stderr, leaving stdout to the tool.
    Console,
    /// JSON lines appended to `dir/file_name`.
    JsonFile { dir: PathBuf, file_name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogSettings {
    output: LogOutput,
    directive: String,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn logging_enabled(lookup: &impl Fn(&str) -> Option<String>) -> bool {
    ["TURNSTREAM_OBSERVABILITY_ENABLED", "TURNSTREAM_OBSERVABILITY"]
        .into_iter()
        .find_map(lookup)
        .map(|value| parse_flag(&value).unwrap_or(true))
        .unwrap_or(true)
}

/// First directive that parses: `TURNSTREAM_LOG_LEVEL`, then `RUST_LOG`.
fn filter_directive(lookup: &impl Fn(&str) -> Option<String>) -> String {
    ["TURNSTREAM_LOG_LEVEL", "RUST_LOG"]
        .into_iter()
        .filter_map(lookup)
        .find(|directive| EnvFilter::try_new(directive).is_ok())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}

fn json_target(raw: &str) -> LogOutput {
    let path = Path::new(raw);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    LogOutput::JsonFile { dir, file_name }
}

fn resolve(lookup: impl Fn(&str) -> Option<String>) -> LogSettings {
    let output = if !logging_enabled(&lookup) {
        LogOutput::Off
    } else {
        match lookup("TURNSTREAM_JSON_LOG_PATH").filter(|raw| !raw.trim().is_empty()) {
            Some(raw) => json_target(raw.trim()),
            None => LogOutput::Console,
        }
    };
    LogSettings {
        output,
        directive: filter_directive(&lookup),
    }
}

fn install(settings: LogSettings) {
    let filter = EnvFilter::new(&settings.directive);
    match settings.output {
        LogOutput::Off => {}
        LogOutput::Console => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
        }
        LogOutput::JsonFile { dir, file_name } => {
            if let Err(err) = std::fs::create_dir_all(&dir) {
                eprintln!("turnstream: cannot create log directory {}: {err}", dir.display());
                return;
            }
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();
        }
    }
}

/// Installs the process-wide `tracing` subscriber. Later calls are no-ops.
///
/// Environment variables:
/// - `TURNSTREAM_OBSERVABILITY_ENABLED` / `TURNSTREAM_OBSERVABILITY`: enable/disable flag (default enabled).
/// - `TURNSTREAM_LOG_LEVEL`: filter directive (`info`, `turnstream_core=debug`, ...), then `RUST_LOG`.
/// - `TURNSTREAM_JSON_LOG_PATH`: when set, JSON lines are appended to that file.
///   Otherwise a compact console format is written to stderr.
pub fn init_observability() {
    INIT.get_or_init(|| install(resolve(|key| std::env::var(key).ok())));
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn flag_parsing_accepts_common_spellings() {
        assert_eq!(parse_flag(" YES "), Some(true));
        assert_eq!(parse_flag("disabled"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn first_present_key_wins_and_garbage_means_enabled() {
        assert!(logging_enabled(&env(&[])));
        assert!(!logging_enabled(&env(&[("TURNSTREAM_OBSERVABILITY", "off")])));
        assert!(logging_enabled(&env(&[
            ("TURNSTREAM_OBSERVABILITY_ENABLED", "???"),
            ("TURNSTREAM_OBSERVABILITY", "off"),
        ])));
    }

    #[test]
    fn defaults_to_console_at_info() {
        assert_eq!(
            resolve(env(&[])),
            LogSettings {
                output: LogOutput::Console,
                directive: "info".into(),
            }
        );
    }

    #[test]
    fn disabled_flag_turns_output_off() {
        let settings = resolve(env(&[
            ("TURNSTREAM_OBSERVABILITY_ENABLED", "0"),
            ("TURNSTREAM_JSON_LOG_PATH", "/tmp/t.jsonl"),
        ]));
        assert_eq!(settings.output, LogOutput::Off);
    }

    #[test]
    fn json_path_splits_into_directory_and_file() {
        assert_eq!(
            resolve(env(&[("TURNSTREAM_JSON_LOG_PATH", "logs/run.jsonl")])).output,
            LogOutput::JsonFile {
                dir: PathBuf::from("logs"),
                file_name: "run.jsonl".into(),
            }
        );
        assert_eq!(
            resolve(env(&[("TURNSTREAM_JSON_LOG_PATH", "run.jsonl")])).output,
            LogOutput::JsonFile {
                dir: PathBuf::from("."),
                file_name: "run.jsonl".into(),
            }
        );
        assert_eq!(
            resolve(env(&[("TURNSTREAM_JSON_LOG_PATH", "  ")])).output,
            LogOutput::Console
        );
    }

    #[test]
    fn log_level_beats_rust_log_unless_unparsable() {
        let both = env(&[
            ("TURNSTREAM_LOG_LEVEL", "turnstream_core=debug"),
            ("RUST_LOG", "warn"),
        ]);
        assert_eq!(filter_directive(&both), "turnstream_core=debug");
        let bad = env(&[("TURNSTREAM_LOG_LEVEL", "turnstream_core=loud"), ("RUST_LOG", "warn")]);
        assert_eq!(filter_directive(&bad), "warn");
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
        tracing::info!(check = "observability", "initialized twice without panicking");
    }
}
