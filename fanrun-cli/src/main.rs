//! FanRun CLI - dispatch one unit of work across many targets.
//!
//! This binary provides a command-line interface to the FanRun library:
//! select a callable (script file, inline block, or named command), feed it
//! a target list, and print the aggregated outputs. Result payloads go to
//! stdout; diagnostics and the progress line go to stderr.

mod error;
mod progress;

use clap::Parser;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use fanrun::engine::{
    dispatch, BatchReport, CallableSpec, DispatchRequest, EngineConfig, EnvironmentTemplate,
    ExtraArguments, ProgressSink, TimeoutPolicy, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_BUDGET_SECS,
};
use fanrun::logging::init_logging_full;

use crate::error::CliError;
use crate::progress::ConsoleProgressSink;

#[derive(Parser)]
#[command(name = "fanrun")]
#[command(about = "Dispatch a script, inline block, or command across many targets", long_about = None)]
#[command(group(
    clap::ArgGroup::new("callable")
        .required(true)
        .args(["script", "inline", "command"]),
))]
struct Args {
    /// Script file to run once per target (the target arrives as $1)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Inline code block to run once per target (the target arrives as $1)
    #[arg(long)]
    inline: Option<String>,

    /// Named command, resolved from PATH once before submission
    #[arg(long)]
    command: Option<String>,

    /// Targets to dispatch against
    targets: Vec<String>,

    /// File with one target per line ('-' reads stdin)
    #[arg(long)]
    targets_file: Option<PathBuf>,

    /// Extra NAME=VALUE argument applied to every invocation
    #[arg(long = "arg", value_name = "NAME=VALUE")]
    extra_args: Vec<String>,

    /// Maximum concurrent invocations
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    max_concurrency: usize,

    /// Completion poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Wait budget in seconds before the timed pending task is evicted
    #[arg(long, default_value_t = DEFAULT_WAIT_BUDGET_SECS)]
    max_wait_seconds: u64,

    /// Directory of library units loaded into every execution context
    #[arg(long)]
    module_path: Option<PathBuf>,

    /// Named library unit loaded into every execution context
    #[arg(long = "module", value_name = "NAME")]
    modules: Vec<String>,

    /// Time every pending task individually instead of only the oldest
    #[arg(long)]
    per_task_deadline: bool,

    /// Suppress the progress line and summary
    #[arg(long)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => process::exit(code),
        Err(error) => error.exit(),
    }
}

async fn run(args: Args) -> Result<i32, CliError> {
    // Results go to stdout; keep log output in the file only.
    let _guard = init_logging_full("logs", "fanrun.log", false, args.debug)
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

    tracing::info!("FanRun v{}", fanrun::VERSION);

    let callable = select_callable(&args);
    let targets = load_targets(&args)?;
    let arguments = parse_arguments(&args.extra_args)?;

    let config = EngineConfig {
        max_concurrency: args.max_concurrency,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        wait_budget: Duration::from_secs(args.max_wait_seconds),
        timeout_policy: if args.per_task_deadline {
            TimeoutPolicy::PerTask
        } else {
            TimeoutPolicy::HeadOfLine
        },
        environment: EnvironmentTemplate {
            module_path: args.module_path.clone(),
            module_names: args.modules.clone(),
            variables: BTreeMap::new(),
        },
    };

    let progress: Option<Arc<dyn ProgressSink>> = if args.quiet {
        None
    } else {
        Some(Arc::new(ConsoleProgressSink))
    };

    let report = dispatch(DispatchRequest {
        callable,
        targets,
        arguments,
        config,
        registry: None,
        progress,
    })
    .await
    .map_err(CliError::Engine)?;

    if !args.quiet {
        // End the in-place progress line before printing anything else.
        eprintln!();
    }
    render_report(&report, args.quiet)
}

/// Maps the mutually exclusive selection flags onto the callable spec.
fn select_callable(args: &Args) -> CallableSpec {
    if let Some(path) = &args.script {
        CallableSpec::Script(path.clone())
    } else if let Some(block) = &args.inline {
        CallableSpec::Inline(block.clone())
    } else {
        let name = args
            .command
            .clone()
            .expect("clap group guarantees one callable selection");
        CallableSpec::Command(name)
    }
}

/// Collects targets from positional arguments and the optional targets file.
fn load_targets(args: &Args) -> Result<Vec<String>, CliError> {
    let mut targets = args.targets.clone();

    if let Some(path) = &args.targets_file {
        let text = if path.as_os_str() == "-" {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|error| CliError::TargetsFile {
                    path: "-".to_string(),
                    error,
                })?;
            buffer
        } else {
            std::fs::read_to_string(path).map_err(|error| CliError::TargetsFile {
                path: path.display().to_string(),
                error,
            })?
        };
        targets.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }

    if targets.is_empty() {
        return Err(CliError::Usage("no targets supplied".to_string()));
    }
    Ok(targets)
}

/// Parses repeated NAME=VALUE flags into the extra-argument map.
fn parse_arguments(raw: &[String]) -> Result<ExtraArguments, CliError> {
    let mut arguments = ExtraArguments::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| CliError::Usage(format!("expected NAME=VALUE, got '{}'", entry)))?;
        if name.is_empty() {
            return Err(CliError::Usage(format!(
                "argument name missing in '{}'",
                entry
            )));
        }
        if arguments
            .insert(name.to_string(), value.to_string())
            .is_some()
        {
            return Err(CliError::Usage(format!("duplicate argument '{}'", name)));
        }
    }
    Ok(arguments)
}

/// Prints results to stdout and diagnostics to stderr; returns the exit code.
fn render_report(report: &BatchReport, quiet: bool) -> Result<i32, CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for result in &report.results {
        match &result.payload {
            Ok(payload) => {
                out.write_all(payload).map_err(CliError::OutputWrite)?;
                if !payload.ends_with(b"\n") {
                    out.write_all(b"\n").map_err(CliError::OutputWrite)?;
                }
            }
            Err(error) => {
                eprintln!("fanrun: target '{}' failed: {}", result.target, error);
            }
        }
    }
    out.flush().map_err(CliError::OutputWrite)?;

    for rejection in &report.rejections {
        eprintln!(
            "fanrun: target '{}' rejected: {}",
            rejection.target, rejection.reason
        );
    }
    for eviction in &report.evictions {
        eprintln!(
            "fanrun: target '{}' evicted after {:.1}s",
            eviction.target,
            eviction.waited.as_secs_f64()
        );
    }

    if !quiet {
        eprintln!(
            "fanrun: {} succeeded, {} failed, {} rejected, {} evicted in {:.2}s",
            report.succeeded(),
            report.faulted(),
            report.rejections.len(),
            report.evictions.len(),
            report.elapsed.as_secs_f64()
        );
    }

    Ok(if report.is_complete() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_exactly_one_callable_required() {
        assert!(Args::try_parse_from(["fanrun", "t1"]).is_err());
        assert!(Args::try_parse_from(["fanrun", "--inline", "x", "--command", "y", "t1"]).is_err());
        assert!(Args::try_parse_from(["fanrun", "--inline", "x", "t1"]).is_ok());
        assert!(Args::try_parse_from(["fanrun", "--command", "echo", "t1"]).is_ok());
    }

    #[test]
    fn test_select_callable_variants() {
        let args = Args::try_parse_from(["fanrun", "--command", "echo", "t"]).unwrap();
        assert!(matches!(select_callable(&args), CallableSpec::Command(_)));

        let args = Args::try_parse_from(["fanrun", "--inline", "echo hi", "t"]).unwrap();
        assert!(matches!(select_callable(&args), CallableSpec::Inline(_)));

        let args = Args::try_parse_from(["fanrun", "--script", "run.sh", "t"]).unwrap();
        assert!(matches!(select_callable(&args), CallableSpec::Script(_)));
    }

    #[test]
    fn test_parse_arguments() {
        let parsed =
            parse_arguments(&["mode=fast".to_string(), "level=3".to_string()]).unwrap();
        assert_eq!(parsed.get("mode").map(String::as_str), Some("fast"));
        assert_eq!(parsed.get("level").map(String::as_str), Some("3"));

        assert!(parse_arguments(&["novalue".to_string()]).is_err());
        assert!(parse_arguments(&["=oops".to_string()]).is_err());
        assert!(parse_arguments(&["dup=1".to_string(), "dup=2".to_string()]).is_err());
    }

    #[test]
    fn test_load_targets_merges_file_and_positionals() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file-1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  from-file-2  ").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = Args::try_parse_from([
            "fanrun",
            "--inline",
            "x",
            "--targets-file",
            &path,
            "positional",
        ])
        .unwrap();

        let targets = load_targets(&args).unwrap();
        assert_eq!(targets, vec!["positional", "from-file-1", "from-file-2"]);
    }

    #[test]
    fn test_load_targets_requires_at_least_one() {
        let args = Args::try_parse_from(["fanrun", "--inline", "x"]).unwrap();
        assert!(matches!(load_targets(&args), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_load_targets_missing_file() {
        let args = Args::try_parse_from([
            "fanrun",
            "--inline",
            "x",
            "--targets-file",
            "/no/such/targets-fanrun-test.txt",
        ])
        .unwrap();
        assert!(matches!(
            load_targets(&args),
            Err(CliError::TargetsFile { .. })
        ));
    }

    #[test]
    fn test_default_knobs() {
        let args = Args::try_parse_from(["fanrun", "--inline", "x", "t"]).unwrap();
        assert_eq!(args.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(args.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(args.max_wait_seconds, DEFAULT_WAIT_BUDGET_SECS);
        assert!(!args.per_task_deadline);
    }
}
