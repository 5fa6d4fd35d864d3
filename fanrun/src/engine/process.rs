//! Process-backed callables.
//!
//! Script files and inline blocks run through the shell; named commands that
//! resolve from PATH run directly. Children are spawned with
//! `kill_on_drop`, so eviction (which drops the worker future) tears the
//! process down without a separate reaper.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::trace;

use super::callable::{Callable, ExtraArguments, Invocation, InvokeFuture};
use super::error::InvokeError;

/// Shell used for script and inline callables.
pub(crate) const SHELL: &str = "sh";

// =============================================================================
// PATH Resolution
// =============================================================================

/// Resolves a program name to an executable path.
///
/// Names containing a path separator are checked as given; bare names are
/// searched against `PATH`. Returns `None` if nothing executable matches.
pub fn resolve_program(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// =============================================================================
// Argument Rendering
// =============================================================================

/// Renders extra arguments as `--key value` pairs, in stable key order.
fn render_arguments(arguments: &ExtraArguments) -> Vec<String> {
    let mut rendered = Vec::with_capacity(arguments.len() * 2);
    for (key, value) in arguments {
        rendered.push(format!("--{}", key));
        rendered.push(value.clone());
    }
    rendered
}

/// Rejects targets that no process argv can carry.
fn preflight_target(target: &str) -> Result<(), InvokeError> {
    if target.contains('\0') {
        return Err(InvokeError::InvalidTarget(
            "target contains an interior NUL byte".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Shell Callable (script source / inline block)
// =============================================================================

/// Runs a block of shell code once per target.
///
/// The worker environment's module prologue is prepended to the body, so
/// every library unit is in scope before the code runs. The target arrives
/// as `$1`; extra arguments follow as `--key value` pairs.
pub struct ShellCallable {
    code: String,
    label: String,
}

impl ShellCallable {
    /// Creates a shell callable from code and a display label (the script
    /// path, or "inline").
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
        }
    }
}

impl Callable for ShellCallable {
    fn name(&self) -> &str {
        &self.label
    }

    fn preflight(&self, target: &str) -> Result<(), InvokeError> {
        preflight_target(target)
    }

    fn invoke(&self, invocation: Invocation) -> InvokeFuture {
        let body = format!("{}{}", invocation.environment.prologue(), self.code);
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(body).arg(&self.label).arg(&invocation.target);
        for arg in render_arguments(&invocation.arguments) {
            cmd.arg(arg);
        }
        spawn_and_wait(cmd, invocation)
    }
}

// =============================================================================
// Exec Callable (PATH-resolved command)
// =============================================================================

/// Runs a resolved executable once per target.
///
/// The target is the first argument; extra arguments follow as
/// `--key value` pairs.
pub struct ExecCallable {
    program: PathBuf,
    name: String,
}

impl ExecCallable {
    /// Creates an exec callable for an already-resolved program path.
    pub fn new(program: PathBuf) -> Self {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self { program, name }
    }

    /// The resolved program path.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Callable for ExecCallable {
    fn name(&self) -> &str {
        &self.name
    }

    fn preflight(&self, target: &str) -> Result<(), InvokeError> {
        preflight_target(target)
    }

    fn invoke(&self, invocation: Invocation) -> InvokeFuture {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&invocation.target);
        for arg in render_arguments(&invocation.arguments) {
            cmd.arg(arg);
        }
        spawn_and_wait(cmd, invocation)
    }
}

// =============================================================================
// Spawn and Wait
// =============================================================================

/// Spawns the command and waits for it, honouring cancellation.
///
/// stdout is the payload. A non-zero exit or signal death is an
/// [`InvokeError`] for this one invocation. Cancellation drops the child
/// future, which kills the process via `kill_on_drop`.
fn spawn_and_wait(mut cmd: Command, invocation: Invocation) -> InvokeFuture {
    for (key, value) in invocation.environment.variables() {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let cancel = invocation.cancel.clone();
    let item = invocation.target.clone();

    Box::pin(async move {
        trace!(item = %item, "spawning worker process");
        let child = cmd.spawn().map_err(|e| InvokeError::Spawn(e.to_string()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(InvokeError::Cancelled),
            output = child.wait_with_output() => {
                let output = output.map_err(|e| InvokeError::Io(e.to_string()))?;
                if output.status.success() {
                    Ok(output.stdout)
                } else if let Some(code) = output.status.code() {
                    Err(InvokeError::NonZeroExit { code })
                } else {
                    Err(InvokeError::KilledBySignal)
                }
            }
        }
    })
}
