//! Callable selection and resolution.
//!
//! A dispatch invocation names its unit of work through [`CallableSpec`]:
//! exactly one of a script file, an inline code block, or a named command.
//! Resolution happens once, before any task is submitted, and produces a
//! single [`Callable`] trait object with one execution strategy per variant.
//! A resolution failure aborts the whole invocation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::context::WorkerEnvironment;
use super::error::{ConfigError, InvokeError};
use super::process::{resolve_program, ExecCallable, ShellCallable};

/// Extra arguments applied uniformly to every invocation.
///
/// Keys are unique; iteration order is stable, so process-backed callables
/// render them deterministically.
pub type ExtraArguments = BTreeMap<String, String>;

/// Future returned by [`Callable::invoke`].
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, InvokeError>> + Send>>;

// =============================================================================
// Invocation
// =============================================================================

/// Everything one invocation of the callable receives.
#[derive(Debug)]
pub struct Invocation {
    /// The target item, passed as the callable's first argument. Opaque to
    /// the engine.
    pub target: String,

    /// Extra arguments shared by every invocation of this batch.
    pub arguments: Arc<ExtraArguments>,

    /// The worker context's shared environment (modules, variables).
    pub environment: Arc<WorkerEnvironment>,

    /// Cancelled when the task is evicted; process-backed callables use it
    /// to tear down their child promptly.
    pub cancel: CancellationToken,
}

// =============================================================================
// Callable Trait
// =============================================================================

/// The unit of work run once per target.
///
/// Implementations must be safe to invoke from many worker contexts at once;
/// that thread-safety is the embedder's contract, the engine cannot verify
/// it.
pub trait Callable: Send + Sync + 'static {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Synchronous per-target validation, run at submission time.
    ///
    /// An `Err` rejects the target: it is recorded as a submission failure
    /// and no task is ever created for it. The default accepts everything.
    fn preflight(&self, target: &str) -> Result<(), InvokeError> {
        let _ = target;
        Ok(())
    }

    /// Runs the callable against one target.
    ///
    /// The returned payload is opaque to the engine; an `Err` becomes the
    /// caller-visible outcome for this one target only.
    fn invoke(&self, invocation: Invocation) -> InvokeFuture;
}

// =============================================================================
// Callable Spec
// =============================================================================

/// Tagged selection of the unit of work. Exactly one variant is active per
/// invocation.
#[derive(Clone, Debug)]
pub enum CallableSpec {
    /// A script file; its source text is read once at resolution time.
    Script(PathBuf),

    /// An inline code block.
    Inline(String),

    /// A named command, resolved once against the registry and then PATH.
    Command(String),
}

impl CallableSpec {
    /// Resolves this spec to its execution strategy.
    ///
    /// Called exactly once per invocation, before submission begins:
    /// - `Script` reads the source text (unreadable file is a
    ///   configuration error) and executes it through the shell.
    /// - `Inline` executes the block through the shell.
    /// - `Command` looks the name up in `registry` first, then searches
    ///   PATH; failure of both is a configuration error.
    pub fn resolve(&self, registry: &CommandRegistry) -> Result<Arc<dyn Callable>, ConfigError> {
        match self {
            Self::Script(path) => {
                let source =
                    fs::read_to_string(path).map_err(|e| ConfigError::ScriptUnreadable {
                        path: path.clone(),
                        source: e,
                    })?;
                debug!(script = %path.display(), bytes = source.len(), "script source loaded");
                Ok(Arc::new(ShellCallable::new(
                    source,
                    path.display().to_string(),
                )))
            }
            Self::Inline(block) => Ok(Arc::new(ShellCallable::new(block.clone(), "inline"))),
            Self::Command(name) => {
                if let Some(callable) = registry.get(name) {
                    debug!(command = %name, "command resolved from registry");
                    return Ok(callable);
                }
                let program = resolve_program(name)
                    .ok_or_else(|| ConfigError::CommandNotFound { name: name.clone() })?;
                debug!(command = %name, program = %program.display(), "command resolved from PATH");
                Ok(Arc::new(ExecCallable::new(program)))
            }
        }
    }
}

impl std::fmt::Display for CallableSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script(path) => write!(f, "script {}", path.display()),
            Self::Inline(_) => write!(f, "inline block"),
            Self::Command(name) => write!(f, "command {}", name),
        }
    }
}

// =============================================================================
// Command Registry
// =============================================================================

/// Registry of named callables.
///
/// Embedders register callables before dispatch; `CallableSpec::Command`
/// resolution consults the registry before falling back to PATH. Cloneable;
/// all clones share the same entries.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    entries: Arc<RwLock<HashMap<String, Arc<dyn Callable>>>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable under a name, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, callable: Arc<dyn Callable>) {
        let name = name.into();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.insert(name, callable);
    }

    /// Looks up a callable by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Callable>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).cloned()
    }

    /// Returns whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.contains_key(name)
    }

    /// Returns the number of registered callables.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

// =============================================================================
// Function Callable
// =============================================================================

/// A callable backed by a plain function or closure.
///
/// This is the embedder-side building block for registry entries:
///
/// ```ignore
/// let double = FnCallable::arc("double", |inv| {
///     Box::pin(async move {
///         let n: i64 = inv.target.trim().parse()
///             .map_err(|_| InvokeError::InvalidTarget(inv.target.clone()))?;
///         Ok((n * 2).to_string().into_bytes())
///     })
/// });
/// registry.register("double", double);
/// ```
pub struct FnCallable {
    name: String,
    body: Box<dyn Fn(Invocation) -> InvokeFuture + Send + Sync>,
}

impl FnCallable {
    /// Creates a function callable wrapped in an `Arc`.
    pub fn arc(
        name: impl Into<String>,
        body: impl Fn(Invocation) -> InvokeFuture + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            body: Box::new(body),
        })
    }
}

impl Callable for FnCallable {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: Invocation) -> InvokeFuture {
        (self.body)(invocation)
    }
}

impl std::fmt::Debug for FnCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCallable").field("name", &self.name).finish()
    }
}
