//! Worker contexts and their initial environment.
//!
//! Every worker context starts from the same immutable
//! [`EnvironmentTemplate`], initialized exactly once at pool construction
//! into a [`WorkerEnvironment`] that is shared read-only by all contexts.
//! Library units ("modules") are configuration data attached at
//! pool-construction time, never per task.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use super::error::ConfigError;

/// File extension recognized as a loadable library unit.
const MODULE_EXTENSION: &str = "sh";

/// Environment variable naming the module directory, exported to workers.
pub const MODULE_PATH_VAR: &str = "FANRUN_MODULE_PATH";

/// Environment variable listing the loaded module files, exported to workers.
pub const MODULES_VAR: &str = "FANRUN_MODULES";

// =============================================================================
// Environment Template
// =============================================================================

/// Caller-supplied description of every worker context's initial state.
///
/// The engine treats this as opaque initialization data: it is handed to the
/// context initializer once, at pool construction, and never consulted again.
#[derive(Clone, Debug, Default)]
pub struct EnvironmentTemplate {
    /// Directory whose discoverable library units (`*.sh`) are loaded into
    /// every execution context.
    pub module_path: Option<PathBuf>,

    /// Named library units loaded the same way. Resolved relative to
    /// `module_path` when one is set, otherwise used as paths.
    pub module_names: Vec<String>,

    /// Extra environment variables exported to every worker.
    pub variables: BTreeMap<String, String>,
}

// =============================================================================
// Worker Environment
// =============================================================================

/// The initialized environment shared read-only by all worker contexts.
#[derive(Debug, Default)]
pub struct WorkerEnvironment {
    modules: Vec<PathBuf>,
    prologue: String,
    variables: Vec<(String, String)>,
}

impl WorkerEnvironment {
    /// Initializes the environment from a template.
    ///
    /// Scans `module_path` for library units and resolves every named unit.
    /// An unreadable module path or a missing named unit is a configuration
    /// error: nothing may be submitted against a half-initialized
    /// environment.
    pub fn initialize(template: &EnvironmentTemplate) -> Result<Self, ConfigError> {
        let mut modules = Vec::new();

        if let Some(dir) = &template.module_path {
            let entries = fs::read_dir(dir).map_err(|e| ConfigError::ModulePathUnreadable {
                path: dir.clone(),
                source: e,
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| ConfigError::ModulePathUnreadable {
                    path: dir.clone(),
                    source: e,
                })?;
                let path = entry.path();
                if path.is_file()
                    && path.extension().is_some_and(|ext| ext == MODULE_EXTENSION)
                {
                    modules.push(path);
                }
            }
            // Deterministic load order regardless of directory iteration order.
            modules.sort();
        }

        for name in &template.module_names {
            let mut path = match &template.module_path {
                Some(dir) => dir.join(name),
                None => PathBuf::from(name),
            };
            if path.extension().is_none() {
                path.set_extension(MODULE_EXTENSION);
            }
            if !path.is_file() {
                return Err(ConfigError::ModuleNotFound { name: name.clone() });
            }
            if !modules.contains(&path) {
                modules.push(path);
            }
        }

        let mut prologue = String::new();
        for module in &modules {
            prologue.push_str(&format!(". \"{}\"\n", module.display()));
        }

        let mut variables: Vec<(String, String)> = template
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(dir) = &template.module_path {
            variables.push((MODULE_PATH_VAR.to_string(), dir.display().to_string()));
        }
        if !modules.is_empty() {
            let joined = modules
                .iter()
                .map(|m| m.display().to_string())
                .collect::<Vec<_>>()
                .join(":");
            variables.push((MODULES_VAR.to_string(), joined));
        }

        Ok(Self {
            modules,
            prologue,
            variables,
        })
    }

    /// Library units loaded into every context, in load order.
    pub fn modules(&self) -> &[PathBuf] {
        &self.modules
    }

    /// Shell preamble sourcing every library unit.
    pub fn prologue(&self) -> &str {
        &self.prologue
    }

    /// Environment variables exported to every worker.
    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }
}

// =============================================================================
// Worker Context
// =============================================================================

/// A reusable isolated execution context.
///
/// A context serves one invocation at a time and is returned to the pool
/// when the invocation ends, keeping a count of how many invocations it has
/// served across its lifetime.
#[derive(Debug)]
pub struct WorkerContext {
    id: usize,
    environment: Arc<WorkerEnvironment>,
    invocations: u64,
}

impl WorkerContext {
    pub(crate) fn new(id: usize, environment: Arc<WorkerEnvironment>) -> Self {
        Self {
            id,
            environment,
            invocations: 0,
        }
    }

    /// Stable identifier of this context within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The shared read-only environment.
    pub fn environment(&self) -> &WorkerEnvironment {
        &self.environment
    }

    /// Clones the shared environment handle for an invocation to own.
    pub fn environment_handle(&self) -> Arc<WorkerEnvironment> {
        Arc::clone(&self.environment)
    }

    /// Number of invocations this context has served.
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub(crate) fn record_invocation(&mut self) {
        self.invocations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_module(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_empty_template_initializes_empty_environment() {
        let env = WorkerEnvironment::initialize(&EnvironmentTemplate::default()).unwrap();
        assert!(env.modules().is_empty());
        assert!(env.prologue().is_empty());
        assert!(env.variables().is_empty());
    }

    #[test]
    fn test_module_path_discovers_units_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "zeta.sh", "zeta() { :; }");
        write_module(dir.path(), "alpha.sh", "alpha() { :; }");
        write_module(dir.path(), "notes.txt", "not a module");

        let template = EnvironmentTemplate {
            module_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let env = WorkerEnvironment::initialize(&template).unwrap();

        assert_eq!(env.modules().len(), 2);
        assert!(env.modules()[0].ends_with("alpha.sh"));
        assert!(env.modules()[1].ends_with("zeta.sh"));
        assert!(env.prologue().contains("alpha.sh"));
        assert!(env.prologue().contains("zeta.sh"));
    }

    #[test]
    fn test_named_module_resolved_against_module_path() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "extra.sh", "extra() { :; }");

        let template = EnvironmentTemplate {
            module_path: Some(dir.path().to_path_buf()),
            module_names: vec!["extra".to_string()],
            ..Default::default()
        };
        let env = WorkerEnvironment::initialize(&template).unwrap();
        // Discovered once via the scan, not duplicated by the name.
        assert_eq!(env.modules().len(), 1);
    }

    #[test]
    fn test_missing_named_module_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = EnvironmentTemplate {
            module_path: Some(dir.path().to_path_buf()),
            module_names: vec!["nope".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            WorkerEnvironment::initialize(&template),
            Err(ConfigError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn test_unreadable_module_path_is_config_error() {
        let template = EnvironmentTemplate {
            module_path: Some(PathBuf::from("/no/such/dir/fanrun-test")),
            ..Default::default()
        };
        assert!(matches!(
            WorkerEnvironment::initialize(&template),
            Err(ConfigError::ModulePathUnreadable { .. })
        ));
    }

    #[test]
    fn test_variables_exported() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "lib.sh", "lib() { :; }");

        let mut vars = BTreeMap::new();
        vars.insert("ANSWER".to_string(), "42".to_string());
        let template = EnvironmentTemplate {
            module_path: Some(dir.path().to_path_buf()),
            variables: vars,
            ..Default::default()
        };
        let env = WorkerEnvironment::initialize(&template).unwrap();

        let keys: Vec<&str> = env.variables().iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"ANSWER"));
        assert!(keys.contains(&MODULE_PATH_VAR));
        assert!(keys.contains(&MODULES_VAR));
    }

    #[test]
    fn test_context_records_invocations() {
        let env = Arc::new(WorkerEnvironment::default());
        let mut ctx = WorkerContext::new(3, env);
        assert_eq!(ctx.id(), 3);
        assert_eq!(ctx.invocations(), 0);

        ctx.record_invocation();
        ctx.record_invocation();
        assert_eq!(ctx.invocations(), 2);
    }
}
