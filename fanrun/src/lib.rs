//! FanRun - bounded-concurrency dispatch of one callable across many targets.
//!
//! This library runs a single unit of work (a script file, an inline code
//! block, or a named command) against every item of a target list, with a
//! fixed cap on how many invocations run at once, and returns the aggregated
//! outputs once every invocation has finished or been evicted for exceeding
//! its wait budget.
//!
//! # High-Level API
//!
//! For most use cases, [`engine::dispatch`] is the entry point:
//!
//! ```ignore
//! use fanrun::engine::{dispatch, CallableSpec, DispatchRequest, EngineConfig};
//!
//! let report = dispatch(DispatchRequest {
//!     callable: CallableSpec::Inline("echo \"$1\"".into()),
//!     targets: vec!["alpha".into(), "beta".into()],
//!     arguments: Default::default(),
//!     config: EngineConfig::default(),
//!     registry: None,
//!     progress: None,
//! })
//! .await?;
//!
//! for result in &report.results {
//!     // one entry per completed target, unordered
//! }
//! ```

pub mod engine;
pub mod logging;

/// Version of the FanRun library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
