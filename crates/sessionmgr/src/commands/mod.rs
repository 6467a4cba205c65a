//! CLI command handlers.

pub mod config;
pub mod run;
pub mod stories;

use sessionmgr_config::SessionmgrConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: SessionmgrConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}
