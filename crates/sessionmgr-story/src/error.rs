//! Error types for the story runtime.

use thiserror::Error;

/// Error type for story runtime operations.
///
/// Most orchestration failures are absorbed and logged inside queued
/// operations; these errors surface only from collaborator calls and from
/// handles given to modules.
#[derive(Debug, Error)]
pub enum StoryError {
    /// The link was closed when its story stopped.
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// No story with this id exists.
    #[error("Story not found: {0}")]
    StoryNotFound(String),

    /// The story must be running for this request.
    #[error("Story not running: {0}")]
    StoryNotRunning(String),

    /// No module could be resolved for an intent.
    #[error("No modules found for intent: {0}")]
    NoModulesFound(String),

    /// A story shell could not be started.
    #[error("Story shell launch failed: {0}")]
    ShellLaunch(String),

    /// A module could not be started.
    #[error("Module launch failed for {module_url}: {reason}")]
    ModuleLaunch { module_url: String, reason: String },

    /// A module process did not exit cleanly.
    #[error("Module teardown failed for {module_url}: {reason}")]
    ModuleTeardown { module_url: String, reason: String },

    /// The story controller behind this handle is gone.
    #[error("Story controller released: {0}")]
    ControllerReleased(String),

    /// The operation queue was torn down before the operation finished.
    #[error(transparent)]
    Abandoned(#[from] sessionmgr_ops::Error),
}

/// Result type for story runtime operations.
pub type Result<T> = std::result::Result<T, StoryError>;
