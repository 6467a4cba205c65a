//! Collaborator contracts.
//!
//! The story runtime drives processes it does not own: the story shell that
//! composes module surfaces, the session shell that hosts story views, the
//! launcher that starts module processes, and the resolver and focus
//! services. Each is a narrow trait so tests can substitute fakes (see the
//! `testing` module) and the binary can substitute headless implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sessionmgr_types::{
    ExecuteResult, Intent, ModuleManifest, StoryCommand, SurfaceInfo, ViewConnection,
    ViewHolderToken,
};

use crate::Result;
use crate::module_context::ModuleContext;
use crate::watcher::FocusWatcher;

// ─────────────────────────────────────────────────────────────────────────────
// Shells
// ─────────────────────────────────────────────────────────────────────────────

/// A running story shell process.
#[async_trait]
pub trait StoryShell: Send + Sync {
    /// Bind the shell to a story. Called once, before any surface is added.
    fn initialize(&self, story_id: &str);

    /// The view the shell renders into; handed to the session shell.
    fn view_token(&self) -> ViewHolderToken;

    /// Add a module surface. `surface_info.parent_id` names a surface the
    /// shell has already been given, or is empty for a root surface.
    fn add_surface(&self, view: ViewConnection, surface_info: SurfaceInfo);

    fn focus_surface(&self, surface_id: &str);

    /// Completes once the shell has processed the defocus.
    async fn defocus_surface(&self, surface_id: &str);

    /// Render the current story contents. `None` if the shell cannot.
    async fn take_snapshot(&self) -> Option<Vec<u8>>;

    /// Terminate the shell. Callers bound the wait themselves.
    async fn teardown(&self);
}

/// Starts story shell processes.
#[async_trait]
pub trait StoryShellFactory: Send + Sync {
    async fn launch_story_shell(&self) -> Result<Arc<dyn StoryShell>>;
}

/// The session-wide shell that hosts story views.
#[async_trait]
pub trait SessionShell: Send + Sync {
    fn attach_view(&self, story_id: &str, view: ViewHolderToken);

    async fn detach_view(&self, story_id: &str);
}

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Everything needed to start one module instance.
#[derive(Debug, Clone)]
pub struct ModuleLaunchConfig {
    pub story_id: String,
    pub module_path: Vec<String>,
    pub module_url: String,
    /// Label of the per-story environment the module runs in.
    pub environment: String,
}

/// Starts module processes.
#[async_trait]
pub trait ModuleLauncher: Send + Sync {
    /// Start a module. The instance reaches back into its story through
    /// `context`; it must not await story operations from inside `launch`.
    async fn launch(
        &self,
        config: ModuleLaunchConfig,
        context: Arc<ModuleContext>,
    ) -> Result<Box<dyn ModuleInstance>>;
}

/// A running module process.
#[async_trait]
pub trait ModuleInstance: Send + Sync {
    /// The module's rendered view, if it has one.
    fn view_token(&self) -> Option<ViewHolderToken>;

    /// Deliver an intent, on start and again whenever the module is reused
    /// for a new intent.
    ///
    /// Called from a delivery task of the instance, never from inside a
    /// story operation: the story does not wait for it, and the module may
    /// call into its [`ModuleContext`] from here. Intents arrive one at a
    /// time in the order they were sent.
    async fn handle_intent(&self, intent: Intent);

    /// Stop the process, waiting at most `timeout`. A process that is
    /// already gone counts as stopped; an error means it did not exit
    /// cleanly.
    async fn teardown(&self, timeout: Duration) -> Result<()>;
}

/// A module able to handle an intent.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleResolverResult {
    pub module_url: String,
    pub manifest: Option<ModuleManifest>,
}

/// Selects modules for intents that do not name a handler.
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    async fn find_modules(&self, intent: &Intent) -> Vec<ModuleResolverResult>;
}

/// Reads module manifests out of band.
#[async_trait]
pub trait ModuleFacetReader: Send + Sync {
    async fn get_module_manifest(&self, module_url: &str) -> Option<ModuleManifest>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Session services
// ─────────────────────────────────────────────────────────────────────────────

/// Focus arbitration across stories.
pub trait FocusProvider: Send + Sync {
    fn watch(&self, watcher: Arc<dyn FocusWatcher>);

    /// Ask for `story_id` to be focused; `None` clears focus.
    fn request(&self, story_id: Option<&str>);
}

/// Displays a previously taken story snapshot.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self, snapshot: Vec<u8>);
}

/// Applies a batch of commands to an existing story.
#[async_trait]
pub trait StoryCommandExecutor: Send + Sync {
    async fn execute_commands(&self, story_id: &str, commands: Vec<StoryCommand>)
    -> ExecuteResult;
}
