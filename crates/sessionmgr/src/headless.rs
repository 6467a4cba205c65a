//! Headless collaborators for running stories without a display.
//!
//! Shells only record and log what they are given. Modules are resolved
//! from the `[[modules]]` catalog and, when the catalog names an
//! executable, run as child processes that receive each intent as one JSON
//! line on stdin.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sessionmgr_config::SessionmgrConfig;
use sessionmgr_story::interfaces::{
    FocusProvider, ModuleFacetReader, ModuleInstance, ModuleLaunchConfig, ModuleLauncher,
    ModuleResolver, ModuleResolverResult, SessionShell, StoryShell, StoryShellFactory,
};
use sessionmgr_story::watcher::FocusWatcher;
use sessionmgr_story::{ModuleContext, Result, StoryError};
use sessionmgr_types::{
    FocusInfo, Intent, ModuleManifest, SurfaceInfo, ViewConnection, ViewHolderToken,
    encode_module_path,
};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Shells
// ─────────────────────────────────────────────────────────────────────────────

/// A story shell that keeps the surface tree in memory.
pub struct HeadlessStoryShell {
    url: String,
    view: ViewHolderToken,
    story_id: Mutex<Option<String>>,
    surfaces: Mutex<Vec<(String, String)>>,
}

impl HeadlessStoryShell {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            view: ViewHolderToken::generate(),
            story_id: Mutex::new(None),
            surfaces: Mutex::new(Vec::new()),
        }
    }

    fn story_label(&self) -> String {
        self.story_id.lock().clone().unwrap_or_else(|| "<preloaded>".to_string())
    }
}

#[async_trait]
impl StoryShell for HeadlessStoryShell {
    fn initialize(&self, story_id: &str) {
        *self.story_id.lock() = Some(story_id.to_string());
        debug!(shell = %self.url, story_id = %story_id, "Story shell initialized");
    }

    fn view_token(&self) -> ViewHolderToken {
        self.view.clone()
    }

    fn add_surface(&self, view: ViewConnection, surface_info: SurfaceInfo) {
        info!(
            story_id = %self.story_label(),
            surface_id = %view.surface_id,
            parent_id = %surface_info.parent_id,
            "Surface added"
        );
        self.surfaces
            .lock()
            .push((view.surface_id, surface_info.parent_id));
    }

    fn focus_surface(&self, surface_id: &str) {
        debug!(story_id = %self.story_label(), surface_id = %surface_id, "Surface focused");
    }

    async fn defocus_surface(&self, surface_id: &str) {
        debug!(story_id = %self.story_label(), surface_id = %surface_id, "Surface defocused");
    }

    async fn take_snapshot(&self) -> Option<Vec<u8>> {
        let surfaces = self.surfaces.lock().clone();
        serde_json::to_vec(&surfaces).ok()
    }

    async fn teardown(&self) {
        debug!(story_id = %self.story_label(), "Story shell torn down");
    }
}

/// Launches [`HeadlessStoryShell`]s.
pub struct HeadlessStoryShellFactory {
    url: String,
}

impl HeadlessStoryShellFactory {
    pub fn new(config: &SessionmgrConfig) -> Self {
        Self {
            url: config.story_section().story_shell_url,
        }
    }
}

#[async_trait]
impl StoryShellFactory for HeadlessStoryShellFactory {
    async fn launch_story_shell(&self) -> Result<Arc<dyn StoryShell>> {
        Ok(Arc::new(HeadlessStoryShell::new(&self.url)))
    }
}

/// A session shell that logs story views coming and going.
pub struct HeadlessSessionShell {
    url: String,
}

impl HeadlessSessionShell {
    pub fn new(config: &SessionmgrConfig) -> Self {
        Self {
            url: config.session_section().session_shell_url,
        }
    }
}

#[async_trait]
impl SessionShell for HeadlessSessionShell {
    fn attach_view(&self, story_id: &str, view: ViewHolderToken) {
        info!(shell = %self.url, story_id = %story_id, view = %view, "Story view attached");
    }

    async fn detach_view(&self, story_id: &str) {
        info!(shell = %self.url, story_id = %story_id, "Story view detached");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves intents against the `[[modules]]` catalog.
pub struct CatalogModuleResolver {
    config: Arc<SessionmgrConfig>,
}

impl CatalogModuleResolver {
    pub fn new(config: Arc<SessionmgrConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModuleResolver for CatalogModuleResolver {
    async fn find_modules(&self, intent: &Intent) -> Vec<ModuleResolverResult> {
        let Some(action) = intent.action.as_deref() else {
            return Vec::new();
        };
        self.config
            .modules_for_action(action)
            .map(|entry| ModuleResolverResult {
                module_url: entry.handler.clone(),
                manifest: Some(entry.manifest()),
            })
            .collect()
    }
}

/// Reads manifests out of the `[[modules]]` catalog.
pub struct CatalogFacetReader {
    config: Arc<SessionmgrConfig>,
}

impl CatalogFacetReader {
    pub fn new(config: Arc<SessionmgrConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModuleFacetReader for CatalogFacetReader {
    async fn get_module_manifest(&self, module_url: &str) -> Option<ModuleManifest> {
        self.config.find_module(module_url).map(|entry| entry.manifest())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module processes
// ─────────────────────────────────────────────────────────────────────────────

/// Starts catalog modules as child processes.
pub struct ProcessModuleLauncher {
    config: Arc<SessionmgrConfig>,
}

impl ProcessModuleLauncher {
    pub fn new(config: Arc<SessionmgrConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModuleLauncher for ProcessModuleLauncher {
    async fn launch(
        &self,
        config: ModuleLaunchConfig,
        _context: Arc<ModuleContext>,
    ) -> Result<Box<dyn ModuleInstance>> {
        let module_path = encode_module_path(&config.module_path);
        let entry = self.config.find_module(&config.module_url);
        let Some(executable) = entry.and_then(|e| e.executable.clone()) else {
            debug!(
                story_id = %config.story_id,
                module_path = %module_path,
                module_url = %config.module_url,
                "No executable configured, running module in-process"
            );
            return Ok(Box::new(InProcessModule {
                module_path,
            }));
        };

        let args = entry.map(|e| e.args.clone()).unwrap_or_default();
        let mut child = Command::new(&executable)
            .args(&args)
            .env("SESSIONMGR_STORY_ID", &config.story_id)
            .env("SESSIONMGR_MODULE_PATH", &module_path)
            .env("SESSIONMGR_ENVIRONMENT", &config.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StoryError::ModuleLaunch {
                module_url: config.module_url.clone(),
                reason: format!("{}: {}", executable.display(), e),
            })?;

        info!(
            story_id = %config.story_id,
            module_path = %module_path,
            pid = child.id().unwrap_or_default(),
            "Module process started"
        );

        let stdin = child.stdin.take();
        Ok(Box::new(ProcessModule {
            module_url: config.module_url,
            module_path,
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
        }))
    }
}

/// A module running as a child process.
struct ProcessModule {
    module_url: String,
    module_path: String,
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
}

impl ProcessModule {
    fn teardown_error(&self, reason: impl Into<String>) -> StoryError {
        StoryError::ModuleTeardown {
            module_url: self.module_url.clone(),
            reason: reason.into(),
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

#[async_trait]
impl ModuleInstance for ProcessModule {
    fn view_token(&self) -> Option<ViewHolderToken> {
        None
    }

    async fn handle_intent(&self, intent: Intent) {
        let line = match serde_json::to_string(&intent) {
            Ok(line) => line,
            Err(e) => {
                warn!(module_path = %self.module_path, error = %e, "Failed to encode intent");
                return;
            }
        };

        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            debug!(module_path = %self.module_path, "Module stdin closed, dropping intent");
            return;
        };
        if let Err(e) = write_line(pipe, &line).await {
            warn!(module_path = %self.module_path, error = %e, "Failed to deliver intent");
            stdin.take();
        }
    }

    async fn teardown(&self, timeout: Duration) -> Result<()> {
        // EOF on stdin asks the module to exit.
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(module_path = %self.module_path, "Module process exited");
                Ok(())
            }
            Ok(Ok(status)) => Err(self.teardown_error(format!("exited with {status}"))),
            Ok(Err(e)) => Err(self.teardown_error(e.to_string())),
            Err(_) => {
                warn!(
                    module_path = %self.module_path,
                    timeout_ms = timeout.as_millis() as u64,
                    "Module process did not exit in time, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(module_path = %self.module_path, error = %e, "Failed to kill module process");
                }
                Err(self.teardown_error("did not exit before the teardown timeout"))
            }
        }
    }
}

/// A catalog module without an executable. It only logs its intents.
struct InProcessModule {
    module_path: String,
}

#[async_trait]
impl ModuleInstance for InProcessModule {
    fn view_token(&self) -> Option<ViewHolderToken> {
        None
    }

    async fn handle_intent(&self, intent: Intent) {
        info!(
            module_path = %self.module_path,
            action = intent.action.as_deref().unwrap_or(""),
            handler = intent.handler.as_deref().unwrap_or(""),
            "Intent delivered"
        );
    }

    async fn teardown(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Focus
// ─────────────────────────────────────────────────────────────────────────────

/// Grants every focus request immediately.
#[derive(Default)]
pub struct HeadlessFocusProvider {
    watchers: Mutex<Vec<Arc<dyn FocusWatcher>>>,
    focused: Mutex<Option<String>>,
}

impl HeadlessFocusProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<String> {
        self.focused.lock().clone()
    }
}

impl FocusProvider for HeadlessFocusProvider {
    fn watch(&self, watcher: Arc<dyn FocusWatcher>) {
        self.watchers.lock().push(watcher);
    }

    fn request(&self, story_id: Option<&str>) {
        *self.focused.lock() = story_id.map(str::to_string);
        info!(story_id = story_id.unwrap_or("<none>"), "Focus changed");

        let info = FocusInfo {
            focused_story_id: story_id.map(str::to_string),
            last_focus_change_timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let watchers = self.watchers.lock().clone();
        for watcher in watchers {
            watcher.on_focus_change(info.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Arc<SessionmgrConfig> {
        let config = SessionmgrConfig::from_toml(
            r#"
[[modules]]
handler = "notes"
action = "edit"

[[modules]]
handler = "viewer"
action = "view"
composition_pattern = "ticker"
"#,
        )
        .unwrap();
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_resolver_matches_action() {
        let resolver = CatalogModuleResolver::new(catalog());

        let results = resolver.find_modules(&Intent::with_action("view")).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].module_url, "viewer");

        assert!(resolver.find_modules(&Intent::with_action("delete")).await.is_empty());
        assert!(resolver.find_modules(&Intent::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_facet_reader_reports_catalog_manifest() {
        let reader = CatalogFacetReader::new(catalog());
        let manifest = reader.get_module_manifest("viewer").await.unwrap();
        assert_eq!(manifest.composition_pattern.as_deref(), Some("ticker"));
        assert!(reader.get_module_manifest("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_story_shell_snapshot_lists_surfaces() {
        let shell = HeadlessStoryShell::new("story_shell");
        shell.initialize("s1");
        shell.add_surface(
            ViewConnection {
                surface_id: "root".to_string(),
                view_holder_token: ViewHolderToken::generate(),
            },
            SurfaceInfo {
                parent_id: String::new(),
                surface_relation: None,
                module_manifest: None,
                module_source: sessionmgr_types::ModuleSource::External,
            },
        );

        let snapshot = shell.take_snapshot().await.unwrap();
        let surfaces: Vec<(String, String)> = serde_json::from_slice(&snapshot).unwrap();
        assert_eq!(surfaces, vec![("root".to_string(), String::new())]);
    }

    #[test]
    fn test_focus_provider_tracks_request() {
        let focus = HeadlessFocusProvider::new();
        focus.request(Some("s1"));
        assert_eq!(focus.focused().as_deref(), Some("s1"));
        focus.request(None);
        assert!(focus.focused().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_module_receives_intents_and_exits_on_eof() {
        let module = ProcessModule {
            module_url: "cat".to_string(),
            module_path: "root".to_string(),
            child: tokio::sync::Mutex::new(
                Command::new("cat")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .spawn()
                    .unwrap(),
            ),
            stdin: tokio::sync::Mutex::new(None),
        };
        let stdin = module.child.lock().await.stdin.take();
        *module.stdin.lock().await = stdin;

        module.handle_intent(Intent::with_action("view")).await;
        module.teardown(Duration::from_secs(5)).await.unwrap();

        // Once stdin is gone, intents are dropped quietly.
        module.handle_intent(Intent::with_action("view")).await;
    }
}
