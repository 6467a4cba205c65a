//! Session-wide collaborators shared by every story.

use std::sync::Arc;

use sessionmgr_storage::SessionStorage;
use sessionmgr_types::{HasStoryConfig, StoryConfigProvider};

use crate::interfaces::{
    FocusProvider, ModuleFacetReader, ModuleLauncher, ModuleResolver, SessionShell,
    SnapshotLoader, StoryShellFactory,
};

/// Everything a story controller reaches outside its own story.
pub struct SessionServices {
    pub config: StoryConfigProvider,
    pub session_storage: Arc<SessionStorage>,
    pub story_shell_factory: Arc<dyn StoryShellFactory>,
    pub module_launcher: Arc<dyn ModuleLauncher>,
    pub module_resolver: Arc<dyn ModuleResolver>,
    pub module_facet_reader: Arc<dyn ModuleFacetReader>,
    pub session_shell: Option<Arc<dyn SessionShell>>,
    pub focus_provider: Option<Arc<dyn FocusProvider>>,
    pub snapshot_loader: Option<Arc<dyn SnapshotLoader>>,
}

impl SessionServices {
    pub fn new<C: HasStoryConfig>(
        config: &C,
        session_storage: Arc<SessionStorage>,
        story_shell_factory: Arc<dyn StoryShellFactory>,
        module_launcher: Arc<dyn ModuleLauncher>,
        module_resolver: Arc<dyn ModuleResolver>,
        module_facet_reader: Arc<dyn ModuleFacetReader>,
    ) -> Self {
        Self {
            config: StoryConfigProvider {
                basic_timeout: config.basic_timeout(),
                snapshot_timeout: config.snapshot_timeout(),
                shell_preload_delay: config.shell_preload_delay(),
                story_shell_preload_enabled: config.story_shell_preload_enabled(),
            },
            session_storage,
            story_shell_factory,
            module_launcher,
            module_resolver,
            module_facet_reader,
            session_shell: None,
            focus_provider: None,
            snapshot_loader: None,
        }
    }

    pub fn with_session_shell(mut self, session_shell: Arc<dyn SessionShell>) -> Self {
        self.session_shell = Some(session_shell);
        self
    }

    pub fn with_focus_provider(mut self, focus_provider: Arc<dyn FocusProvider>) -> Self {
        self.focus_provider = Some(focus_provider);
        self
    }

    pub fn with_snapshot_loader(mut self, snapshot_loader: Arc<dyn SnapshotLoader>) -> Self {
        self.snapshot_loader = Some(snapshot_loader);
        self
    }
}
