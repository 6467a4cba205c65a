//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use sessionmgr_storage::{MemoryLedger, SessionStorage};
use sessionmgr_story::testing::{
    MockFacetReader, MockFocusProvider, MockModuleLauncher, MockModuleResolver,
    MockSessionShell, MockSnapshotLoader, MockStoryShellFactory,
};
use sessionmgr_story::{
    PuppetMasterImpl, SessionServices, SessionStoryCommandExecutor, StoryControllerImpl,
    StoryProviderImpl,
};
use sessionmgr_types::{
    AddMod, ExecuteResult, Intent, PageId, RemoveMod, StoryCommand, StoryConfigProvider,
};

/// A session wired to mock collaborators over an in-memory ledger.
pub struct TestSession {
    pub ledger: Arc<MemoryLedger>,
    pub session_storage: Arc<SessionStorage>,
    pub shells: Arc<MockStoryShellFactory>,
    pub session_shell: Arc<MockSessionShell>,
    pub launcher: Arc<MockModuleLauncher>,
    pub focus: Arc<MockFocusProvider>,
    pub snapshot_loader: Arc<MockSnapshotLoader>,
    pub provider: Arc<StoryProviderImpl>,
    pub puppet_master: PuppetMasterImpl,
}

/// Collaborators a test wants to customize.
pub struct TestSessionBuilder {
    config: StoryConfigProvider,
    shells: MockStoryShellFactory,
    session_shell: MockSessionShell,
    resolver: MockModuleResolver,
    ledger: Option<Arc<MemoryLedger>>,
}

impl TestSessionBuilder {
    pub fn config(mut self, config: StoryConfigProvider) -> Self {
        self.config = config;
        self
    }

    pub fn shells(mut self, shells: MockStoryShellFactory) -> Self {
        self.shells = shells;
        self
    }

    pub fn session_shell(mut self, session_shell: MockSessionShell) -> Self {
        self.session_shell = session_shell;
        self
    }

    pub fn resolver(mut self, resolver: MockModuleResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Share the ledger of another session, as a second device would.
    pub fn ledger(mut self, ledger: Arc<MemoryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> TestSession {
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(MemoryLedger::new()));
        let session_storage = Arc::new(SessionStorage::new(ledger.clone(), &PageId::new("session")));
        let shells = Arc::new(self.shells);
        let session_shell = Arc::new(self.session_shell);
        let launcher = Arc::new(MockModuleLauncher::new());
        let focus = Arc::new(MockFocusProvider::new());
        let snapshot_loader = Arc::new(MockSnapshotLoader::new());

        let services = SessionServices::new(
            &self.config,
            session_storage.clone(),
            shells.clone(),
            launcher.clone(),
            Arc::new(self.resolver),
            Arc::new(MockFacetReader),
        )
        .with_session_shell(session_shell.clone())
        .with_focus_provider(focus.clone())
        .with_snapshot_loader(snapshot_loader.clone());

        let provider = StoryProviderImpl::new(services);
        let executor = Arc::new(SessionStoryCommandExecutor::new(provider.clone()));
        let puppet_master = PuppetMasterImpl::new(session_storage.clone(), executor);

        TestSession {
            ledger,
            session_storage,
            shells,
            session_shell,
            launcher,
            focus,
            snapshot_loader,
            provider,
            puppet_master,
        }
    }
}

impl TestSession {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestSessionBuilder {
        TestSessionBuilder {
            config: StoryConfigProvider::for_tests(),
            shells: MockStoryShellFactory::new(),
            session_shell: MockSessionShell::new(),
            resolver: MockModuleResolver::new(),
            ledger: None,
        }
    }

    /// Run a command batch against `story`, creating it if needed.
    pub async fn execute(&self, story: &str, commands: Vec<StoryCommand>) -> ExecuteResult {
        let mut story_puppet_master = self.puppet_master.control_story(story);
        story_puppet_master.enqueue(commands);
        story_puppet_master
            .execute()
            .await
            .expect("puppet master queue dropped")
    }

    pub async fn add_mod(&self, story: &str, path: &[&str], module_url: &str) -> ExecuteResult {
        self.execute(story, vec![add_mod(path, module_url)]).await
    }

    pub async fn remove_mod(&self, story: &str, path: &[&str]) -> ExecuteResult {
        self.execute(
            story,
            vec![StoryCommand::RemoveMod(RemoveMod {
                mod_name: segments(path),
            })],
        )
        .await
    }

    pub async fn controller(&self, story: &str) -> Arc<StoryControllerImpl> {
        self.provider
            .get_controller(story)
            .await
            .expect("story exists")
    }

    /// Create `story` with the given root modules and start it.
    pub async fn start_story(&self, story: &str, roots: &[&str]) -> Arc<StoryControllerImpl> {
        let commands = roots
            .iter()
            .map(|root| add_mod(&[root], &format!("test:{root}")))
            .collect();
        let result = self.execute(story, commands).await;
        assert!(result.is_ok(), "{result:?}");

        let controller = self.controller(story).await;
        controller.request_start().await.expect("controller queue dropped");
        settle(&controller).await;
        controller
    }
}

pub fn segments(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| s.to_string()).collect()
}

pub fn add_mod(path: &[&str], module_url: &str) -> StoryCommand {
    StoryCommand::AddMod(AddMod {
        mod_name: segments(path),
        intent: Intent::with_handler(module_url),
        surface_relation: None,
        surface_parent_mod_name: Vec::new(),
    })
}

/// Let storage notifications reach the controller and drain its queue.
pub async fn settle(controller: &StoryControllerImpl) {
    for _ in 0..8 {
        tokio::task::yield_now().await;
        let _ = controller.story_storage().sync().await;
        let _ = controller.sync().await;
    }
}
