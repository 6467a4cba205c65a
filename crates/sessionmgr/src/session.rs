//! Wiring of a headless session.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;
use sessionmgr_config::SessionmgrConfig;
use sessionmgr_storage::{MemoryLedger, SessionStorage};
use sessionmgr_story::{
    PuppetMasterImpl, SessionServices, SessionStoryCommandExecutor, StoryControllerImpl,
    StoryProviderImpl,
};
use sessionmgr_types::{ExecuteResult, PageId, StoryState, encode_module_path};
use tracing::info;

use crate::headless::{
    CatalogFacetReader, CatalogModuleResolver, HeadlessFocusProvider, HeadlessSessionShell,
    HeadlessStoryShellFactory, ProcessModuleLauncher,
};
use crate::script::Batch;

/// Outcome of one script batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub story: String,
    pub result: ExecuteResult,
    /// Set when the batch asked for the story to be started.
    pub state: Option<StoryState>,
    /// Module paths running after the start, encoded.
    pub running_modules: Vec<String>,
}

/// One row of `sessionmgr stories`.
#[derive(Debug, Clone, Serialize)]
pub struct StorySummary {
    pub id: String,
    pub state: StoryState,
    pub last_focus_time: i64,
    pub modules: usize,
}

/// A session over an in-memory ledger with headless collaborators.
pub struct HeadlessSession {
    provider: Arc<StoryProviderImpl>,
    puppet_master: PuppetMasterImpl,
    session_storage: Arc<SessionStorage>,
}

impl HeadlessSession {
    pub fn new(config: SessionmgrConfig) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let session_storage = Arc::new(SessionStorage::new(ledger, &PageId::generate()));
        let catalog = Arc::new(config);

        let services = SessionServices::new(
            catalog.as_ref(),
            session_storage.clone(),
            Arc::new(HeadlessStoryShellFactory::new(&catalog)),
            Arc::new(ProcessModuleLauncher::new(catalog.clone())),
            Arc::new(CatalogModuleResolver::new(catalog.clone())),
            Arc::new(CatalogFacetReader::new(catalog.clone())),
        )
        .with_session_shell(Arc::new(HeadlessSessionShell::new(&catalog)))
        .with_focus_provider(Arc::new(HeadlessFocusProvider::new()));

        let provider = StoryProviderImpl::new(services);
        let executor = Arc::new(SessionStoryCommandExecutor::new(provider.clone()));
        let puppet_master = PuppetMasterImpl::new(session_storage.clone(), executor);

        Self {
            provider,
            puppet_master,
            session_storage,
        }
    }

    /// Apply one batch and optionally start its story.
    pub async fn run_batch(&self, batch: Batch) -> Result<BatchOutcome> {
        let mut story = self.puppet_master.control_story(&batch.story);
        story.set_create_options(batch.options);
        story.set_story_info_extra(batch.extra);
        story.enqueue(batch.commands);
        let result = story
            .execute()
            .await
            .context("puppet master shut down during execute")?;

        let mut outcome = BatchOutcome {
            story: batch.story,
            result,
            state: None,
            running_modules: Vec::new(),
        };
        if !batch.start || !outcome.result.is_ok() {
            return Ok(outcome);
        }

        let controller = self
            .provider
            .get_controller(&outcome.story)
            .await
            .with_context(|| format!("story {} vanished before start", outcome.story))?;
        controller.request_start().await?;
        self.settle(&controller).await?;

        outcome.state = Some(controller.state());
        outcome.running_modules = controller
            .get_active_modules()
            .await?
            .iter()
            .map(|module| encode_module_path(&module.module_path))
            .collect();
        info!(
            story_id = %outcome.story,
            modules = outcome.running_modules.len(),
            "Story started"
        );
        Ok(outcome)
    }

    /// Every listed story with its runtime state.
    pub async fn stories(&self) -> Result<Vec<StorySummary>> {
        let running = self.provider.running_stories();
        let mut summaries = Vec::new();
        for info in self.provider.previous_stories().await? {
            let modules = match self.provider.get_controller(&info.id).await {
                Some(controller) => controller.get_modules().await?.len(),
                None => 0,
            };
            let state = if running.contains(&info.id) {
                StoryState::Running
            } else {
                StoryState::Stopped
            };
            summaries.push(StorySummary {
                id: info.id,
                state,
                last_focus_time: info.last_focus_time,
                modules,
            });
        }
        Ok(summaries)
    }

    /// Stop every story and the preloaded story shell.
    pub async fn shutdown(&self) -> Result<()> {
        self.provider.stop_all_stories().await?;
        self.provider.stop_story_shell().await?;
        self.session_storage.sync().await?;
        info!("Session shut down");
        Ok(())
    }

    /// Wait until module launches triggered by the start have run.
    async fn settle(&self, controller: &StoryControllerImpl) -> Result<()> {
        for _ in 0..4 {
            tokio::task::yield_now().await;
            controller.story_storage().sync().await?;
            controller.sync().await?;
        }
        Ok(())
    }
}
