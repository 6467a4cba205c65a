//! Client-facing story control: batch commands against stories by name.

use std::future::Future;
use std::sync::Arc;

use sessionmgr_ops::{OperationHandle, OperationQueue};
use sessionmgr_storage::SessionStorage;
use sessionmgr_types::{
    ExecuteResult, ExecuteStatus, StoryCommand, StoryInfoExtraEntry, StoryOptions,
};
use tracing::debug;

use crate::interfaces::StoryCommandExecutor;

/// Entry point for clients that drive stories by name.
pub struct PuppetMasterImpl {
    session_storage: Arc<SessionStorage>,
    executor: Arc<dyn StoryCommandExecutor>,
    operations: Arc<OperationQueue>,
}

impl PuppetMasterImpl {
    pub fn new(session_storage: Arc<SessionStorage>, executor: Arc<dyn StoryCommandExecutor>) -> Self {
        Self {
            session_storage,
            executor,
            operations: Arc::new(OperationQueue::new("puppet_master")),
        }
    }

    /// A handle for batching commands against the story named `story_name`.
    /// The story is created on the first `execute` if it does not exist.
    pub fn control_story(&self, story_name: impl Into<String>) -> StoryPuppetMasterImpl {
        StoryPuppetMasterImpl {
            story_name: story_name.into(),
            session_storage: self.session_storage.clone(),
            executor: self.executor.clone(),
            operations: self.operations.clone(),
            enqueued_commands: Vec::new(),
            create_options: StoryOptions::default(),
            story_info_extra: Vec::new(),
        }
    }

    pub fn delete_story(&self, story_name: &str) -> OperationHandle<()> {
        self.session_storage.delete_story(story_name)
    }

    /// Ids of every story in the session.
    pub fn get_stories(&self) -> impl Future<Output = Vec<String>> + Send + 'static {
        let all = self.session_storage.get_all_story_data();
        async move {
            all.await
                .unwrap_or_default()
                .into_iter()
                .map(|data| data.story_info.id)
                .collect()
        }
    }
}

/// Commands staged against one story.
///
/// Executions from every handle of the same puppet master are serialized,
/// so two clients creating the same story never race.
pub struct StoryPuppetMasterImpl {
    story_name: String,
    session_storage: Arc<SessionStorage>,
    executor: Arc<dyn StoryCommandExecutor>,
    operations: Arc<OperationQueue>,
    enqueued_commands: Vec<StoryCommand>,
    create_options: StoryOptions,
    story_info_extra: Vec<StoryInfoExtraEntry>,
}

impl StoryPuppetMasterImpl {
    pub fn story_name(&self) -> &str {
        &self.story_name
    }

    pub fn enqueue(&mut self, commands: impl IntoIterator<Item = StoryCommand>) {
        self.enqueued_commands.extend(commands);
    }

    /// Options applied if `execute` has to create the story.
    pub fn set_create_options(&mut self, options: StoryOptions) {
        self.create_options = options;
    }

    /// Extra info entries applied if `execute` has to create the story.
    pub fn set_story_info_extra(&mut self, extra: Vec<StoryInfoExtraEntry>) {
        self.story_info_extra = extra;
    }

    /// Run the staged commands, creating the story first if needed. The
    /// staged batch is cleared whether or not it succeeds.
    pub fn execute(&mut self) -> OperationHandle<ExecuteResult> {
        let commands = std::mem::take(&mut self.enqueued_commands);
        let story_name = self.story_name.clone();
        let session_storage = self.session_storage.clone();
        let executor = self.executor.clone();
        let options = self.create_options.clone();
        let extra = self.story_info_extra.clone();

        self.operations.add("ExecuteOperation", async move {
            let existing = session_storage
                .get_story_data(&story_name)
                .await
                .ok()
                .flatten();
            let story_id = match existing {
                Some(data) => data.story_info.id,
                None => {
                    let created = session_storage
                        .create_story(Some(story_name.clone()), extra, options)
                        .await;
                    match created {
                        Ok((story_id, _)) => story_id,
                        Err(e) => {
                            return ExecuteResult::error(
                                ExecuteStatus::InternalError,
                                story_name,
                                e.to_string(),
                            );
                        }
                    }
                }
            };
            debug!(story_id = %story_id, count = commands.len(), "Executing story commands");
            executor.execute_commands(&story_id, commands).await
        })
    }
}

impl std::fmt::Debug for StoryPuppetMasterImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryPuppetMasterImpl")
            .field("story_name", &self.story_name)
            .field("enqueued_commands", &self.enqueued_commands.len())
            .finish()
    }
}
