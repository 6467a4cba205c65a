//! Applies story command batches to the stories of a session.

use std::sync::Arc;

use async_trait::async_trait;
use sessionmgr_types::{
    AddMod, ExecuteResult, ExecuteStatus, LinkPath, ModuleData, ModuleSource, StoryCommand,
    StoryOptions, encode_module_path,
};
use tracing::{debug, warn};

use crate::interfaces::StoryCommandExecutor;
use crate::parameters::initialize_module_parameters;
use crate::provider::{StoryProviderImpl, StoryRuntimeContainer};

/// Executes commands through the story provider, so every write lands in
/// the same story storage the running controller watches.
pub struct SessionStoryCommandExecutor {
    provider: Arc<StoryProviderImpl>,
}

/// Outcome of one command: `Err` stops the batch.
type CommandResult = std::result::Result<(), (ExecuteStatus, String)>;

impl SessionStoryCommandExecutor {
    pub fn new(provider: Arc<StoryProviderImpl>) -> Self {
        Self { provider }
    }

    async fn execute_command(
        &self,
        story_id: &str,
        container: &StoryRuntimeContainer,
        command: StoryCommand,
    ) -> CommandResult {
        match command {
            StoryCommand::AddMod(add_mod) => self.add_mod(container, add_mod).await,
            StoryCommand::RemoveMod(remove) => {
                let existing = read_module(container, &remove.mod_name).await?;
                if existing.is_none() {
                    return Err(invalid_mod(&remove.mod_name));
                }
                container
                    .storage
                    .update_module_data(&remove.mod_name, |data| {
                        data.map(|mut data| {
                            data.module_deleted = true;
                            data
                        })
                    })
                    .await
                    .map_err(internal)
            }
            StoryCommand::SetLinkValue(set) => container
                .storage
                .set_link_value(&set.path, set.value)
                .await
                .map_err(internal),
            StoryCommand::FocusMod(focus) => {
                if read_module(container, &focus.mod_name).await?.is_none() {
                    return Err(invalid_mod(&focus.mod_name));
                }
                container
                    .controller
                    .focus_module(&focus.mod_name)
                    .await
                    .map_err(internal)
            }
            StoryCommand::SetFocusState(focus) => {
                match &self.provider.services().focus_provider {
                    Some(focus_provider) if focus.focused => focus_provider.request(Some(story_id)),
                    Some(focus_provider) => focus_provider.request(None),
                    None => debug!(story_id, "No focus provider; focus state unchanged"),
                }
                Ok(())
            }
            StoryCommand::SetKindOfProtoStoryOption(option) => self
                .provider
                .services()
                .session_storage
                .update_story_options(
                    story_id,
                    StoryOptions {
                        kind_of_proto_story: option.value,
                    },
                )
                .await
                .map_err(internal),
        }
    }

    async fn add_mod(&self, container: &StoryRuntimeContainer, add_mod: AddMod) -> CommandResult {
        if add_mod.mod_name.is_empty() || add_mod.mod_name.iter().any(String::is_empty) {
            return Err((ExecuteStatus::InvalidCommand, "mod_name must not be empty".to_string()));
        }
        let module_path = add_mod.module_path();

        let module_url = match &add_mod.intent.handler {
            Some(handler) => handler.clone(),
            None => {
                let candidates = self
                    .provider
                    .services()
                    .module_resolver
                    .find_modules(&add_mod.intent)
                    .await;
                match candidates.into_iter().next() {
                    Some(candidate) => candidate.module_url,
                    None => {
                        return Err((
                            ExecuteStatus::NoModulesFound,
                            format!(
                                "no module handles action {:?}",
                                add_mod.intent.action.as_deref().unwrap_or_default()
                            ),
                        ));
                    }
                }
            }
        };

        // Named links of a top-level command are scoped to the story.
        let parameter_map = initialize_module_parameters(
            &container.storage,
            &module_path,
            &add_mod.intent,
            |link_name| LinkPath::new(Vec::new(), link_name),
        )
        .await;

        let module_data = ModuleData {
            module_url,
            module_path,
            intent: Some(add_mod.intent),
            module_source: ModuleSource::External,
            surface_relation: add_mod.surface_relation,
            is_embedded: false,
            module_deleted: false,
            parameter_map,
        };
        container
            .storage
            .write_module_data(module_data)
            .await
            .map_err(internal)
    }
}

#[async_trait]
impl StoryCommandExecutor for SessionStoryCommandExecutor {
    async fn execute_commands(&self, story_id: &str, commands: Vec<StoryCommand>) -> ExecuteResult {
        if commands.is_empty() {
            return ExecuteResult::ok(story_id);
        }

        let container = match self.provider.load_story_runtime(story_id).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                return ExecuteResult::error(
                    ExecuteStatus::InvalidStoryId,
                    story_id,
                    format!("story {story_id} does not exist"),
                );
            }
            Err(e) => return ExecuteResult::error(ExecuteStatus::InternalError, story_id, e.to_string()),
        };

        for command in commands {
            let name = command.name();
            if let Err((status, message)) = self.execute_command(story_id, &container, command).await {
                warn!(story_id, command = name, ?status, %message, "Story command failed");
                return ExecuteResult::error(status, story_id, message);
            }
            debug!(story_id, command = name, "Story command applied");
        }
        ExecuteResult::ok(story_id)
    }
}

async fn read_module(
    container: &StoryRuntimeContainer,
    module_path: &[String],
) -> std::result::Result<Option<ModuleData>, (ExecuteStatus, String)> {
    container
        .storage
        .read_module_data(module_path)
        .await
        .map_err(internal)
}

fn invalid_mod(module_path: &[String]) -> (ExecuteStatus, String) {
    (
        ExecuteStatus::InvalidMod,
        format!("no module at {}", encode_module_path(module_path)),
    )
}

fn internal(e: impl std::fmt::Display) -> (ExecuteStatus, String) {
    (ExecuteStatus::InternalError, e.to_string())
}
