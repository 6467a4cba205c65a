//! Story orchestration for sessionmgr.
//!
//! A session holds any number of stories. Each story is a tree of modules
//! composed by a story shell:
//!
//! - [`StoryProviderImpl`] keeps one runtime container (storage, controller,
//!   entity provider) per loaded story and fans out state changes.
//! - [`StoryControllerImpl`] starts and stops one story, launches its
//!   modules and hands their views to the story shell, parents first.
//! - [`PuppetMasterImpl`] lets clients batch [`StoryCommand`]s against
//!   stories by name.
//!
//! External processes (shells, modules, resolvers) are reached through the
//! traits in [`interfaces`].
//!
//! [`StoryCommand`]: sessionmgr_types::StoryCommand

mod controller;
pub mod entity;
pub mod error;
mod executor;
pub mod interfaces;
mod link;
mod module_context;
mod module_controller;
mod parameters;
mod provider;
mod puppet_master;
mod services;
pub mod watcher;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use controller::{StoryControllerImpl, should_restart_module_for_new_intent};
pub use entity::StoryEntityProvider;
pub use error::{Result, StoryError};
pub use executor::SessionStoryCommandExecutor;
pub use link::{Link, LinkWatcher};
pub use module_context::{EmbeddedModule, ModuleContext, OngoingActivity};
pub use module_controller::ModuleController;
pub use provider::{StoryProviderImpl, StoryRuntimeContainer};
pub use puppet_master::{PuppetMasterImpl, StoryPuppetMasterImpl};
pub use services::SessionServices;
