//! Shared types for the sessionmgr story runtime.

pub mod command;
pub mod config;
pub mod module;
pub mod path;
pub mod story;
pub mod surface;

pub use command::{
    AddMod, ExecuteResult, ExecuteStatus, FocusMod, RemoveMod, SetFocusState,
    SetKindOfProtoStoryOption, SetLinkValue, StoryCommand,
};
pub use config::{
    ConfigProvider, HasStoryConfig, StoryConfigProvider, defaults as config_defaults,
};
pub use module::{
    Intent, IntentFilter, IntentParameter, IntentParameterData, LinkPath, ModuleData,
    ModuleManifest, ModuleParameterMapEntry, ModuleSource, ModuleState, SurfaceArrangement,
    SurfaceDependency, SurfaceRelation,
};
pub use path::{decode_module_path, encode_module_path, parent_module_path};
pub use story::{
    FocusInfo, OngoingActivityType, PageId, StoryData, StoryInfo, StoryInfoExtraEntry,
    StoryOptions, StoryState, StoryVisibilityState,
};
pub use surface::{SurfaceInfo, ViewConnection, ViewHolderToken};
