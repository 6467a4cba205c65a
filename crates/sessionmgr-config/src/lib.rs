//! Configuration system for sessionmgr.
//!
//! Provides TOML-based configuration with:
//! - Story runtime timeouts and shell preloading (`[story]`)
//! - Session shell selection and test mode (`[session]`)
//! - A static module catalog (`[[modules]]`) for headless sessions
//! - Log filter and file location (`[logging]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
