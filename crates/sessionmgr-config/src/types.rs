//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [story]                  # story runtime timeouts and shell preloading
//! [session]                # session shell and test mode
//! [[modules]]              # static module catalog
//! [logging]                # log filter and file location
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sessionmgr_types::{
    ConfigProvider, HasStoryConfig, IntentFilter, ModuleManifest, StoryConfigProvider,
    config_defaults,
};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Maps to the full TOML config file. All sections are optional so that
/// partial configs (e.g., project-local overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionmgrConfig {
    /// Story runtime configuration.
    pub story: Option<StoryConfig>,

    /// Session configuration.
    pub session: Option<SessionConfig>,

    /// Module catalog.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleEntry>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl SessionmgrConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale. Catalog entries are matched by
    /// handler: an entry in `other` replaces the one with the same handler,
    /// new handlers are appended.
    pub fn merge(&mut self, other: SessionmgrConfig) {
        if other.story.is_some() {
            self.story = other.story;
        }

        if other.session.is_some() {
            self.session = other.session;
        }

        for entry in other.modules {
            match self.modules.iter_mut().find(|m| m.handler == entry.handler) {
                Some(existing) => *existing = entry,
                None => self.modules.push(entry),
            }
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Check constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.modules {
            if entry.handler.is_empty() {
                return Err(ConfigError::MissingField {
                    field: "handler".to_string(),
                    context: "[[modules]]".to_string(),
                });
            }
            if !seen.insert(entry.handler.as_str()) {
                return Err(ConfigError::DuplicateModule(entry.handler.clone()));
            }
        }
        Ok(())
    }

    /// The `[story]` section, or defaults.
    pub fn story_section(&self) -> StoryConfig {
        self.story.clone().unwrap_or_default()
    }

    /// The `[session]` section, or defaults.
    pub fn session_section(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// The `[logging]` section, or defaults.
    pub fn logging_section(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Resolve the story runtime settings, with test mode applied.
    pub fn story_config(&self) -> StoryConfigProvider {
        let story = self.story_section();
        StoryConfigProvider {
            basic_timeout: story.basic_timeout(),
            snapshot_timeout: story.snapshot_timeout(),
            shell_preload_delay: story.shell_preload_delay(),
            story_shell_preload_enabled: story.enable_story_shell_preload
                && !self.session_section().test_mode,
        }
    }

    /// Look up a catalog entry by handler url.
    pub fn find_module(&self, handler: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.handler == handler)
    }

    /// Catalog entries whose filters accept `action`, in file order.
    pub fn modules_for_action<'a>(
        &'a self,
        action: &'a str,
    ) -> impl Iterator<Item = &'a ModuleEntry> + 'a {
        self.modules.iter().filter(move |m| m.handles(action))
    }
}

impl ConfigProvider for SessionmgrConfig {}

impl HasStoryConfig for SessionmgrConfig {
    fn basic_timeout(&self) -> Duration {
        self.story_config().basic_timeout
    }

    fn snapshot_timeout(&self) -> Duration {
        self.story_config().snapshot_timeout
    }

    fn shell_preload_delay(&self) -> Duration {
        self.story_config().shell_preload_delay
    }

    fn story_shell_preload_enabled(&self) -> bool {
        self.story_config().story_shell_preload_enabled
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Story Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Story runtime configuration.
///
/// ```toml
/// [story]
/// basic_timeout_ms = 3000
/// snapshot_timeout_ms = 1000
/// shell_preload_delay_ms = 5000
/// enable_story_shell_preload = true
/// story_shell_url = "story_shell"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    /// Bound on view detach and on process teardown, in milliseconds.
    pub basic_timeout_ms: u64,
    /// Bound on taking a story snapshot, in milliseconds.
    pub snapshot_timeout_ms: u64,
    /// Delay before the next story shell is preloaded, in milliseconds.
    pub shell_preload_delay_ms: u64,
    /// Whether story shells are preloaded.
    pub enable_story_shell_preload: bool,
    /// Url of the story shell to launch.
    pub story_shell_url: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            basic_timeout_ms: config_defaults::BASIC_TIMEOUT_MS,
            snapshot_timeout_ms: config_defaults::SNAPSHOT_TIMEOUT_MS,
            shell_preload_delay_ms: config_defaults::SHELL_PRELOAD_DELAY_MS,
            enable_story_shell_preload: true,
            story_shell_url: config_defaults::STORY_SHELL_URL.to_string(),
        }
    }
}

impl StoryConfig {
    pub fn basic_timeout(&self) -> Duration {
        Duration::from_millis(self.basic_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn shell_preload_delay(&self) -> Duration {
        Duration::from_millis(self.shell_preload_delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Url of the session shell the story views attach to.
    pub session_shell_url: String,
    /// Test sessions never preload story shells.
    pub test_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_shell_url: config_defaults::SESSION_SHELL_URL.to_string(),
            test_mode: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of the static module catalog.
///
/// ```toml
/// [[modules]]
/// handler = "notes"
/// action = "com.example.edit"
/// executable = "/usr/local/bin/notes-module"
/// args = ["--headless"]
/// composition_pattern = "ticker"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleEntry {
    /// Module url that intents name as their handler.
    pub handler: String,
    /// Intent action this module resolves.
    pub action: Option<String>,
    /// Program spawned for each module instance.
    pub executable: Option<PathBuf>,
    /// Arguments passed to `executable`.
    pub args: Vec<String>,
    /// Human-readable suggestion text.
    pub suggestion_headline: Option<String>,
    /// Composition hint for the story shell.
    pub composition_pattern: Option<String>,
}

impl ModuleEntry {
    /// Whether this module declares it handles `action`.
    pub fn handles(&self, action: &str) -> bool {
        self.action.as_deref() == Some(action)
    }

    /// The manifest a facet reader reports for this module.
    pub fn manifest(&self) -> ModuleManifest {
        ModuleManifest {
            binary: self
                .executable
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| self.handler.clone()),
            suggestion_headline: self.suggestion_headline.clone(),
            intent_filters: self
                .action
                .iter()
                .map(|action| IntentFilter {
                    action: action.clone(),
                })
                .collect(),
            composition_pattern: self.composition_pattern.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
    /// Directory for daily JSON log files. Defaults to the platform data dir.
    pub log_dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = SessionmgrConfig::new();
        assert!(config.story.is_none());
        assert!(config.session.is_none());
        assert!(config.modules.is_empty());
        assert_eq!(config.story_section(), StoryConfig::default());
    }

    #[test]
    fn test_parse_story_section() {
        let toml = r#"
[story]
basic_timeout_ms = 500
snapshot_timeout_ms = 250
enable_story_shell_preload = false
"#;
        let config = SessionmgrConfig::from_toml(toml).unwrap();
        let story = config.story_config();
        assert_eq!(story.basic_timeout, Duration::from_millis(500));
        assert_eq!(story.snapshot_timeout, Duration::from_millis(250));
        assert_eq!(story.shell_preload_delay, Duration::from_secs(5));
        assert!(!story.story_shell_preload_enabled);
    }

    #[test]
    fn test_test_mode_disables_preload() {
        let toml = r#"
[session]
test_mode = true
"#;
        let config = SessionmgrConfig::from_toml(toml).unwrap();
        assert!(config.story_section().enable_story_shell_preload);
        assert!(!config.story_shell_preload_enabled());
    }

    #[test]
    fn test_has_story_config_defaults() {
        let config = SessionmgrConfig::new();
        assert_eq!(config.basic_timeout(), Duration::from_secs(3));
        assert_eq!(config.snapshot_timeout(), Duration::from_secs(1));
        assert!(config.story_shell_preload_enabled());
    }

    #[test]
    fn test_parse_module_catalog() {
        let toml = r#"
[[modules]]
handler = "notes"
action = "edit"
executable = "/bin/cat"
args = ["-u"]

[[modules]]
handler = "viewer"
action = "view"
composition_pattern = "ticker"
"#;
        let config = SessionmgrConfig::from_toml(toml).unwrap();
        assert_eq!(config.modules.len(), 2);

        let notes = config.find_module("notes").unwrap();
        assert_eq!(notes.args, vec!["-u".to_string()]);
        assert_eq!(notes.manifest().binary, "/bin/cat");

        let viewer = config.modules_for_action("view").next().unwrap();
        assert_eq!(viewer.handler, "viewer");
        let manifest = viewer.manifest();
        assert_eq!(manifest.binary, "viewer");
        assert_eq!(manifest.composition_pattern.as_deref(), Some("ticker"));
        assert_eq!(manifest.intent_filters[0].action, "view");

        assert_eq!(config.modules_for_action("delete").count(), 0);
    }

    #[test]
    fn test_module_without_handler_rejected() {
        let toml = r#"
[[modules]]
action = "edit"
"#;
        let err = SessionmgrConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let toml = r#"
[[modules]]
handler = "notes"

[[modules]]
handler = "notes"
"#;
        let err = SessionmgrConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateModule(h) if h == "notes"));
    }

    #[test]
    fn test_merge_overrides_sections_and_modules() {
        let mut base = SessionmgrConfig::from_toml(
            r#"
[story]
basic_timeout_ms = 100

[logging]
filter = "info"

[[modules]]
handler = "notes"
action = "edit"

[[modules]]
handler = "viewer"
action = "view"
"#,
        )
        .unwrap();
        let overlay = SessionmgrConfig::from_toml(
            r#"
[story]
basic_timeout_ms = 200

[[modules]]
handler = "notes"
action = "write"

[[modules]]
handler = "mail"
"#,
        )
        .unwrap();

        base.merge(overlay);

        assert_eq!(base.story_section().basic_timeout_ms, 200);
        assert_eq!(base.logging_section().filter.as_deref(), Some("info"));
        let handlers: Vec<_> = base.modules.iter().map(|m| m.handler.as_str()).collect();
        assert_eq!(handlers, vec!["notes", "viewer", "mail"]);
        assert!(base.find_module("notes").unwrap().handles("write"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = SessionmgrConfig::new();
        config.story = Some(StoryConfig {
            basic_timeout_ms: 42,
            ..StoryConfig::default()
        });
        config.modules.push(ModuleEntry {
            handler: "notes".to_string(),
            action: Some("edit".to_string()),
            ..ModuleEntry::default()
        });

        let text = config.to_toml().unwrap();
        let parsed = SessionmgrConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
