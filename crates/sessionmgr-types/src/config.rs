//! Configuration traits for decoupled config passing between crates.
//!
//! Runtime crates depend on these capabilities rather than on the full
//! configuration structure, so the story runtime can be driven by a TOML
//! file, a test fixture, or hand-built values alike.

use std::time::Duration;

/// Base trait for all configuration types.
///
/// Implementations should be cheaply cloneable and thread-safe.
pub trait ConfigProvider: Clone + Send + Sync + 'static {}

/// Story runtime configuration.
///
/// Timeouts bound every wait on an external collaborator during story
/// teardown and snapshotting.
pub trait HasStoryConfig: ConfigProvider {
    /// Bound on detaching a story view and on story shell teardown.
    fn basic_timeout(&self) -> Duration;

    /// Bound on taking a story snapshot.
    fn snapshot_timeout(&self) -> Duration;

    /// Delay before a story shell is preloaded for the next story.
    fn shell_preload_delay(&self) -> Duration;

    /// Whether story shells are preloaded at all.
    fn story_shell_preload_enabled(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Default values
// ─────────────────────────────────────────────────────────────────────────────

pub mod defaults {
    use std::time::Duration;

    pub const BASIC_TIMEOUT_MS: u64 = 3_000;
    pub const SNAPSHOT_TIMEOUT_MS: u64 = 1_000;
    pub const SHELL_PRELOAD_DELAY_MS: u64 = 5_000;
    pub const STORY_SHELL_URL: &str = "story_shell";
    pub const SESSION_SHELL_URL: &str = "session_shell";

    pub fn basic_timeout() -> Duration {
        Duration::from_millis(BASIC_TIMEOUT_MS)
    }

    pub fn snapshot_timeout() -> Duration {
        Duration::from_millis(SNAPSHOT_TIMEOUT_MS)
    }

    pub fn shell_preload_delay() -> Duration {
        Duration::from_millis(SHELL_PRELOAD_DELAY_MS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Standalone provider
// ─────────────────────────────────────────────────────────────────────────────

/// Standalone story configuration.
#[derive(Debug, Clone)]
pub struct StoryConfigProvider {
    pub basic_timeout: Duration,
    pub snapshot_timeout: Duration,
    pub shell_preload_delay: Duration,
    pub story_shell_preload_enabled: bool,
}

impl StoryConfigProvider {
    /// Configuration for tests: shell preloading is off so no background
    /// launches race the test's own expectations.
    pub fn for_tests() -> Self {
        Self {
            story_shell_preload_enabled: false,
            ..Self::default()
        }
    }
}

impl Default for StoryConfigProvider {
    fn default() -> Self {
        Self {
            basic_timeout: defaults::basic_timeout(),
            snapshot_timeout: defaults::snapshot_timeout(),
            shell_preload_delay: defaults::shell_preload_delay(),
            story_shell_preload_enabled: true,
        }
    }
}

impl ConfigProvider for StoryConfigProvider {}

impl HasStoryConfig for StoryConfigProvider {
    fn basic_timeout(&self) -> Duration {
        self.basic_timeout
    }

    fn snapshot_timeout(&self) -> Duration {
        self.snapshot_timeout
    }

    fn shell_preload_delay(&self) -> Duration {
        self.shell_preload_delay
    }

    fn story_shell_preload_enabled(&self) -> bool {
        self.story_shell_preload_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_config_defaults() {
        let config = StoryConfigProvider::default();
        assert_eq!(config.basic_timeout(), Duration::from_secs(3));
        assert_eq!(config.snapshot_timeout(), Duration::from_secs(1));
        assert_eq!(config.shell_preload_delay(), Duration::from_secs(5));
        assert!(config.story_shell_preload_enabled());
    }

    #[test]
    fn test_for_tests_disables_preload() {
        let config = StoryConfigProvider::for_tests();
        assert!(!config.story_shell_preload_enabled());
        assert_eq!(config.basic_timeout(), defaults::basic_timeout());
    }
}
