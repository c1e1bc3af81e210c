//! Per-command settings and the executor builder.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::ConfigError;
use crate::executor::CommandExecutor;
use crate::hook::HookRegistry;
use crate::registry::CommandRegistry;

/// Default deadline for a single call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default number of calls allowed in flight per command.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
/// Default minimum number of events before the circuit may trip.
pub const DEFAULT_REQUEST_VOLUME_THRESHOLD: u64 = 20;
/// Default time the circuit stays open before admitting a probe.
pub const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_millis(5000);
/// Default error percentage that trips the circuit.
pub const DEFAULT_ERROR_THRESHOLD_PCT: u32 = 50;
/// Default length of the rolling health window.
pub const DEFAULT_ROLLING_WINDOW: Duration = Duration::from_secs(10);
/// Default number of buckets in the rolling health window.
pub const DEFAULT_WINDOW_BUCKETS: usize = 10;

/// Resolved settings of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Deadline for one call.
    pub timeout: Duration,
    /// Size of the admission pool.
    pub max_concurrent: usize,
    /// Error percentage (0-100) at or above which the circuit trips.
    pub error_threshold_pct: u32,
    /// Events required in the window before the error rate is considered.
    pub request_volume_threshold: u64,
    /// How long the circuit stays open before admitting a probe.
    pub sleep_window: Duration,
    /// Length of the rolling health window.
    pub rolling_window: Duration,
    /// Number of buckets the rolling window is split into.
    pub window_buckets: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            error_threshold_pct: DEFAULT_ERROR_THRESHOLD_PCT,
            request_volume_threshold: DEFAULT_REQUEST_VOLUME_THRESHOLD,
            sleep_window: DEFAULT_SLEEP_WINDOW,
            rolling_window: DEFAULT_ROLLING_WINDOW,
            window_buckets: DEFAULT_WINDOW_BUCKETS,
        }
    }
}

impl Settings {
    /// Checks the settings can back a working command.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooLarge(self.max_concurrent));
        }
        if self.error_threshold_pct > 100 {
            return Err(ConfigError::ThresholdOutOfRange(self.error_threshold_pct));
        }
        if self.window_buckets == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if self.rolling_window.as_millis() < self.window_buckets as u128 {
            return Err(ConfigError::WindowTooShort {
                window_ms: self.rolling_window.as_millis(),
                buckets: self.window_buckets,
            });
        }
        Ok(())
    }
}

/// Partial settings for one command; unset fields keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandConfig {
    timeout: Option<Duration>,
    max_concurrent: Option<usize>,
    error_threshold_pct: Option<u32>,
    request_volume_threshold: Option<u64>,
    sleep_window: Option<Duration>,
    rolling_window: Option<Duration>,
    window_buckets: Option<usize>,
}

impl CommandConfig {
    /// Creates a config with nothing overridden.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deadline for one call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how many calls may run at once.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// Sets the error percentage that trips the circuit.
    pub fn error_threshold_pct(mut self, pct: u32) -> Self {
        self.error_threshold_pct = Some(pct);
        self
    }

    /// Sets the minimum window volume before the circuit may trip.
    pub fn request_volume_threshold(mut self, volume: u64) -> Self {
        self.request_volume_threshold = Some(volume);
        self
    }

    /// Sets how long the circuit stays open before probing.
    pub fn sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window = Some(window);
        self
    }

    /// Sets the rolling window length and its bucket count.
    pub fn rolling_window(mut self, window: Duration, buckets: usize) -> Self {
        self.rolling_window = Some(window);
        self.window_buckets = Some(buckets);
        self
    }

    /// Fills unset fields from `base`.
    pub fn resolve(&self, base: &Settings) -> Settings {
        Settings {
            timeout: self.timeout.unwrap_or(base.timeout),
            max_concurrent: self.max_concurrent.unwrap_or(base.max_concurrent),
            error_threshold_pct: self.error_threshold_pct.unwrap_or(base.error_threshold_pct),
            request_volume_threshold: self
                .request_volume_threshold
                .unwrap_or(base.request_volume_threshold),
            sleep_window: self.sleep_window.unwrap_or(base.sleep_window),
            rolling_window: self.rolling_window.unwrap_or(base.rolling_window),
            window_buckets: self.window_buckets.unwrap_or(base.window_buckets),
        }
    }
}

/// Name-keyed settings lookup.
#[derive(Default)]
pub struct SettingsRegistry {
    defaults: RwLock<Settings>,
    commands: RwLock<AHashMap<String, CommandConfig>>,
}

impl SettingsRegistry {
    /// Creates a registry that answers every name with [`Settings::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the baseline used for names without their own config.
    pub fn set_defaults(&self, config: &CommandConfig) {
        let mut defaults = self.defaults.write();
        *defaults = config.resolve(&Settings::default());
    }

    /// Stores the config of one command, replacing any earlier one.
    pub fn configure(&self, name: impl Into<String>, config: CommandConfig) {
        self.commands.write().insert(name.into(), config);
    }

    /// Stores several command configs at once.
    pub fn configure_all<I, S>(&self, configs: I)
    where
        I: IntoIterator<Item = (S, CommandConfig)>,
        S: Into<String>,
    {
        let mut commands = self.commands.write();
        for (name, config) in configs {
            commands.insert(name.into(), config);
        }
    }

    /// Settings for `name`, falling back to the defaults.
    pub fn settings(&self, name: &str) -> Settings {
        let defaults = self.defaults.read().clone();
        match self.commands.read().get(name) {
            Some(config) => config.resolve(&defaults),
            None => defaults,
        }
    }
}

/// Builder for a [`CommandExecutor`] with its own registry.
pub struct ExecutorBuilder {
    defaults: CommandConfig,
    commands: Vec<(String, CommandConfig)>,
    hooks: HookRegistry,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    /// Creates a builder with the library defaults and no hooks.
    pub fn new() -> Self {
        Self {
            defaults: CommandConfig::default(),
            commands: Vec::new(),
            hooks: HookRegistry::new(),
        }
    }

    /// Overrides the defaults used by unconfigured commands.
    pub fn default_config(mut self, config: CommandConfig) -> Self {
        self.defaults = config;
        self
    }

    /// Configures one command.
    pub fn configure(mut self, name: impl Into<String>, config: CommandConfig) -> Self {
        self.commands.push((name.into(), config));
        self
    }

    /// Sets the hooks shared by every circuit of the executor.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Builds the executor.
    pub fn build(self) -> CommandExecutor {
        let settings = SettingsRegistry::new();
        settings.set_defaults(&self.defaults);
        settings.configure_all(self.commands);

        let registry = CommandRegistry::new(settings, Arc::new(self.hooks));
        CommandExecutor::with_registry(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_names_get_defaults() {
        let registry = SettingsRegistry::new();
        let settings = registry.settings("anything");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.timeout, Duration::from_secs(1));
        assert_eq!(settings.max_concurrent, 10);
        assert_eq!(settings.request_volume_threshold, 20);
        assert_eq!(settings.sleep_window, Duration::from_secs(5));
        assert_eq!(settings.error_threshold_pct, 50);
    }

    #[test]
    fn overrides_merge_onto_defaults() {
        let registry = SettingsRegistry::new();
        registry.set_defaults(&CommandConfig::new().max_concurrent(3));
        registry.configure("svc", CommandConfig::new().timeout(Duration::from_millis(50)));

        let svc = registry.settings("svc");
        assert_eq!(svc.timeout, Duration::from_millis(50));
        assert_eq!(svc.max_concurrent, 3);
        assert_eq!(registry.settings("other").timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn validation_rejects_nonsense() {
        let base = Settings::default();
        let check = |config: CommandConfig| config.resolve(&base).validate();

        assert_eq!(check(CommandConfig::new()), Ok(()));
        assert_eq!(
            check(CommandConfig::new().max_concurrent(0)),
            Err(ConfigError::ZeroConcurrency)
        );
        assert_eq!(
            check(CommandConfig::new().error_threshold_pct(101)),
            Err(ConfigError::ThresholdOutOfRange(101))
        );
        assert_eq!(
            check(CommandConfig::new().timeout(Duration::ZERO)),
            Err(ConfigError::ZeroTimeout)
        );
        assert_eq!(
            check(CommandConfig::new().rolling_window(Duration::from_secs(1), 0)),
            Err(ConfigError::ZeroBuckets)
        );
        assert!(matches!(
            check(CommandConfig::new().rolling_window(Duration::from_millis(5), 10)),
            Err(ConfigError::WindowTooShort { buckets: 10, .. })
        ));
    }
}
