//! Name-keyed store of circuits and admission pools.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::circuit::CircuitBreaker;
use crate::config::{Settings, SettingsRegistry};
use crate::error::ConfigError;
use crate::hook::HookRegistry;
use crate::pool::AdmissionPool;

/// Everything shared by the calls of one named command.
#[derive(Debug)]
pub struct Command {
    name: String,
    settings: Settings,
    circuit: CircuitBreaker,
    pool: AdmissionPool,
}

impl Command {
    /// Command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings the command was created with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The command's circuit.
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// The command's admission pool.
    pub fn pool(&self) -> &AdmissionPool {
        &self.pool
    }
}

/// Lazily populated map from command name to [`Command`].
///
/// Entries live as long as the registry; there is no removal.
pub struct CommandRegistry {
    settings: SettingsRegistry,
    hooks: Arc<HookRegistry>,
    commands: RwLock<AHashMap<String, Arc<Command>>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new(SettingsRegistry::new(), Arc::new(HookRegistry::new()))
    }
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new(settings: SettingsRegistry, hooks: Arc<HookRegistry>) -> Self {
        Self {
            settings,
            hooks,
            commands: RwLock::new(AHashMap::new()),
        }
    }

    /// Settings lookup backing this registry.
    pub fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }

    /// Hooks handed to every circuit created here.
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Returns the command for `name`, creating it on first use.
    ///
    /// Concurrent first calls for one name all receive the same instance.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Command>, ConfigError> {
        if let Some(command) = self.commands.read().get(name) {
            return Ok(Arc::clone(command));
        }

        let settings = self.settings.settings(name);
        settings.validate()?;

        // Another caller may have won while we waited for the write lock.
        let mut commands = self.commands.write();
        let command = commands
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(command = name, "created command");
                Arc::new(Command {
                    name: name.to_owned(),
                    circuit: CircuitBreaker::new(name, &settings, Arc::clone(&self.hooks)),
                    pool: AdmissionPool::new(settings.max_concurrent),
                    settings,
                })
            })
            .clone();
        Ok(command)
    }

    /// Returns the command for `name` if it has been used.
    pub fn get(&self, name: &str) -> Option<Arc<Command>> {
        self.commands.read().get(name).cloned()
    }

    /// Names of every command created so far.
    pub fn names(&self) -> Vec<String> {
        self.commands.read().keys().cloned().collect()
    }

    /// Number of commands created so far.
    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    /// True if no command has been created.
    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }
}
