use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{WatcherError, WatcherResult};
use crate::models::{TaskDefinition, TaskDefinitionInput};

/// Registered task definitions by name. Definitions are validated on the way in
/// and immutable once stored.
#[derive(Debug, Default)]
pub struct TaskDefinitionRegistry {
    definitions: DashMap<String, Arc<TaskDefinition>>,
}

impl TaskDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition
    pub fn register(&self, input: TaskDefinitionInput) -> WatcherResult<Arc<TaskDefinition>> {
        let definition = TaskDefinition::validate(input).inspect_err(|e| {
            warn!(error = %e, "Rejected task definition");
        })?;
        self.insert(definition)
    }

    /// Decode, validate and store a definition given as raw JSON
    pub fn register_json(&self, value: Value) -> WatcherResult<Arc<TaskDefinition>> {
        let definition = TaskDefinition::from_json(value).inspect_err(|e| {
            warn!(error = %e, "Rejected task definition");
        })?;
        self.insert(definition)
    }

    fn insert(&self, definition: TaskDefinition) -> WatcherResult<Arc<TaskDefinition>> {
        match self.definitions.entry(definition.name.clone()) {
            Entry::Occupied(_) => Err(WatcherError::already_registered(definition.name)),
            Entry::Vacant(vacant) => {
                let definition = Arc::new(definition);
                info!(
                    task_name = %definition.name,
                    failure_strategy = %definition.failure_strategy,
                    timeout_strategy = %definition.timeout_strategy,
                    timeout_second = definition.timeout_second,
                    "Registered task definition"
                );
                vacant.insert(definition.clone());
                Ok(definition)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskDefinition>> {
        self.definitions.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .definitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
