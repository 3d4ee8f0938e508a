pub mod messages;
pub mod task;
pub mod task_definition;

// Re-export core models for easy access
pub use messages::{Command, ReloadTaskCommand, TaskUpdate};
pub use task::{Task, TaskKey, TaskType};
pub use task_definition::{
    FailureStrategy, RecoveryWorkflow, RetryPolicy, TaskDefinition, TaskDefinitionInput,
    TopicConfiguration, TopicConfigurationOverrides,
};
