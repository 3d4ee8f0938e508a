use crate::config::TopicsConfig;

/// Resolves the watcher's topic names from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    task_prefix: String,
    timer: String,
    event: String,
    command: String,
}

impl TopicNames {
    pub fn new(config: &TopicsConfig) -> Self {
        Self {
            task_prefix: config.task_prefix.clone(),
            timer: config.timer.clone(),
            event: config.event.clone(),
            command: config.command.clone(),
        }
    }

    /// Work queue of one task type
    pub fn task_topic(&self, task_name: &str) -> String {
        format!("{}{}", self.task_prefix, task_name)
    }

    pub fn is_task_topic(&self, topic: &str) -> bool {
        topic.len() > self.task_prefix.len() && topic.starts_with(&self.task_prefix)
    }

    /// Raw timer topic awaiting initial bucket assignment
    pub fn timer(&self) -> &str {
        &self.timer
    }

    /// Bucket topic for a threshold in seconds
    pub fn bucket_topic(&self, threshold_seconds: u64) -> String {
        format!("{}-{}", self.timer, threshold_seconds)
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Default for TopicNames {
    fn default() -> Self {
        Self::new(&TopicsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let names = TopicNames::default();
        assert_eq!(names.task_topic("send_email"), "task.send_email");
        assert_eq!(names.bucket_topic(300), "timer-300");
        assert_eq!(names.timer(), "timer");
        assert_eq!(names.event(), "event");
        assert_eq!(names.command(), "command");
    }

    #[test]
    fn test_task_topic_detection() {
        let names = TopicNames::default();
        assert!(names.is_task_topic("task.send_email"));
        assert!(!names.is_task_topic("task."));
        assert!(!names.is_task_topic("timer-5"));
        assert!(!names.is_task_topic("event"));
    }
}
