use serde::{Deserialize, Serialize};

use crate::error::{PorterError, Result};

/// Why a task was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskReason {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Download,
    Install,
    Uninstall,
    Update,
    Heal,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Download => "download",
            TaskType::Install => "install",
            TaskType::Uninstall => "uninstall",
            TaskType::Update => "update",
            TaskType::Heal => "heal",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// One unit of work within an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub reason: TaskReason,
    #[serde(default)]
    pub total_size: u64,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(task_type: TaskType, reason: TaskReason, total_size: u64) -> Self {
        Self {
            task_type,
            reason,
            total_size,
            status: TaskStatus::Pending,
        }
    }

    /// Moves the task along `pending -> running -> terminal`.
    pub fn advance(&mut self, next: TaskStatus) -> Result<()> {
        let allowed = match (self.status, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(PorterError::Validation(format!(
                "{} task cannot go from {:?} to {:?}",
                self.task_type, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_once_and_stay_finished() {
        let mut task = Task::new(TaskType::Install, TaskReason::Install, 0);
        assert!(task.advance(TaskStatus::Succeeded).is_err());
        task.advance(TaskStatus::Running).unwrap();
        assert!(task.advance(TaskStatus::Running).is_err());
        task.advance(TaskStatus::Failed).unwrap();
        assert!(task.advance(TaskStatus::Succeeded).is_err());
        assert_eq!(task.status, TaskStatus::Failed);

        let mut skipped = Task::new(TaskType::Download, TaskReason::Install, 10);
        skipped.advance(TaskStatus::Cancelled).unwrap();
        assert!(skipped.status.is_terminal());
    }
}
